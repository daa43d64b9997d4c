//! Per-session engine: status machine, writer gate, and the state store.
//!
//! A [`SessionKernel`] is single-owner and synchronous. Whoever holds it
//! `&mut` is the session's concurrency controller; everyone else sees
//! [`SessionSnapshot`]s taken after each accepted batch.

use std::collections::BTreeSet;
use std::sync::Arc;

use vtt_cbor::Hash;
use vtt_types::{
    FullStateRequest, FullStateResponse, ParticipantId, SessionId, SessionStatus, StateUpdate,
    Value, Version,
};

use crate::error::EngineError;
use crate::reconcile::reconcile;
use crate::state::{check_batch_shape, Applied, Limits, StateStore};

/// Parameters for a brand-new session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub id: SessionId,
    pub writer: ParticipantId,
    pub participants: Vec<ParticipantId>,
    /// Initial document; `None` starts from an empty map.
    pub initial: Option<Value>,
}

impl SessionSpec {
    pub fn new(id: SessionId, writer: ParticipantId) -> Self {
        Self {
            id,
            writer,
            participants: Vec::new(),
            initial: None,
        }
    }

    pub fn with_participants(mut self, participants: Vec<ParticipantId>) -> Self {
        self.participants = participants;
        self
    }

    pub fn with_initial(mut self, initial: Value) -> Self {
        self.initial = Some(initial);
        self
    }
}

/// Immutable view of a session after some accepted batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub writer: ParticipantId,
    pub participants: Vec<ParticipantId>,
    pub status: SessionStatus,
    pub state: Arc<Value>,
    pub version: Version,
    pub hash: Hash,
}

impl SessionSnapshot {
    /// The writer and listed participants may read state.
    pub fn can_read(&self, who: &ParticipantId) -> bool {
        *who == self.writer || self.participants.contains(who)
    }
}

#[derive(Debug)]
pub struct SessionKernel {
    id: SessionId,
    writer: ParticipantId,
    participants: BTreeSet<ParticipantId>,
    status: SessionStatus,
    store: StateStore,
    limits: Limits,
}

impl SessionKernel {
    pub fn create(spec: SessionSpec, limits: Limits) -> Result<Self, EngineError> {
        let store = StateStore::new(spec.initial.unwrap_or_else(Value::empty_map))?;
        log::debug!("session {} created for writer {}", spec.id, spec.writer);
        Ok(Self {
            id: spec.id,
            writer: spec.writer,
            participants: spec.participants.into_iter().collect(),
            status: SessionStatus::Created,
            store,
            limits,
        })
    }

    /// Rebuild a session from a persisted snapshot.
    ///
    /// The recorded hash must match the canonical hash of the stored state.
    /// A session persisted as `ACTIVE` comes back `WRITER_DISCONNECTED`, since
    /// no writer is attached after a restart.
    pub fn restore(snapshot: SessionSnapshot, limits: Limits) -> Result<Self, EngineError> {
        if snapshot.status.is_terminal() {
            return Err(EngineError::SessionNotFound(snapshot.id));
        }
        let state = Arc::try_unwrap(snapshot.state).unwrap_or_else(|shared| Value::clone(&shared));
        let store = StateStore::restore(state, snapshot.version, snapshot.hash)?;
        let status = match snapshot.status {
            SessionStatus::Active => SessionStatus::WriterDisconnected,
            other => other,
        };
        log::debug!(
            "session {} restored at version {} ({status})",
            snapshot.id,
            snapshot.version
        );
        Ok(Self {
            id: snapshot.id,
            writer: snapshot.writer,
            participants: snapshot.participants.into_iter().collect(),
            status,
            store,
            limits,
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn writer(&self) -> &ParticipantId {
        &self.writer
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn version(&self) -> Version {
        self.store.version()
    }

    pub fn hash(&self) -> Hash {
        self.store.hash()
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            writer: self.writer.clone(),
            participants: self.participants.iter().cloned().collect(),
            status: self.status,
            state: Arc::clone(self.store.state()),
            version: self.store.version(),
            hash: self.store.hash(),
        }
    }

    /// Gate and apply one writer batch.
    pub fn submit(
        &mut self,
        submitter: &ParticipantId,
        update: &StateUpdate,
    ) -> Result<Applied, EngineError> {
        let result = self.gate(submitter, update).and_then(|()| {
            self.store
                .apply_batch(update.base_version, &update.operations, &self.limits)
        });
        match &result {
            Ok(applied) => log::debug!(
                "session {} accepted {} ({} ops) -> version {}",
                self.id,
                update.request_id,
                update.operations.len(),
                applied.version
            ),
            Err(err) => log::warn!(
                "session {} rejected {} from {submitter}: {err}",
                self.id,
                update.request_id
            ),
        }
        result
    }

    fn gate(&self, submitter: &ParticipantId, update: &StateUpdate) -> Result<(), EngineError> {
        if update.session_id != self.id || self.status.is_terminal() {
            return Err(EngineError::SessionNotFound(update.session_id.clone()));
        }
        if *submitter != self.writer {
            return Err(EngineError::PermissionDenied(format!(
                "'{submitter}' is not the writer of session '{}'",
                self.id
            )));
        }
        if self.status != SessionStatus::Active {
            return Err(EngineError::PermissionDenied(format!(
                "session '{}' is {}, updates are not accepted",
                self.id, self.status
            )));
        }
        check_batch_shape(&update.operations, &self.limits)
    }

    pub fn full_state(
        &self,
        requester: &ParticipantId,
        request: &FullStateRequest,
    ) -> Result<FullStateResponse, EngineError> {
        reconcile(&self.snapshot(), requester, request)
    }

    /// The writer attached (or re-attached); the session becomes `ACTIVE`.
    pub fn writer_connected(&mut self, who: &ParticipantId) -> Result<SessionStatus, EngineError> {
        self.ensure_live()?;
        if *who != self.writer {
            return Err(EngineError::PermissionDenied(format!(
                "'{who}' cannot take over writer '{}' of session '{}'",
                self.writer, self.id
            )));
        }
        if self.status != SessionStatus::Active {
            log::debug!("session {} writer {} connected", self.id, self.writer);
        }
        self.status = SessionStatus::Active;
        Ok(self.status)
    }

    /// The writer's channel dropped; updates are refused until it returns.
    pub fn writer_disconnected(&mut self) -> Result<SessionStatus, EngineError> {
        self.ensure_live()?;
        if self.status == SessionStatus::Active {
            log::debug!("session {} writer {} disconnected", self.id, self.writer);
            self.status = SessionStatus::WriterDisconnected;
        }
        Ok(self.status)
    }

    /// Replace the observer list. The writer is always implicitly allowed.
    pub fn set_participants(&mut self, participants: Vec<ParticipantId>) -> Result<(), EngineError> {
        self.ensure_live()?;
        self.participants = participants.into_iter().collect();
        Ok(())
    }

    /// Move to the terminal status and hand back the final snapshot.
    pub fn end(&mut self) -> Result<SessionSnapshot, EngineError> {
        self.ensure_live()?;
        self.status = SessionStatus::Ended;
        log::debug!("session {} ended at version {}", self.id, self.store.version());
        Ok(self.snapshot())
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::SessionNotFound(self.id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vtt_types::ErrorCode;

    fn kernel() -> SessionKernel {
        let spec = SessionSpec::new(SessionId::from("s1"), ParticipantId::from("gm"))
            .with_participants(vec![ParticipantId::from("p1")]);
        SessionKernel::create(spec, Limits::default()).unwrap()
    }

    fn update(base: u64, ops: serde_json::Value) -> StateUpdate {
        serde_json::from_value(json!({
            "requestId": format!("r{base}"),
            "sessionId": "s1",
            "baseVersion": base.to_string(),
            "operations": ops,
        }))
        .unwrap()
    }

    fn gm() -> ParticipantId {
        ParticipantId::from("gm")
    }

    #[test]
    fn created_session_refuses_updates_until_writer_connects() {
        let mut k = kernel();
        assert_eq!(k.status(), SessionStatus::Created);
        let u = update(0, json!([{"path": ["a"], "verb": "set", "value": 1}]));
        let err = k.submit(&gm(), &u).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);

        k.writer_connected(&gm()).unwrap();
        let applied = k.submit(&gm(), &u).unwrap();
        assert_eq!(applied.version, Version::new(1));
    }

    #[test]
    fn batch_shape_is_checked_before_base_version() {
        let mut k = kernel();
        k.writer_connected(&gm()).unwrap();
        k.submit(&gm(), &update(0, json!([{"path": ["a"], "verb": "set", "value": 1}])))
            .unwrap();

        // Empty and stale: the shape failure wins.
        let err = k.submit(&gm(), &update(0, json!([]))).unwrap_err();
        assert!(matches!(err, EngineError::InvalidUpdate(_)));
        assert_eq!(err.code(), ErrorCode::ValidationError);

        // Well-formed and stale: a version conflict.
        let err = k
            .submit(&gm(), &update(0, json!([{"path": ["a"], "verb": "set", "value": 2}])))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::VersionConflict);
        assert_eq!(k.snapshot().version, Version::new(1));
    }

    #[test]
    fn non_writer_is_denied_without_mutation() {
        let mut k = kernel();
        k.writer_connected(&gm()).unwrap();
        let before = k.snapshot();
        let u = update(0, json!([{"path": ["a"], "verb": "set", "value": 1}]));
        let err = k.submit(&ParticipantId::from("p1"), &u).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        assert_eq!(k.snapshot(), before);
    }

    #[test]
    fn gate_order_puts_identity_before_shape() {
        let mut k = kernel();
        k.writer_connected(&gm()).unwrap();
        let empty = update(0, json!([]));
        let err = k.submit(&ParticipantId::from("p1"), &empty).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        let err = k.submit(&gm(), &empty).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let mut other = update(0, json!([{"path": ["a"], "verb": "set", "value": 1}]));
        other.session_id = SessionId::from("s2");
        let err = k.submit(&gm(), &other).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SessionNotFound);
    }

    #[test]
    fn disconnect_and_reconnect_cycle() {
        let mut k = kernel();
        k.writer_connected(&gm()).unwrap();
        assert_eq!(k.writer_disconnected().unwrap(), SessionStatus::WriterDisconnected);
        let u = update(0, json!([{"path": ["a"], "verb": "set", "value": 1}]));
        assert_eq!(k.submit(&gm(), &u).unwrap_err().code(), ErrorCode::PermissionDenied);

        let req = FullStateRequest::new(SessionId::from("s1"));
        assert!(!k.full_state(&ParticipantId::from("p1"), &req).unwrap().is_unchanged());

        let err = k.writer_connected(&ParticipantId::from("p1")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        assert_eq!(k.writer_connected(&gm()).unwrap(), SessionStatus::Active);
        assert!(k.submit(&gm(), &u).is_ok());
    }

    #[test]
    fn ended_session_is_gone() {
        let mut k = kernel();
        k.writer_connected(&gm()).unwrap();
        let last = k.end().unwrap();
        assert_eq!(last.status, SessionStatus::Ended);

        let u = update(0, json!([{"path": ["a"], "verb": "set", "value": 1}]));
        assert_eq!(k.submit(&gm(), &u).unwrap_err().code(), ErrorCode::SessionNotFound);
        assert!(matches!(k.end(), Err(EngineError::SessionNotFound(_))));
        assert!(matches!(k.writer_connected(&gm()), Err(EngineError::SessionNotFound(_))));
        let req = FullStateRequest::new(SessionId::from("s1"));
        assert!(matches!(k.full_state(&gm(), &req), Err(EngineError::SessionNotFound(_))));
    }

    #[test]
    fn participants_can_be_replaced() {
        let mut k = kernel();
        let req = FullStateRequest::new(SessionId::from("s1"));
        assert!(k.full_state(&ParticipantId::from("p2"), &req).is_err());
        k.set_participants(vec![ParticipantId::from("p2")]).unwrap();
        assert!(k.full_state(&ParticipantId::from("p2"), &req).is_ok());
        assert!(k.full_state(&ParticipantId::from("p1"), &req).is_err());
    }

    #[test]
    fn restore_round_trips_snapshot() {
        let mut k = kernel();
        k.writer_connected(&gm()).unwrap();
        k.submit(&gm(), &update(0, json!([{"path": ["tokens"], "verb": "push", "value": "t1"}])))
            .unwrap();
        let snap = k.snapshot();

        let restored = SessionKernel::restore(snap.clone(), Limits::default()).unwrap();
        assert_eq!(restored.status(), SessionStatus::WriterDisconnected);
        assert_eq!(restored.version(), snap.version);
        assert_eq!(restored.hash(), snap.hash);

        let mut ended = snap;
        ended.status = SessionStatus::Ended;
        assert!(matches!(
            SessionKernel::restore(ended, Limits::default()),
            Err(EngineError::SessionNotFound(_))
        ));
    }
}
