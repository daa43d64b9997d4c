use vtt_types::{FullState, FullStateRequest, FullStateResponse, ParticipantId, Value};

use crate::error::EngineError;
use crate::session::SessionSnapshot;

/// Answer a full-state request from an immutable snapshot.
///
/// A cached `(version, hash)` pair short-circuits to `unchanged` only when
/// both halves match; any other request gets the complete tree.
pub fn reconcile(
    snapshot: &SessionSnapshot,
    requester: &ParticipantId,
    request: &FullStateRequest,
) -> Result<FullStateResponse, EngineError> {
    if request.session_id != snapshot.id || snapshot.status.is_terminal() {
        return Err(EngineError::SessionNotFound(request.session_id.clone()));
    }
    if !snapshot.can_read(requester) {
        return Err(EngineError::PermissionDenied(format!(
            "'{requester}' is not a participant of session '{}'",
            snapshot.id
        )));
    }
    if request.cached_version == Some(snapshot.version)
        && request.cached_hash == Some(snapshot.hash)
    {
        return Ok(FullStateResponse::Unchanged);
    }
    Ok(FullStateResponse::Full(FullState {
        state: Value::clone(&snapshot.state),
        version: snapshot.version,
        hash: snapshot.hash,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::verify::canonical_hash;
    use serde_json::json;
    use vtt_types::{Hash, SessionId, SessionStatus, Version};

    fn snapshot() -> SessionSnapshot {
        let state = Value::from(json!({"actors": {"a1": {"hp": 4}}}));
        let hash = canonical_hash(&state).unwrap();
        SessionSnapshot {
            id: SessionId::from("s1"),
            writer: ParticipantId::from("gm"),
            participants: vec![ParticipantId::from("p1")],
            status: SessionStatus::Active,
            state: Arc::new(state),
            version: Version::new(4),
            hash,
        }
    }

    #[test]
    fn matching_pair_is_unchanged() {
        let snap = snapshot();
        let req = FullStateRequest::with_cache(snap.id.clone(), Version::new(4), snap.hash);
        let resp = reconcile(&snap, &ParticipantId::from("p1"), &req).unwrap();
        assert!(resp.is_unchanged());
    }

    #[test]
    fn half_match_transfers_everything() {
        let snap = snapshot();
        let stale_hash = FullStateRequest::with_cache(snap.id.clone(), Version::new(4), Hash::of_bytes(b"x"));
        let full = reconcile(&snap, &ParticipantId::from("gm"), &stale_hash)
            .unwrap()
            .into_full()
            .unwrap();
        assert_eq!(full.version, Version::new(4));
        assert_eq!(full.state, *snap.state);

        let stale_version = FullStateRequest::with_cache(snap.id.clone(), Version::new(3), snap.hash);
        assert!(!reconcile(&snap, &ParticipantId::from("p1"), &stale_version)
            .unwrap()
            .is_unchanged());

        let no_cache = FullStateRequest::new(snap.id.clone());
        assert!(!reconcile(&snap, &ParticipantId::from("p1"), &no_cache)
            .unwrap()
            .is_unchanged());
    }

    #[test]
    fn outsiders_and_ended_sessions_are_refused() {
        let mut snap = snapshot();
        let req = FullStateRequest::new(snap.id.clone());
        let err = reconcile(&snap, &ParticipantId::from("stranger"), &req).unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied(_)));

        let wrong = FullStateRequest::new(SessionId::from("other"));
        let err = reconcile(&snap, &ParticipantId::from("p1"), &wrong).unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));

        snap.status = SessionStatus::Ended;
        let err = reconcile(&snap, &ParticipantId::from("p1"), &req).unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
    }
}
