use crate::{DocumentStore, EntityRecord, SessionRecord, StoreResult, decode_verified};
use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};
use vtt_cbor::to_canonical_cbor;
use vtt_types::SessionId;

#[derive(Default)]
struct Slot {
    record: Vec<u8>,
    entities: Vec<EntityRecord>,
}

/// In-process store holding encoded records, for tests and ephemeral daemons.
#[derive(Clone, Default)]
pub struct MemStore {
    sessions: Arc<RwLock<BTreeMap<SessionId, Slot>>>,
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("MemStore")
            .field("sessions", &sessions.len())
            .finish()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stored bytes of a session, bypassing encoding.
    #[cfg(test)]
    pub(crate) fn corrupt(&self, id: &SessionId, bytes: Vec<u8>) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.entry(id.clone()).or_default().record = bytes;
    }
}

impl DocumentStore for MemStore {
    fn put_session(&self, record: &SessionRecord) -> StoreResult<()> {
        let slot = Slot {
            record: to_canonical_cbor(record)?,
            entities: record.entities(),
        };
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(record.session_id.clone(), slot);
        Ok(())
    }

    fn get_session(&self, id: &SessionId) -> StoreResult<Option<SessionRecord>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(id)
            .map(|slot| decode_verified(&slot.record))
            .transpose()
    }

    fn list_sessions(&self) -> StoreResult<Vec<SessionId>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.keys().cloned().collect())
    }

    fn delete_session(&self, id: &SessionId) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.remove(id).is_some())
    }

    fn get_entities(&self, id: &SessionId) -> StoreResult<Vec<EntityRecord>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions
            .get(id)
            .map(|slot| slot.entities.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use serde_json::json;
    use vtt_cbor::Hash;
    use vtt_types::{ParticipantId, SessionStatus, Value, Version};

    fn record(id: &str, state: serde_json::Value) -> SessionRecord {
        let state = Value::from(state);
        SessionRecord {
            session_id: SessionId::from(id),
            writer: ParticipantId::from("gm"),
            participants: vec![ParticipantId::from("p1")],
            status: SessionStatus::Active,
            version: Version::new(2),
            hash: Hash::of_cbor(&state).expect("hash"),
            state,
            synced_at_ms: 1,
        }
    }

    #[test]
    fn put_overwrites_record_and_entities() {
        let store = MemStore::new();
        store
            .put_session(&record("s1", json!({"actors": {"a1": {}, "a2": {}}})))
            .expect("put");
        assert_eq!(store.get_entities(&SessionId::from("s1")).expect("entities").len(), 2);

        let second = record("s1", json!({"actors": {"a3": {}}}));
        store.put_session(&second).expect("put again");
        let loaded = store.get_session(&SessionId::from("s1")).expect("get");
        assert_eq!(loaded, Some(second));
        let entities = store.get_entities(&SessionId::from("s1")).expect("entities");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "a3");
    }

    #[test]
    fn list_and_delete() {
        let store = MemStore::new();
        store.put_session(&record("b", json!({}))).expect("put");
        store.put_session(&record("a", json!({}))).expect("put");
        assert_eq!(
            store.list_sessions().expect("list"),
            vec![SessionId::from("a"), SessionId::from("b")]
        );
        assert!(store.delete_session(&SessionId::from("a")).expect("delete"));
        assert!(!store.delete_session(&SessionId::from("a")).expect("delete"));
        assert_eq!(store.get_session(&SessionId::from("a")).expect("get"), None);
        assert!(store.get_entities(&SessionId::from("a")).expect("entities").is_empty());
    }

    #[test]
    fn tampered_record_is_rejected() {
        let store = MemStore::new();
        let mut bad = record("s1", json!({"hp": 1}));
        bad.state = Value::from(json!({"hp": 2}));
        store.corrupt(&bad.session_id, to_canonical_cbor(&bad).expect("encode"));
        let err = store.get_session(&bad.session_id).expect_err("should fail");
        assert!(matches!(err, StoreError::HashMismatch { .. }));
    }
}
