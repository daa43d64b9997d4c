use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use vtt_cbor::Hash;
use vtt_store::{DocumentStore, DynStore, EntityKind, FsStore, MemStore, SessionRecord};
use vtt_types::{ParticipantId, SessionId, SessionStatus, Value, Version};

fn record(version: u64, state: serde_json::Value) -> SessionRecord {
    let state = Value::from(state);
    SessionRecord {
        session_id: SessionId::from("s1"),
        writer: ParticipantId::from("gm"),
        participants: vec![ParticipantId::from("p1"), ParticipantId::from("p2")],
        status: SessionStatus::Active,
        version: Version::new(version),
        hash: Hash::of_cbor(&state).expect("hash"),
        state,
        synced_at_ms: version * 1000,
    }
}

fn exercise(store: DynStore) {
    let first = record(1, json!({"actors": {"a1": {"hp": 5}}, "items": [{"id": "i1"}]}));
    store.put_session(&first).expect("put first");
    let rows = store.get_entities(&first.session_id).expect("entities");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r.kind == EntityKind::Item && r.id == "i1"));

    // a later sync replaces everything, including dropped entities
    let second = record(2, json!({"actors": {"a1": {"hp": 4}}}));
    store.put_session(&second).expect("put second");
    assert_eq!(store.get_session(&second.session_id).expect("get"), Some(second.clone()));
    let rows = store.get_entities(&second.session_id).expect("entities");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].body, Value::from(json!({"hp": 4})));

    assert_eq!(store.list_sessions().expect("list"), vec![second.session_id.clone()]);
}

#[test]
fn mem_store_behaves_as_document_store() {
    exercise(Arc::new(MemStore::new()));
}

#[test]
fn fs_store_behaves_as_document_store() {
    let dir = TempDir::new().expect("tmp");
    exercise(Arc::new(FsStore::open(dir.path()).expect("open")));
}
