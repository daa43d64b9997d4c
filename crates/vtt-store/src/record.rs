use std::fmt;

use serde::{Deserialize, Serialize};
use vtt_cbor::Hash;
use vtt_types::{ParticipantId, SessionId, SessionStatus, Value, Version};

use crate::entities::extract_entities;

/// Full-overwrite persisted form of one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub writer: ParticipantId,
    #[serde(default)]
    pub participants: Vec<ParticipantId>,
    pub status: SessionStatus,
    pub version: Version,
    pub hash: Hash,
    pub state: Value,
    /// Wall-clock milliseconds of the flush that produced this record.
    pub synced_at_ms: u64,
}

impl SessionRecord {
    /// Entity rows derived from this record's state.
    pub fn entities(&self) -> Vec<EntityRecord> {
        extract_entities(&self.state)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Actor,
    Item,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Actor => f.write_str("actor"),
            EntityKind::Item => f.write_str("item"),
        }
    }
}

/// One domain entity row, e.g. an actor sheet, stored next to the session record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub kind: EntityKind,
    pub id: String,
    pub body: Value,
}
