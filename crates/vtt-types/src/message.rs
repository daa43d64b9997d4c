//! Wire messages exchanged between writers, observers, and the engine.

use serde::{Deserialize, Serialize};
use vtt_cbor::Hash;

use crate::{ErrorCode, SessionId, StateOperation, Value, Version};

/// Writer -> engine: an ordered batch of operations against `base_version`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    pub request_id: String,
    pub session_id: SessionId,
    pub base_version: Version,
    pub operations: Vec<StateOperation>,
    /// Client wall-clock milliseconds; informational only.
    #[serde(default)]
    pub timestamp: u64,
}

/// Error detail carried by a rejected update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<Hash>,
}

/// Engine -> writer: outcome of a [`StateUpdate`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdateResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_hash: Option<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl StateUpdateResponse {
    pub fn accepted(new_version: Version, new_hash: Hash) -> Self {
        Self {
            success: true,
            new_version: Some(new_version),
            new_hash: Some(new_hash),
            error: None,
        }
    }

    pub fn rejected(error: ResponseError) -> Self {
        Self {
            success: false,
            new_version: None,
            new_hash: None,
            error: Some(error),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Engine -> observers: an accepted batch, delivered in apply order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdateBroadcast {
    pub session_id: SessionId,
    pub operations: Vec<StateOperation>,
    pub new_version: Version,
    pub new_hash: Hash,
}

/// Participant -> engine: fetch the authoritative state, optionally
/// presenting a cached `(version, hash)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullStateRequest {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_hash: Option<Hash>,
}

impl FullStateRequest {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            cached_version: None,
            cached_hash: None,
        }
    }

    pub fn with_cache(session_id: SessionId, version: Version, hash: Hash) -> Self {
        Self {
            session_id,
            cached_version: Some(version),
            cached_hash: Some(hash),
        }
    }
}

/// Complete state payload at a specific version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FullState {
    pub state: Value,
    pub version: Version,
    pub hash: Hash,
}

/// Engine -> participant: either `{"unchanged":true}` or a full state.
///
/// A full response always replaces the caller's local state wholesale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FullStateResponseRepr", into = "FullStateResponseRepr")]
pub enum FullStateResponse {
    Unchanged,
    Full(FullState),
}

impl FullStateResponse {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, FullStateResponse::Unchanged)
    }

    pub fn into_full(self) -> Option<FullState> {
        match self {
            FullStateResponse::Full(full) => Some(full),
            FullStateResponse::Unchanged => None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct FullStateResponseRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unchanged: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<Hash>,
}

impl From<FullStateResponse> for FullStateResponseRepr {
    fn from(value: FullStateResponse) -> Self {
        match value {
            FullStateResponse::Unchanged => FullStateResponseRepr {
                unchanged: Some(true),
                state: None,
                version: None,
                hash: None,
            },
            FullStateResponse::Full(full) => FullStateResponseRepr {
                unchanged: None,
                state: Some(full.state),
                version: Some(full.version),
                hash: Some(full.hash),
            },
        }
    }
}

impl TryFrom<FullStateResponseRepr> for FullStateResponse {
    type Error = String;

    fn try_from(repr: FullStateResponseRepr) -> Result<Self, Self::Error> {
        if repr.unchanged == Some(true) {
            return Ok(FullStateResponse::Unchanged);
        }
        match (repr.state, repr.version, repr.hash) {
            (Some(state), Some(version), Some(hash)) => {
                Ok(FullStateResponse::Full(FullState {
                    state,
                    version,
                    hash,
                }))
            }
            _ => Err("full state response requires state, version, and hash".into()),
        }
    }
}

/// Lifecycle collaborator -> engine: the session is over.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnd {
    pub session_id: SessionId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Verb;
    use serde_json::json;

    #[test]
    fn state_update_uses_camel_case() {
        let update: StateUpdate = serde_json::from_value(json!({
            "requestId": "r-1",
            "sessionId": "s-1",
            "baseVersion": "0",
            "operations": [
                {"path": ["currentEncounter", "tokens"], "verb": "push", "value": {"id": "t1"}}
            ],
            "timestamp": 1700000000000u64
        }))
        .unwrap();
        assert_eq!(update.base_version, Version::ZERO);
        assert_eq!(update.operations[0].verb, Verb::Push);
        assert_eq!(update.session_id.as_str(), "s-1");
    }

    #[test]
    fn rejected_response_carries_current_pair() {
        let hash = Hash::of_bytes(b"state");
        let resp = StateUpdateResponse::rejected(ResponseError {
            code: ErrorCode::VersionConflict,
            message: "stale".into(),
            current_version: Some(Version::new(1)),
            current_hash: Some(hash),
        });
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], json!(false));
        assert_eq!(json["error"]["code"], json!("VERSION_CONFLICT"));
        assert_eq!(json["error"]["currentVersion"], json!("1"));
        assert_eq!(json["error"]["currentHash"], json!(hash.to_hex()));
        assert!(json.get("newVersion").is_none());
    }

    #[test]
    fn unchanged_response_has_no_payload() {
        let json = serde_json::to_value(FullStateResponse::Unchanged).unwrap();
        assert_eq!(json, json!({"unchanged": true}));
        let back: FullStateResponse = serde_json::from_value(json).unwrap();
        assert!(back.is_unchanged());
    }

    #[test]
    fn full_response_requires_all_fields() {
        let hash = Hash::of_bytes(b"x");
        let full = FullStateResponse::Full(FullState {
            state: Value::empty_map(),
            version: Version::new(3),
            hash,
        });
        let json = serde_json::to_value(&full).unwrap();
        assert_eq!(json["version"], json!("3"));
        assert_eq!(serde_json::from_value::<FullStateResponse>(json).unwrap(), full);

        let partial = json!({"state": {}, "version": "3"});
        assert!(serde_json::from_value::<FullStateResponse>(partial).is_err());
    }
}
