use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Path, Value};

/// Patch verb applied at a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Set,
    Unset,
    Inc,
    Push,
    Pull,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Set => "set",
            Verb::Unset => "unset",
            Verb::Inc => "inc",
            Verb::Push => "push",
            Verb::Pull => "pull",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One path-addressed patch instruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateOperation {
    pub path: Path,
    pub verb: Verb,
    /// Absent for `unset`. An explicit JSON `null` decodes as `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
}

// Distinguishes a present `null` from an absent field; `default` covers absence.
fn present_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl StateOperation {
    pub fn set(path: Path, value: impl Into<Value>) -> Self {
        Self::with_value(path, Verb::Set, value.into())
    }

    pub fn unset(path: Path) -> Self {
        Self {
            path,
            verb: Verb::Unset,
            value: None,
        }
    }

    pub fn inc(path: Path, value: impl Into<Value>) -> Self {
        Self::with_value(path, Verb::Inc, value.into())
    }

    pub fn push(path: Path, value: impl Into<Value>) -> Self {
        Self::with_value(path, Verb::Push, value.into())
    }

    pub fn pull(path: Path, value: impl Into<Value>) -> Self {
        Self::with_value(path, Verb::Pull, value.into())
    }

    fn with_value(path: Path, verb: Verb, value: Value) -> Self {
        Self {
            path,
            verb,
            value: Some(value),
        }
    }
}
