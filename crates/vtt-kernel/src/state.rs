use std::sync::Arc;

use vtt_cbor::Hash;
use vtt_types::{StateOperation, Value, Version};

use crate::error::{EngineError, OpFailure};
use crate::ops::apply_operation;
use crate::verify::{canonical_hash, verify_state};

pub const DEFAULT_MAX_OPS: usize = 1024;
pub const DEFAULT_MAX_PATH_DEPTH: usize = 64;

/// Bounds applied to every incoming batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_ops: usize,
    pub max_path_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_ops: DEFAULT_MAX_OPS,
            max_path_depth: DEFAULT_MAX_PATH_DEPTH,
        }
    }
}

/// Result of an accepted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub version: Version,
    pub hash: Hash,
}

/// Authoritative `(state, version, hash)` triple for one session.
///
/// The live tree sits behind an `Arc` so snapshots are cheap; batches are
/// applied to a private copy and swapped in only after every operation and
/// the new digest succeed.
#[derive(Debug, Clone)]
pub struct StateStore {
    state: Arc<Value>,
    version: Version,
    hash: Hash,
}

impl StateStore {
    /// Fresh store at version 0.
    pub fn new(initial: Value) -> Result<Self, EngineError> {
        ensure_root_map(&initial)?;
        let hash = canonical_hash(&initial)?;
        Ok(Self {
            state: Arc::new(initial),
            version: Version::ZERO,
            hash,
        })
    }

    /// Rebuild a store from persisted parts, rejecting a digest that does not match.
    pub fn restore(state: Value, version: Version, recorded: Hash) -> Result<Self, EngineError> {
        ensure_root_map(&state)?;
        let hash = verify_state(&state, recorded)?;
        Ok(Self {
            state: Arc::new(state),
            version,
            hash,
        })
    }

    pub fn state(&self) -> &Arc<Value> {
        &self.state
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Apply `operations` atomically on top of `base`.
    ///
    /// On any error the store is left exactly as it was.
    pub fn apply_batch(
        &mut self,
        base: Version,
        operations: &[StateOperation],
        limits: &Limits,
    ) -> Result<Applied, EngineError> {
        if base != self.version {
            return Err(EngineError::VersionConflict {
                base,
                current: self.version,
                current_hash: self.hash,
            });
        }
        check_batch_shape(operations, limits)?;

        let mut working = Value::clone(&self.state);
        for (index, op) in operations.iter().enumerate() {
            let depth = op.path.len();
            let outcome = if depth > limits.max_path_depth {
                Err(OpFailure::PathTooDeep {
                    depth,
                    max: limits.max_path_depth,
                })
            } else {
                apply_operation(&mut working, op)
            };
            outcome.map_err(|reason| EngineError::InvalidOperation {
                index,
                verb: op.verb,
                path: op.path.clone(),
                reason,
            })?;
        }

        let hash = canonical_hash(&working)?;
        let version = self
            .version
            .next()
            .ok_or_else(|| EngineError::TransactionFailed("version counter exhausted".into()))?;

        self.state = Arc::new(working);
        self.version = version;
        self.hash = hash;
        Ok(Applied { version, hash })
    }
}

/// Reject batches that are empty or larger than the configured limit.
pub fn check_batch_shape(operations: &[StateOperation], limits: &Limits) -> Result<(), EngineError> {
    if operations.is_empty() {
        return Err(EngineError::InvalidUpdate("operations must not be empty".into()));
    }
    if operations.len() > limits.max_ops {
        return Err(EngineError::InvalidUpdate(format!(
            "{} operations exceed limit {}",
            operations.len(),
            limits.max_ops
        )));
    }
    Ok(())
}

fn ensure_root_map(state: &Value) -> Result<(), EngineError> {
    match state {
        Value::Map(_) => Ok(()),
        other => Err(EngineError::InvalidUpdate(format!(
            "session state must be a map, got {}",
            other.kind()
        ))),
    }
}
