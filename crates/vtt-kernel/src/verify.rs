//! Integrity checks over the canonical encoding of a state tree.

use vtt_cbor::Hash;
use vtt_types::Value;

use crate::error::EngineError;

/// Digest of the canonical CBOR encoding of `state`.
///
/// Map keys are sorted at every depth and arrays keep their order, so
/// structurally equal trees hash identically however they were built.
pub fn canonical_hash(state: &Value) -> Result<Hash, EngineError> {
    Hash::of_cbor(state).map_err(|err| EngineError::TransactionFailed(format!("hash state: {err}")))
}

/// Recompute the digest of `state` and compare it with `recorded`.
pub fn verify_state(state: &Value, recorded: Hash) -> Result<Hash, EngineError> {
    let computed = canonical_hash(state)?;
    if computed != recorded {
        return Err(EngineError::HashMismatch { recorded, computed });
    }
    Ok(computed)
}
