//! Durable session documents: a full-overwrite record per session plus the
//! entity rows exploded from it, with filesystem and in-memory backends.

mod entities;
mod fs_store;
mod mem_store;
mod record;

pub use entities::{ENTITY_COLLECTIONS, extract_entities};
pub use fs_store::FsStore;
pub use mem_store::MemStore;
pub use record::{EntityKind, EntityRecord, SessionRecord};

use std::{io, path::PathBuf, sync::Arc};

use vtt_cbor::Hash;
use vtt_types::SessionId;

pub type StoreResult<T> = Result<T, StoreError>;
pub type DynStore = Arc<dyn DocumentStore>;

/// Persistent home of session snapshots.
///
/// Every write replaces the session's previous record and entity rows
/// wholesale; there are no incremental updates.
pub trait DocumentStore: Send + Sync {
    fn put_session(&self, record: &SessionRecord) -> StoreResult<()>;
    fn get_session(&self, id: &SessionId) -> StoreResult<Option<SessionRecord>>;
    fn list_sessions(&self) -> StoreResult<Vec<SessionId>>;
    /// Returns whether anything was removed.
    fn delete_session(&self, id: &SessionId) -> StoreResult<bool>;
    fn get_entities(&self, id: &SessionId) -> StoreResult<Vec<EntityRecord>>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CBOR serialization error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    #[error("hash mismatch for session '{session}': recorded {recorded}, computed {computed}")]
    HashMismatch {
        session: SessionId,
        recorded: Hash,
        computed: Hash,
    },
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source: err,
    }
}

/// Decode a stored record and check its state against the recorded digest.
pub(crate) fn decode_verified(bytes: &[u8]) -> StoreResult<SessionRecord> {
    let record: SessionRecord = vtt_cbor::from_canonical_cbor(bytes)?;
    let computed = Hash::of_cbor(&record.state)?;
    if computed != record.hash {
        return Err(StoreError::HashMismatch {
            session: record.session_id,
            recorded: record.hash,
            computed,
        });
    }
    Ok(record)
}
