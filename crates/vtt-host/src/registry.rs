use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use vtt_cbor::Hash;
use vtt_kernel::{SessionKernel, SessionSnapshot, SessionSpec};
use vtt_store::{DynStore, SessionRecord};
use vtt_types::{ParticipantId, SessionId, SessionStatus, Version};

use crate::config::HostConfig;
use crate::durable::{from_record, now_ms, to_record};
use crate::error::HostError;
use crate::session::{Ended, SessionHandle, SessionTasks, spawn_session};

/// Listing row for a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub writer: ParticipantId,
    pub status: SessionStatus,
    pub version: Version,
    pub hash: Hash,
    pub participants: usize,
}

struct Entry {
    handle: SessionHandle,
    tasks: SessionTasks,
}

/// Arena of independent sessions keyed by id.
///
/// The map lock only guards lookups and inserts; it is never held across an
/// await, and all per-session work happens inside that session's actor.
///
/// Sessions whose final ENDED record never reached the store stay behind as
/// tombstones, so a stale live record cannot bring them back. Lock order is
/// `sessions` before `tombstones`.
pub struct SessionRegistry {
    config: HostConfig,
    store: DynStore,
    sessions: Mutex<HashMap<SessionId, Entry>>,
    tombstones: Mutex<HashMap<SessionId, SessionSnapshot>>,
}

impl SessionRegistry {
    pub fn new(config: HostConfig, store: DynStore) -> Self {
        Self {
            config,
            store,
            sessions: Mutex::new(HashMap::new()),
            tombstones: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tombstones(&self) -> MutexGuard<'_, HashMap<SessionId, SessionSnapshot>> {
        self.tombstones.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `id` ended but its ENDED record is not yet stored.
    pub fn is_tombstoned(&self, id: &SessionId) -> bool {
        self.tombstones().contains_key(id)
    }

    /// Start a brand-new session. Fails if a live or persisted non-ended
    /// session already uses the id.
    pub async fn create_session(&self, spec: SessionSpec) -> Result<SessionHandle, HostError> {
        let id = spec.id.clone();
        if self.get(&id).is_some() {
            return Err(HostError::SessionExists(id));
        }
        if let Some(record) = self.load_record(&id).await? {
            // A tombstoned id has ended even though the stored record says otherwise.
            if !record.status.is_terminal() && !self.is_tombstoned(&id) {
                return Err(HostError::SessionExists(id));
            }
        }
        let kernel = SessionKernel::create(spec, self.config.limits)?;

        let mut sessions = self.sessions();
        if sessions
            .get(&id)
            .is_some_and(|entry| !entry.handle.snapshot().status.is_terminal())
        {
            return Err(HostError::SessionExists(id));
        }
        self.tombstones().remove(&id);
        let (handle, tasks) = spawn_session(kernel, Arc::clone(&self.store), &self.config);
        sessions.insert(
            id.clone(),
            Entry {
                handle: handle.clone(),
                tasks,
            },
        );
        tracing::info!(session = %id, writer = %handle.snapshot().writer, "session created");
        Ok(handle)
    }

    /// Handle for a live, non-ended session already in memory.
    pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions()
            .get(id)
            .filter(|entry| !entry.handle.snapshot().status.is_terminal())
            .map(|entry| entry.handle.clone())
    }

    /// Live handle, restoring the session from the store if needed.
    pub async fn open_session(&self, id: &SessionId) -> Result<SessionHandle, HostError> {
        if let Some(handle) = self.get(id) {
            return Ok(handle);
        }
        if self.is_tombstoned(id) {
            return Err(HostError::session_gone(id));
        }
        let record = self
            .load_record(id)
            .await?
            .filter(|record| !record.status.is_terminal())
            .ok_or_else(|| HostError::session_gone(id))?;
        let kernel = SessionKernel::restore(from_record(record), self.config.limits)?;

        let mut sessions = self.sessions();
        if let Some(entry) = sessions
            .get(id)
            .filter(|entry| !entry.handle.snapshot().status.is_terminal())
        {
            return Ok(entry.handle.clone());
        }
        if self.is_tombstoned(id) {
            return Err(HostError::session_gone(id));
        }
        let (handle, tasks) = spawn_session(kernel, Arc::clone(&self.store), &self.config);
        sessions.insert(
            id.clone(),
            Entry {
                handle: handle.clone(),
                tasks,
            },
        );
        tracing::info!(
            session = %id,
            version = %handle.snapshot().version,
            "session restored from store"
        );
        Ok(handle)
    }

    /// Summaries of live sessions, sorted by id.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut rows: Vec<SessionSummary> = self
            .sessions()
            .values()
            .map(|entry| {
                let snapshot = entry.handle.snapshot();
                SessionSummary {
                    session_id: snapshot.id,
                    writer: snapshot.writer,
                    status: snapshot.status,
                    version: snapshot.version,
                    hash: snapshot.hash,
                    participants: snapshot.participants.len(),
                }
            })
            .filter(|row| !row.status.is_terminal())
            .collect();
        rows.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        rows
    }

    /// Ids of every session the store holds, live or not.
    pub async fn list_stored(&self) -> Result<Vec<SessionId>, HostError> {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || store.list_sessions()).await??)
    }

    /// End a session, wait for its final sync, and drop it from the arena.
    pub async fn end_session(&self, id: &SessionId) -> Result<Ended, HostError> {
        let handle = self.open_session(id).await?;
        let ended = handle.end().await?;
        let entry = {
            let mut sessions = self.sessions();
            if !ended.persisted {
                tracing::warn!(session = %id, "ENDED record not stored; keeping tombstone");
                self.tombstones().insert(id.clone(), ended.snapshot.clone());
            }
            sessions.remove(id)
        };
        if let Some(entry) = entry {
            let _ = entry.tasks.actor.await;
            let _ = entry.tasks.sync.await;
        }
        Ok(ended)
    }

    /// Force a durable write for every live session, and retry the ENDED
    /// record of every tombstone.
    pub async fn flush_all(&self) -> Vec<(SessionId, Result<bool, HostError>)> {
        let handles: Vec<SessionHandle> = self
            .sessions()
            .values()
            .map(|entry| entry.handle.clone())
            .filter(|handle| !handle.snapshot().status.is_terminal())
            .collect();
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = handle.flush().await;
            if let Err(err) = &result {
                tracing::warn!(session = %handle.id(), "flush failed: {err}");
            }
            results.push((handle.id().clone(), result));
        }
        let ended: Vec<SessionSnapshot> = self.tombstones().values().cloned().collect();
        for snapshot in ended {
            let result = self.persist_ended(&snapshot).await;
            results.push((snapshot.id, result));
        }
        results
    }

    async fn persist_ended(&self, snapshot: &SessionSnapshot) -> Result<bool, HostError> {
        let record = to_record(snapshot, now_ms());
        let store = Arc::clone(&self.store);
        let written = tokio::task::spawn_blocking(move || store.put_session(&record))
            .await?
            .map_err(HostError::from);
        match written {
            Ok(()) => {
                self.tombstones().remove(&snapshot.id);
                tracing::info!(session = %snapshot.id, "ENDED record stored");
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(session = %snapshot.id, "ENDED record still not stored: {err}");
                Err(err)
            }
        }
    }

    /// Flush everything and release all sessions.
    pub async fn shutdown(&self) {
        let flushed = self.flush_all().await;
        let ok = flushed.iter().filter(|(_, r)| r.is_ok()).count();
        tracing::info!(sessions = flushed.len(), flushed = ok, "registry shut down");
        self.sessions().clear();
    }

    async fn load_record(&self, id: &SessionId) -> Result<Option<SessionRecord>, HostError> {
        let store = Arc::clone(&self.store);
        let id = id.clone();
        Ok(tokio::task::spawn_blocking(move || store.get_session(&id)).await??)
    }
}
