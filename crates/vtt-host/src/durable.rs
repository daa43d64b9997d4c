//! Durable sync scheduler: copies session snapshots into the document store
//! off the mutation path.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use vtt_kernel::SessionSnapshot;
use vtt_store::{DynStore, SessionRecord};
use vtt_types::{ParticipantId, SessionStatus, Value, Version};

use crate::error::HostError;

const FINAL_ATTEMPTS: u32 = 3;
const FINAL_RETRY_DELAY: Duration = Duration::from_millis(100);

pub(crate) type SyncAck = oneshot::Sender<Result<bool, HostError>>;

/// Reasons to write outside the regular timer.
pub(crate) enum SyncTrigger {
    /// Writer dropped; persist if anything changed.
    WriterDisconnected,
    /// Explicit request; always writes.
    Flush(SyncAck),
    /// Session ended; always writes, retries, then the task exits.
    Final(SyncAck),
}

/// Everything a record carries that can change without a new version.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SyncMarker {
    version: Version,
    status: SessionStatus,
    participants: Vec<ParticipantId>,
}

impl SyncMarker {
    fn of(snapshot: &SessionSnapshot) -> Self {
        Self {
            version: snapshot.version,
            status: snapshot.status,
            participants: snapshot.participants.clone(),
        }
    }
}

pub(crate) struct DurableSync {
    store: DynStore,
    snapshots: watch::Receiver<SessionSnapshot>,
    triggers: mpsc::Receiver<SyncTrigger>,
    interval: Duration,
    last_synced: Option<SyncMarker>,
}

impl DurableSync {
    pub(crate) fn new(
        store: DynStore,
        snapshots: watch::Receiver<SessionSnapshot>,
        triggers: mpsc::Receiver<SyncTrigger>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            snapshots,
            triggers,
            interval,
            last_synced: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.sync(false, "interval").await;
                }
                trigger = self.triggers.recv() => match trigger {
                    Some(SyncTrigger::WriterDisconnected) => {
                        let _ = self.sync(false, "writer-disconnect").await;
                    }
                    Some(SyncTrigger::Flush(ack)) => {
                        let _ = ack.send(self.sync(true, "flush").await);
                    }
                    Some(SyncTrigger::Final(ack)) => {
                        let _ = ack.send(self.final_sync().await);
                        break;
                    }
                    None => {
                        // Actor is gone without an end; keep whatever changed.
                        let _ = self.sync(false, "detach").await;
                        break;
                    }
                },
            }
        }
    }

    async fn final_sync(&mut self) -> Result<bool, HostError> {
        let mut attempt = 1;
        loop {
            match self.sync(true, "end").await {
                Ok(written) => return Ok(written),
                Err(err) if attempt >= FINAL_ATTEMPTS => {
                    let snapshot = self.snapshots.borrow().clone();
                    tracing::error!(
                        session = %snapshot.id,
                        version = %snapshot.version,
                        "final sync gave up after {attempt} attempts: {err}"
                    );
                    return Err(err);
                }
                Err(_) => {
                    time::sleep(FINAL_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Write the latest snapshot. Without `force`, an unchanged session is skipped.
    async fn sync(&mut self, force: bool, reason: &'static str) -> Result<bool, HostError> {
        let snapshot = self.snapshots.borrow().clone();
        let marker = SyncMarker::of(&snapshot);
        if !force && self.last_synced.as_ref() == Some(&marker) {
            return Ok(false);
        }
        let record = to_record(&snapshot, now_ms());
        let store = Arc::clone(&self.store);
        let outcome = tokio::task::spawn_blocking(move || store.put_session(&record))
            .await
            .map_err(HostError::from)
            .and_then(|res| res.map_err(HostError::from));
        match outcome {
            Ok(()) => {
                self.last_synced = Some(marker);
                tracing::debug!(
                    session = %snapshot.id,
                    version = %snapshot.version,
                    status = %snapshot.status,
                    reason,
                    "session synced"
                );
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(
                    session = %snapshot.id,
                    version = %snapshot.version,
                    reason,
                    "session sync failed: {err}"
                );
                Err(err)
            }
        }
    }
}

pub fn to_record(snapshot: &SessionSnapshot, synced_at_ms: u64) -> SessionRecord {
    SessionRecord {
        session_id: snapshot.id.clone(),
        writer: snapshot.writer.clone(),
        participants: snapshot.participants.clone(),
        status: snapshot.status,
        version: snapshot.version,
        hash: snapshot.hash,
        state: Value::clone(&snapshot.state),
        synced_at_ms,
    }
}

pub fn from_record(record: SessionRecord) -> SessionSnapshot {
    SessionSnapshot {
        id: record.session_id,
        writer: record.writer,
        participants: record.participants,
        status: record.status,
        state: Arc::new(record.state),
        version: record.version,
        hash: record.hash,
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtt_kernel::{Limits, SessionKernel, SessionSpec};
    use vtt_store::{DocumentStore, MemStore};
    use vtt_types::{ParticipantId, SessionId};

    fn snapshot() -> SessionSnapshot {
        let spec = SessionSpec::new(SessionId::from("s1"), ParticipantId::from("gm"));
        SessionKernel::create(spec, Limits::default())
            .unwrap()
            .snapshot()
    }

    #[test]
    fn record_conversion_round_trips() {
        let snap = snapshot();
        let back = from_record(to_record(&snap, 5));
        assert_eq!(back, snap);
    }

    #[tokio::test]
    async fn interval_writes_only_when_changed() {
        let store = Arc::new(MemStore::new());
        let (snap_tx, snap_rx) = watch::channel(snapshot());
        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        let mut sync = DurableSync::new(store.clone(), snap_rx, trigger_rx, Duration::from_secs(60));

        assert!(sync.sync(false, "interval").await.unwrap());
        assert!(!sync.sync(false, "interval").await.unwrap());

        let mut changed = snapshot();
        changed.status = SessionStatus::Active;
        snap_tx.send_replace(changed);
        assert!(sync.sync(false, "interval").await.unwrap());
        assert!(sync.sync(true, "flush").await.unwrap());

        let stored = store.get_session(&SessionId::from("s1")).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        drop(trigger_tx);
    }

    #[tokio::test]
    async fn participant_change_alone_is_written() {
        let store = Arc::new(MemStore::new());
        let (snap_tx, snap_rx) = watch::channel(snapshot());
        let (_trigger_tx, trigger_rx) = mpsc::channel(4);
        let mut sync = DurableSync::new(store.clone(), snap_rx, trigger_rx, Duration::from_secs(60));

        assert!(sync.sync(false, "interval").await.unwrap());

        let mut changed = snapshot();
        changed.participants = vec![ParticipantId::from("p1")];
        snap_tx.send_replace(changed);
        assert!(sync.sync(false, "interval").await.unwrap());
        assert!(!sync.sync(false, "interval").await.unwrap());

        let stored = store.get_session(&SessionId::from("s1")).unwrap().unwrap();
        assert_eq!(stored.participants, vec![ParticipantId::from("p1")]);
        assert_eq!(stored.version, Version::ZERO);
    }

    #[tokio::test]
    async fn final_trigger_writes_and_stops() {
        let store = Arc::new(MemStore::new());
        let (_snap_tx, snap_rx) = watch::channel(snapshot());
        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        let task = tokio::spawn(
            DurableSync::new(store.clone(), snap_rx, trigger_rx, Duration::from_secs(60)).run(),
        );

        let (ack_tx, ack_rx) = oneshot::channel();
        assert!(trigger_tx.send(SyncTrigger::Final(ack_tx)).await.is_ok());
        assert!(ack_rx.await.unwrap().unwrap());
        task.await.unwrap();
        assert_eq!(store.list_sessions().unwrap(), vec![SessionId::from("s1")]);
    }
}
