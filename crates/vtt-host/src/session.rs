//! Per-session actor and its cloneable handle.
//!
//! The actor task is the only owner of a [`SessionKernel`]; every mutation
//! funnels through its mailbox, so batches for one session are applied one at
//! a time while unrelated sessions run in parallel. After each change the
//! actor publishes an immutable snapshot on a `watch` channel that readers and
//! the durable sync task consume without touching the mailbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use vtt_kernel::{Applied, EngineError, SessionKernel, SessionSnapshot, reconcile};
use vtt_store::DynStore;
use vtt_types::{
    ErrorCode, FullState, FullStateRequest, FullStateResponse, ParticipantId, ResponseError,
    SessionId, SessionStatus, StateUpdate, StateUpdateBroadcast, StateUpdateResponse, Value,
};

use crate::broadcast::{BroadcastRouter, Subscription};
use crate::config::HostConfig;
use crate::durable::{DurableSync, SyncTrigger};
use crate::error::HostError;

const SYNC_TRIGGER_CAPACITY: usize = 8;

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;
type FinalSync = oneshot::Receiver<Result<bool, HostError>>;

enum SessionCmd {
    Submit {
        submitter: ParticipantId,
        update: StateUpdate,
        resp: Reply<Applied>,
    },
    FullState {
        requester: ParticipantId,
        request: FullStateRequest,
        resp: Reply<FullStateResponse>,
    },
    Subscribe {
        participant: ParticipantId,
        resp: Reply<Subscription>,
    },
    WriterConnected {
        who: ParticipantId,
        resp: Reply<SessionStatus>,
    },
    WriterDisconnected {
        resp: Reply<SessionStatus>,
    },
    SetParticipants {
        participants: Vec<ParticipantId>,
        resp: Reply<()>,
    },
    End {
        resp: Reply<(SessionSnapshot, FinalSync)>,
    },
}

/// Outcome of ending a session.
#[derive(Debug, Clone)]
pub struct Ended {
    pub snapshot: SessionSnapshot,
    /// Whether the forced final sync reached the store.
    pub persisted: bool,
}

pub(crate) struct SessionTasks {
    pub(crate) actor: JoinHandle<()>,
    pub(crate) sync: JoinHandle<()>,
}

/// Start the actor and durable sync tasks for `kernel`.
pub(crate) fn spawn_session(
    kernel: SessionKernel,
    store: DynStore,
    config: &HostConfig,
) -> (SessionHandle, SessionTasks) {
    let id = kernel.id().clone();
    let (snapshot_tx, snapshot_rx) = watch::channel(kernel.snapshot());
    let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity.max(1));
    let (sync_tx, sync_rx) = mpsc::channel(SYNC_TRIGGER_CAPACITY);

    let durable = DurableSync::new(store, snapshot_rx.clone(), sync_rx, config.sync_interval);
    let actor = SessionActor {
        kernel,
        router: BroadcastRouter::new(config.subscriber_queue, config.echo_to_writer),
        snapshots: snapshot_tx,
        sync: sync_tx.clone(),
        mailbox: mailbox_rx,
    };
    let tasks = SessionTasks {
        sync: tokio::spawn(durable.run()),
        actor: tokio::spawn(actor.run()),
    };
    let handle = SessionHandle {
        id,
        mailbox: mailbox_tx,
        snapshots: snapshot_rx,
        sync: sync_tx,
        in_flight: Arc::new(AtomicBool::new(false)),
        reject_overlapping: config.reject_overlapping,
    };
    (handle, tasks)
}

struct SessionActor {
    kernel: SessionKernel,
    router: BroadcastRouter,
    snapshots: watch::Sender<SessionSnapshot>,
    sync: mpsc::Sender<SyncTrigger>,
    mailbox: mpsc::Receiver<SessionCmd>,
}

impl SessionActor {
    async fn run(mut self) {
        tracing::debug!(session = %self.kernel.id(), "session actor started");
        while let Some(cmd) = self.mailbox.recv().await {
            if self.handle(cmd).await {
                break;
            }
        }
        tracing::debug!(session = %self.kernel.id(), "session actor stopped");
    }

    /// Returns true once the session has ended.
    async fn handle(&mut self, cmd: SessionCmd) -> bool {
        match cmd {
            SessionCmd::Submit {
                submitter,
                update,
                resp,
            } => {
                let result = self.kernel.submit(&submitter, &update);
                if let Ok(applied) = &result {
                    self.publish_snapshot();
                    let broadcast = StateUpdateBroadcast {
                        session_id: update.session_id,
                        operations: update.operations,
                        new_version: applied.version,
                        new_hash: applied.hash,
                    };
                    let writer = self.kernel.writer().clone();
                    let stats = self.router.publish(&writer, broadcast);
                    tracing::trace!(
                        session = %self.kernel.id(),
                        version = %applied.version,
                        delivered = stats.delivered,
                        dropped = stats.dropped,
                        subscribers = self.router.len(),
                        "broadcast published"
                    );
                }
                let _ = resp.send(result);
            }
            SessionCmd::FullState {
                requester,
                request,
                resp,
            } => {
                let _ = resp.send(self.kernel.full_state(&requester, &request));
            }
            SessionCmd::Subscribe { participant, resp } => {
                let snapshot = self.kernel.snapshot();
                let request = FullStateRequest::new(snapshot.id.clone());
                // Same permission and liveness checks as a full-state fetch.
                let result = reconcile(&snapshot, &participant, &request).map(|_| {
                    let full = FullState {
                        state: Value::clone(&snapshot.state),
                        version: snapshot.version,
                        hash: snapshot.hash,
                    };
                    self.router.subscribe(participant, full)
                });
                let _ = resp.send(result);
            }
            SessionCmd::WriterConnected { who, resp } => {
                let result = self.kernel.writer_connected(&who);
                if result.is_ok() {
                    self.publish_snapshot();
                }
                let _ = resp.send(result);
            }
            SessionCmd::WriterDisconnected { resp } => {
                let result = self.kernel.writer_disconnected();
                if result.is_ok() {
                    self.publish_snapshot();
                    // A full queue already holds a pending sync; coalesce.
                    let _ = self.sync.try_send(SyncTrigger::WriterDisconnected);
                }
                let _ = resp.send(result);
            }
            SessionCmd::SetParticipants { participants, resp } => {
                let result = self.kernel.set_participants(participants);
                if result.is_ok() {
                    self.publish_snapshot();
                    self.router.retain_readable(&self.kernel.snapshot());
                }
                let _ = resp.send(result);
            }
            SessionCmd::End { resp } => match self.kernel.end() {
                Ok(snapshot) => {
                    self.snapshots.send_replace(snapshot.clone());
                    self.router.close_all();
                    let (ack_tx, ack_rx) = oneshot::channel();
                    let _ = self.sync.send(SyncTrigger::Final(ack_tx)).await;
                    tracing::info!(
                        session = %snapshot.id,
                        version = %snapshot.version,
                        "session ended"
                    );
                    let _ = resp.send(Ok((snapshot, ack_rx)));
                    return true;
                }
                Err(err) => {
                    let _ = resp.send(Err(err));
                }
            },
        }
        false
    }

    fn publish_snapshot(&self) {
        self.snapshots.send_replace(self.kernel.snapshot());
    }
}

/// Cloneable front door to one session actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    mailbox: mpsc::Sender<SessionCmd>,
    snapshots: watch::Receiver<SessionSnapshot>,
    sync: mpsc::Sender<SyncTrigger>,
    in_flight: Arc<AtomicBool>,
    reject_overlapping: bool,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("reject_overlapping", &self.reject_overlapping)
            .finish()
    }
}

/// Clears the in-flight flag even if the submitting future is dropped.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> SessionCmd) -> Result<T, HostError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(make(tx))
            .await
            .map_err(|_| HostError::session_gone(&self.id))?;
        let result = rx.await.map_err(|_| HostError::session_gone(&self.id))?;
        Ok(result?)
    }

    /// Submit a writer batch and return the wire response.
    pub async fn submit(&self, submitter: ParticipantId, update: StateUpdate) -> StateUpdateResponse {
        let _guard = if self.reject_overlapping {
            if self.in_flight.swap(true, Ordering::AcqRel) {
                return self.overlap_rejection(&update);
            }
            Some(InFlight(Arc::clone(&self.in_flight)))
        } else {
            None
        };
        let request_id = update.request_id.clone();
        match self
            .request(|resp| SessionCmd::Submit {
                submitter,
                update,
                resp,
            })
            .await
        {
            Ok(applied) => StateUpdateResponse::accepted(applied.version, applied.hash),
            Err(err) => {
                tracing::debug!(session = %self.id, request = %request_id, "update rejected: {err}");
                StateUpdateResponse::rejected(err.to_response_error())
            }
        }
    }

    fn overlap_rejection(&self, update: &StateUpdate) -> StateUpdateResponse {
        let snapshot = self.snapshot();
        tracing::warn!(
            session = %self.id,
            request = %update.request_id,
            "overlapping update rejected"
        );
        StateUpdateResponse::rejected(ResponseError {
            code: ErrorCode::VersionConflict,
            message: format!(
                "another update for session '{}' is still in flight",
                self.id
            ),
            current_version: Some(snapshot.version),
            current_hash: Some(snapshot.hash),
        })
    }

    /// Fetch state, answering a matching cache straight from the latest snapshot.
    pub async fn full_state(
        &self,
        requester: ParticipantId,
        request: FullStateRequest,
    ) -> Result<FullStateResponse, HostError> {
        let snapshot = self.snapshot();
        if request.cached_version == Some(snapshot.version)
            && request.cached_hash == Some(snapshot.hash)
        {
            return Ok(reconcile(&snapshot, &requester, &request)?);
        }
        self.request(|resp| SessionCmd::FullState {
            requester,
            request,
            resp,
        })
        .await
    }

    /// Subscribe to broadcasts; the returned snapshot is exactly the state the
    /// first delivered broadcast applies to.
    pub async fn subscribe(&self, participant: ParticipantId) -> Result<Subscription, HostError> {
        self.request(|resp| SessionCmd::Subscribe { participant, resp })
            .await
    }

    pub async fn writer_connected(&self, who: ParticipantId) -> Result<SessionStatus, HostError> {
        self.request(|resp| SessionCmd::WriterConnected { who, resp })
            .await
    }

    pub async fn writer_disconnected(&self) -> Result<SessionStatus, HostError> {
        self.request(|resp| SessionCmd::WriterDisconnected { resp })
            .await
    }

    pub async fn set_participants(&self, participants: Vec<ParticipantId>) -> Result<(), HostError> {
        self.request(|resp| SessionCmd::SetParticipants { participants, resp })
            .await
    }

    /// Force a durable write of the latest published snapshot.
    ///
    /// Goes straight to the sync task, so a slow store never holds up the
    /// actor's mailbox.
    pub async fn flush(&self) -> Result<bool, HostError> {
        let (tx, rx) = oneshot::channel();
        self.sync
            .send(SyncTrigger::Flush(tx))
            .await
            .map_err(|_| HostError::session_gone(&self.id))?;
        rx.await.map_err(|_| HostError::session_gone(&self.id))?
    }

    /// End the session and wait for its final durable sync.
    pub async fn end(&self) -> Result<Ended, HostError> {
        let (snapshot, final_sync) = self.request(|resp| SessionCmd::End { resp }).await?;
        let persisted = match final_sync.await {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                tracing::warn!(session = %self.id, "final sync failed: {err}");
                false
            }
            Err(_) => false,
        };
        Ok(Ended {
            snapshot,
            persisted,
        })
    }
}
