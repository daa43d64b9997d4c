//! Fan-out of accepted batches to session subscribers.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a queue that
//! is full means the subscriber fell behind, and it is dropped so it can
//! resynchronize through a full-state fetch instead of stalling the session.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use vtt_kernel::SessionSnapshot;
use vtt_types::{FullState, ParticipantId, StateUpdateBroadcast};

pub type SubscriberId = u64;

/// A live feed of accepted batches, starting right after `snapshot`.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub snapshot: FullState,
    updates: mpsc::Receiver<Arc<StateUpdateBroadcast>>,
}

impl Subscription {
    /// Next broadcast in apply order; `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<Arc<StateUpdateBroadcast>> {
        self.updates.recv().await
    }

    pub fn try_next(&mut self) -> Option<Arc<StateUpdateBroadcast>> {
        self.updates.try_recv().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Lagged,
    Closed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub delivered: usize,
    pub skipped: usize,
    pub dropped: usize,
}

struct Subscriber {
    id: SubscriberId,
    participant: ParticipantId,
    tx: mpsc::Sender<Arc<StateUpdateBroadcast>>,
}

pub(crate) struct BroadcastRouter {
    subscribers: Vec<Subscriber>,
    next_id: SubscriberId,
    queue_capacity: usize,
    echo_to_writer: bool,
}

impl BroadcastRouter {
    pub(crate) fn new(queue_capacity: usize, echo_to_writer: bool) -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 1,
            queue_capacity: queue_capacity.max(1),
            echo_to_writer,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn subscribe(&mut self, participant: ParticipantId, snapshot: FullState) -> Subscription {
        let (tx, updates) = mpsc::channel(self.queue_capacity);
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push(Subscriber {
            id,
            participant,
            tx,
        });
        Subscription {
            id,
            snapshot,
            updates,
        }
    }

    /// Deliver one accepted batch to every subscriber in registration order.
    pub(crate) fn publish(&mut self, writer: &ParticipantId, message: StateUpdateBroadcast) -> PublishStats {
        let message = Arc::new(message);
        let echo = self.echo_to_writer;
        let mut stats = PublishStats::default();
        self.subscribers.retain(|sub| {
            if !echo && sub.participant == *writer {
                stats.skipped += 1;
                return true;
            }
            match sub.tx.try_send(Arc::clone(&message)) {
                Ok(()) => {
                    stats.delivered += 1;
                    true
                }
                Err(err) => {
                    let reason = match err {
                        TrySendError::Full(_) => DropReason::Lagged,
                        TrySendError::Closed(_) => DropReason::Closed,
                    };
                    if reason == DropReason::Lagged {
                        tracing::warn!(
                            session = %message.session_id,
                            subscriber = sub.id,
                            participant = %sub.participant,
                            "subscriber lagged; dropping"
                        );
                    }
                    stats.dropped += 1;
                    false
                }
            }
        });
        stats
    }

    /// Drop subscribers that are no longer allowed to read the session.
    pub(crate) fn retain_readable(&mut self, snapshot: &SessionSnapshot) {
        self.subscribers.retain(|sub| snapshot.can_read(&sub.participant));
    }

    /// Close every subscription; receivers observe end-of-stream.
    pub(crate) fn close_all(&mut self) {
        self.subscribers.clear();
    }
}
