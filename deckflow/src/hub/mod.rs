//! Fan-out of progress events to connected clients.
//!
//! The hub is an explicit instance with an injected store, created on
//! service start and drained on shutdown. Delivery is best-effort: a
//! disconnected client simply misses events and reconciles by polling the
//! job store. The `job id -> connection set` map is the only shared
//! mutable structure here.

use crate::core::ProgressEvent;
use crate::errors::DeckflowError;
use crate::store::JobStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

struct Connection {
    id: Uuid,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

/// A live client subscription to one job's events.
///
/// Dropping the subscription disconnects the client; the hub prunes the
/// dead connection on the next publish.
pub struct Subscription {
    /// Subscription id, used for explicit unsubscribe.
    pub id: Uuid,
    /// The job this subscription follows.
    pub job_id: Uuid,
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl Subscription {
    /// Waits for the next event. Returns `None` once the hub side is gone.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("job_id", &self.job_id)
            .finish()
    }
}

/// Delivers progress events to subscribers of each job.
pub struct NotificationHub {
    store: Arc<dyn JobStore>,
    connections: DashMap<Uuid, Vec<Connection>>,
}

impl NotificationHub {
    /// Creates a hub reading synthetic snapshots from the given store.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            connections: DashMap::new(),
        }
    }

    /// Registers a push channel for a job and immediately delivers a
    /// synthetic current-state event, so a client joining late is not stuck
    /// waiting for the next real transition.
    ///
    /// The connection is registered before the snapshot is read. A
    /// transition committed while the read is in flight then lands in the
    /// channel ahead of the snapshot instead of being lost; the
    /// subscriber's version gating turns that reordering into a no-op.
    pub async fn subscribe(&self, job_id: Uuid) -> Result<Subscription, DeckflowError> {
        let (tx, receiver) = mpsc::unbounded_channel();
        let id = crate::utils::generate_uuid();

        self.connections.entry(job_id).or_default().push(Connection {
            id,
            tx: tx.clone(),
        });

        let job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(err) => {
                self.unsubscribe(job_id, id);
                return Err(err);
            }
        };
        let _ = tx.send(job.snapshot().to_event());

        debug!(job_id = %job_id, subscription_id = %id, "client subscribed");
        Ok(Subscription {
            id,
            job_id,
            receiver,
        })
    }

    /// Removes a connection. Idempotent.
    pub fn unsubscribe(&self, job_id: Uuid, subscription_id: Uuid) {
        if let Some(mut entry) = self.connections.get_mut(&job_id) {
            entry.retain(|c| c.id != subscription_id);
        }
    }

    /// Fans the event out to every subscriber of its job, pruning
    /// connections whose receiver is gone.
    pub fn publish(&self, event: &ProgressEvent) {
        if let Some(mut entry) = self.connections.get_mut(&event.job_id) {
            entry.retain(|c| {
                let delivered = c.tx.send(event.clone()).is_ok();
                if !delivered {
                    debug!(
                        job_id = %event.job_id,
                        subscription_id = %c.id,
                        "pruning dead subscription"
                    );
                }
                delivered
            });
        }
    }

    /// Number of live connections for a job.
    #[must_use]
    pub fn connection_count(&self, job_id: Uuid) -> usize {
        self.connections
            .get(&job_id)
            .map_or(0, |entry| entry.len())
    }

    /// Drops every connection, closing all subscriber channels. Called on
    /// service shutdown.
    pub fn drain(&self) {
        self.connections.clear();
    }
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("jobs_with_subscribers", &self.connections.len())
            .finish()
    }
}
