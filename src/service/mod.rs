//! Poll service
//!
//! Owns the single critical section of the system: every
//! load -> apply -> save -> broadcast cycle runs under one async mutex, so two
//! concurrent actions can never read the same pre-state. The document is
//! persisted before it is broadcast; a failed save means nobody sees the
//! change.

use crate::broadcast::{BroadcastError, Broadcaster, ConnectionId, ErrorShape, Subscription};
use crate::metrics::{outcome, PollMetrics};
use crate::polls::{evaluate, Action, Change, Document, Rejection};
use crate::store::{DocumentStore, StoreError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Service error types
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

impl ServiceError {
    /// Error object for the failing caller.
    pub fn to_shape(&self) -> ErrorShape {
        match self {
            ServiceError::Store(e) => ErrorShape::new("store_unavailable", e.to_string()),
            ServiceError::Broadcast(e) => ErrorShape::new("internal", e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Result of submitting one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The document changed, was persisted and was broadcast.
    Applied(Change),
    /// The action was a no-op; nothing was saved or sent.
    Ignored(Rejection),
}

impl Outcome {
    pub fn changed(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }
}

/// Serializes mutations of the shared document and fans results out.
pub struct PollService {
    store: Arc<dyn DocumentStore>,
    broadcaster: Arc<Broadcaster>,
    metrics: Arc<PollMetrics>,
    cycle: Mutex<()>,
    snapshot_on_connect: bool,
}

impl PollService {
    pub fn new(store: Arc<dyn DocumentStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            store,
            broadcaster,
            metrics: Arc::new(PollMetrics::new()),
            cycle: Mutex::new(()),
            snapshot_on_connect: true,
        }
    }

    /// Whether `attach` pushes the current document to a new channel.
    pub fn with_snapshot_on_connect(mut self, enabled: bool) -> Self {
        self.snapshot_on_connect = enabled;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PollMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn metrics(&self) -> &Arc<PollMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Run one full cycle for `action`.
    ///
    /// The document is always reloaded from the store first, so external
    /// edits to the durable copy are picked up.
    pub async fn submit(&self, action: &Action) -> Result<Outcome> {
        let _cycle = self.cycle.lock().await;
        let started = Instant::now();

        let result = self.run_cycle(action);
        self.metrics.cycle_duration.observe(started.elapsed());

        let label = match &result {
            Ok(Outcome::Applied(_)) => outcome::APPLIED,
            Ok(Outcome::Ignored(_)) => outcome::IGNORED,
            Err(_) => outcome::FAILED,
        };
        self.metrics.actions.inc(&[action.kind(), label]);
        result
    }

    fn run_cycle(&self, action: &Action) -> Result<Outcome> {
        let mut document = self.load()?;

        let change = match evaluate(&mut document, action) {
            Ok(change) => change,
            Err(rejection) => {
                debug!(kind = action.kind(), reason = %rejection, "action ignored");
                return Ok(Outcome::Ignored(rejection));
            }
        };

        if let Err(e) = self.store.save(&document) {
            self.metrics.store_failures.inc();
            error!(
                kind = action.kind(),
                store = %self.store.describe(),
                error = %e,
                "failed to persist poll data; change discarded"
            );
            return Err(e.into());
        }

        let fanout = self.broadcaster.broadcast_all(&document)?;
        self.metrics.broadcasts.inc();
        self.metrics.dropped_channels.inc_by(fanout.dropped as u64);
        self.refresh_channel_gauge();

        info!(
            kind = action.kind(),
            subject = action.subject(),
            change = ?change,
            recipients = fanout.delivered,
            "action applied"
        );
        Ok(Outcome::Applied(change))
    }

    /// Current document, read under the cycle lock.
    pub async fn snapshot(&self) -> Result<Document> {
        let _cycle = self.cycle.lock().await;
        self.load()
    }

    /// Register a channel. When snapshots are enabled the current document is
    /// queued for it before any later broadcast can be.
    pub async fn attach(&self, peer: impl Into<String>) -> Result<Subscription> {
        let _cycle = self.cycle.lock().await;
        let subscription = self.broadcaster.register(peer);
        self.refresh_channel_gauge();

        if self.snapshot_on_connect {
            let document = match self.load() {
                Ok(document) => document,
                Err(e) => {
                    self.broadcaster.unregister(subscription.id);
                    self.refresh_channel_gauge();
                    return Err(e);
                }
            };
            if !self.broadcaster.deliver(subscription.id, &document)? {
                self.record_dropped_channel();
            }
        }
        Ok(subscription)
    }

    /// Unregister a channel; safe to call more than once.
    pub fn detach(&self, id: ConnectionId) {
        if self.broadcaster.unregister(id) {
            self.refresh_channel_gauge();
        }
    }

    /// Send an error object to one channel only.
    pub fn reply_error(&self, id: ConnectionId, error: &ErrorShape) {
        match self.broadcaster.deliver_error(id, error) {
            Ok(true) => {}
            Ok(false) => self.record_dropped_channel(),
            Err(e) => error!(connection_id = %id, error = %e, "failed to encode error frame"),
        }
    }

    /// Count an inbound message that never decoded into an action.
    pub fn record_malformed(&self) {
        self.metrics.actions.inc(&["unknown", outcome::MALFORMED]);
    }

    fn load(&self) -> Result<Document> {
        self.store.load().map_err(|e| {
            self.metrics.store_failures.inc();
            error!(store = %self.store.describe(), error = %e, "failed to load poll data");
            ServiceError::from(e)
        })
    }

    fn record_dropped_channel(&self) {
        self.metrics.dropped_channels.inc();
        self.refresh_channel_gauge();
    }

    fn refresh_channel_gauge(&self) {
        self.metrics
            .open_channels
            .set(self.broadcaster.connection_count() as u64);
    }
}
