//! Session Broadcaster
//!
//! Tracks the open persistent channels and fans serialized documents out to
//! them. Each channel is an unbounded queue drained by that connection's
//! writer task, so enqueueing never blocks and per-channel order is the
//! enqueue order.
//!
//! Delivery is best-effort: a channel whose queue is closed is unregistered
//! on the spot and the fan-out carries on with the rest.

use crate::polls::Document;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Identifier assigned to a channel on registration.
pub type ConnectionId = Uuid;

/// One serialized outbound message, shared by every recipient.
pub type Frame = Arc<str>;

/// Broadcaster error types
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Lifecycle of a persistent channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Upgrade accepted, not yet registered.
    Connecting,
    /// Registered; receives broadcasts.
    Open,
    /// Unregistered; no further deliveries.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Error object sent to a single channel: `{"error": {"code", "message"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorShape {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// Receiving half handed to the connection that registered.
#[derive(Debug)]
pub struct Subscription {
    pub id: ConnectionId,
    pub frames: mpsc::UnboundedReceiver<Frame>,
}

/// Public view of an open channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: String,
    pub opened_at: DateTime<Utc>,
}

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fanout {
    pub delivered: usize,
    pub dropped: usize,
}

struct Connection {
    peer: String,
    opened_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<Frame>,
}

/// The set of open channels.
#[derive(Default)]
pub struct Broadcaster {
    connections: Mutex<HashMap<ConnectionId, Connection>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel to the active set (Connecting -> Open).
    pub fn register(&self, peer: impl Into<String>) -> Subscription {
        let id = Uuid::new_v4();
        let peer = peer.into();
        let (sender, frames) = mpsc::unbounded_channel();

        let mut connections = self.connections.lock();
        connections.insert(
            id,
            Connection {
                peer: peer.clone(),
                opened_at: Utc::now(),
                sender,
            },
        );
        info!(
            connection_id = %id,
            peer = %peer,
            state = %ConnectionState::Open,
            active = connections.len(),
            "channel registered"
        );
        Subscription { id, frames }
    }

    /// Remove a channel (Open -> Closed). Returns whether it was still open;
    /// calling it again is harmless.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.lock();
        match connections.remove(&id) {
            Some(connection) => {
                info!(
                    connection_id = %id,
                    peer = %connection.peer,
                    state = %ConnectionState::Closed,
                    active = connections.len(),
                    "channel unregistered"
                );
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        if self.connections.lock().contains_key(&id) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Open channels, oldest first.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> = self
            .connections
            .lock()
            .iter()
            .map(|(id, c)| ConnectionInfo {
                id: *id,
                peer: c.peer.clone(),
                opened_at: c.opened_at,
            })
            .collect();
        infos.sort_by_key(|info| info.opened_at);
        infos
    }

    /// Send the document to exactly one channel. Returns whether it was
    /// enqueued; a closed channel is unregistered.
    pub fn deliver(&self, id: ConnectionId, document: &Document) -> Result<bool, BroadcastError> {
        let frame = encode(document)?;
        Ok(self.deliver_frame(id, frame))
    }

    /// Send an error object to exactly one channel.
    pub fn deliver_error(
        &self,
        id: ConnectionId,
        error: &ErrorShape,
    ) -> Result<bool, BroadcastError> {
        let frame = encode(error)?;
        Ok(self.deliver_frame(id, frame))
    }

    /// Serialize the document once and enqueue it on every open channel.
    pub fn broadcast_all(&self, document: &Document) -> Result<Fanout, BroadcastError> {
        let frame = encode(document)?;
        Ok(self.broadcast_frame(frame))
    }

    pub fn deliver_frame(&self, id: ConnectionId, frame: Frame) -> bool {
        let mut connections = self.connections.lock();
        let Some(connection) = connections.get(&id) else {
            debug!(connection_id = %id, "deliver to closed channel skipped");
            return false;
        };
        if connection.sender.send(frame).is_ok() {
            return true;
        }
        if let Some(connection) = connections.remove(&id) {
            info!(
                connection_id = %id,
                peer = %connection.peer,
                "dropping channel after failed delivery"
            );
        }
        false
    }

    pub fn broadcast_frame(&self, frame: Frame) -> Fanout {
        let mut fanout = Fanout::default();
        let mut connections = self.connections.lock();
        connections.retain(|id, connection| {
            if connection.sender.send(Arc::clone(&frame)).is_ok() {
                fanout.delivered += 1;
                true
            } else {
                fanout.dropped += 1;
                info!(
                    connection_id = %id,
                    peer = %connection.peer,
                    "dropping channel after failed broadcast"
                );
                false
            }
        });
        debug!(
            delivered = fanout.delivered,
            dropped = fanout.dropped,
            bytes = frame.len(),
            "broadcast complete"
        );
        fanout
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Frame, BroadcastError> {
    Ok(Arc::from(serde_json::to_string(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polls::{apply, Action};

    fn sample_document() -> Document {
        apply(Document::new(), &Action::new_subject("colors")).0
    }

    #[test]
    fn test_register_and_unregister() {
        let broadcaster = Broadcaster::new();
        let sub = broadcaster.register("127.0.0.1:5000");
        assert_eq!(broadcaster.connection_count(), 1);
        assert_eq!(broadcaster.state(sub.id), ConnectionState::Open);

        assert!(broadcaster.unregister(sub.id));
        assert_eq!(broadcaster.connection_count(), 0);
        assert_eq!(broadcaster.state(sub.id), ConnectionState::Closed);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let broadcaster = Broadcaster::new();
        let sub = broadcaster.register("peer");
        assert!(broadcaster.unregister(sub.id));
        assert!(!broadcaster.unregister(sub.id));
        assert!(!broadcaster.unregister(Uuid::new_v4()));
    }

    #[test]
    fn test_broadcast_reaches_every_channel_with_same_bytes() {
        let broadcaster = Broadcaster::new();
        let mut a = broadcaster.register("a");
        let mut b = broadcaster.register("b");

        let fanout = broadcaster.broadcast_all(&sample_document()).unwrap();
        assert_eq!(fanout, Fanout { delivered: 2, dropped: 0 });

        let frame_a = a.frames.try_recv().unwrap();
        let frame_b = b.frames.try_recv().unwrap();
        assert!(Arc::ptr_eq(&frame_a, &frame_b));
        let decoded: Document = serde_json::from_str(&frame_a).unwrap();
        assert_eq!(decoded, sample_document());
    }

    #[test]
    fn test_broadcast_drops_dead_channel_and_continues() {
        let broadcaster = Broadcaster::new();
        let dead = broadcaster.register("dead");
        let mut alive = broadcaster.register("alive");
        let dead_id = dead.id;
        drop(dead);

        let fanout = broadcaster.broadcast_all(&sample_document()).unwrap();
        assert_eq!(fanout, Fanout { delivered: 1, dropped: 1 });
        assert!(alive.frames.try_recv().is_ok());
        assert_eq!(broadcaster.state(dead_id), ConnectionState::Closed);
        assert_eq!(broadcaster.connection_count(), 1);
    }

    #[test]
    fn test_deliver_targets_one_channel() {
        let broadcaster = Broadcaster::new();
        let mut target = broadcaster.register("target");
        let mut other = broadcaster.register("other");

        assert!(broadcaster.deliver(target.id, &sample_document()).unwrap());
        assert!(target.frames.try_recv().is_ok());
        assert!(other.frames.try_recv().is_err());
    }

    #[test]
    fn test_deliver_to_dead_channel_unregisters_it() {
        let broadcaster = Broadcaster::new();
        let sub = broadcaster.register("gone");
        let id = sub.id;
        drop(sub);

        assert!(!broadcaster.deliver(id, &sample_document()).unwrap());
        assert_eq!(broadcaster.connection_count(), 0);
    }

    #[test]
    fn test_deliver_error_shape() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.register("peer");
        let error = ErrorShape::new("unknown_subject", "subject 'x' does not exist");
        broadcaster.deliver_error(sub.id, &error).unwrap();

        let frame = sub.frames.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["error"]["code"], "unknown_subject");
    }

    #[test]
    fn test_broadcast_order_is_preserved_per_channel() {
        let broadcaster = Broadcaster::new();
        let mut sub = broadcaster.register("peer");
        broadcaster.broadcast_frame(Arc::from("1"));
        broadcaster.broadcast_frame(Arc::from("2"));
        broadcaster.broadcast_frame(Arc::from("3"));

        let received: Vec<String> = std::iter::from_fn(|| sub.frames.try_recv().ok())
            .map(|f| f.to_string())
            .collect();
        assert_eq!(received, ["1", "2", "3"]);
    }

    #[test]
    fn test_connections_listing() {
        let broadcaster = Broadcaster::new();
        let sub = broadcaster.register("10.0.0.1:4000");
        let infos = broadcaster.connections();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id, sub.id);
        assert_eq!(infos[0].peer, "10.0.0.1:4000");
    }
}
