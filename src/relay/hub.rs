//! Fan-out of relay messages to every registered connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use super::models::StatusKind;
use super::registry::{ConnectionId, ConnectionRegistry, ConnectionSink, Frame};
use super::ws::WsMessage;
use crate::errors::DeliveryError;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Connections that could not take the frame and were removed.
    pub evicted: usize,
}

/// Capability to push a message to all live subscribers.
///
/// Handlers that emit take this instead of a concrete relay so the relay is
/// always passed in explicitly.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, msg: &WsMessage) -> FanOut;
}

/// The relay hub: connection membership plus broadcast.
///
/// The registry lock is held for the whole fan-out and every delivery is a
/// non-blocking queue push, so concurrent broadcasts are serialized and each
/// connection sees frames in enqueue order.
pub struct Relay {
    registry: Mutex<ConnectionRegistry>,
    next_id: AtomicU64,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(ConnectionRegistry::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn registry(&self) -> MutexGuard<'_, ConnectionRegistry> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock is still safe to use.
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a fresh connection identity.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a connection. No backlog is replayed; it only sees messages
    /// broadcast after this call returns.
    pub fn on_connect(&self, id: ConnectionId, sink: Arc<dyn ConnectionSink>) -> bool {
        let mut registry = self.registry();
        let added = registry.insert(id, sink);
        if added {
            tracing::info!(connection = id, total = registry.len(), "Subscriber connected");
        } else {
            tracing::debug!(connection = id, "Connection already registered");
        }
        added
    }

    /// Unregister a connection. Safe to call more than once.
    pub fn on_disconnect(&self, id: ConnectionId) -> bool {
        let mut registry = self.registry();
        let removed = registry.remove(id);
        if removed {
            tracing::info!(connection = id, total = registry.len(), "Subscriber disconnected");
        }
        removed
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.registry().contains(id)
    }

    pub fn connection_count(&self) -> usize {
        self.registry().len()
    }

    /// Broadcast a producer event verbatim on the `new_event` channel.
    pub fn on_producer_event(&self, event: Value) -> FanOut {
        self.publish(&WsMessage::NewEvent(event))
    }

    /// Broadcast a status change on the agent or project channel.
    pub fn on_status_update(&self, kind: StatusKind, status: Value) -> FanOut {
        self.publish(&WsMessage::status(kind, status))
    }

    /// Serialize `msg` once and queue it for every registered connection.
    ///
    /// A connection that cannot take the frame, because it is closed or its
    /// queue is full, is evicted before the call returns. Dropping its sink
    /// closes the queue and the socket task shuts the connection down.
    pub fn publish(&self, msg: &WsMessage) -> FanOut {
        let frame: Frame = match serde_json::to_string(msg) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize relay message");
                return FanOut::default();
            }
        };

        let mut registry = self.registry();
        let mut outcome = FanOut::default();
        let mut failed = Vec::new();

        for (id, sink) in registry.iter() {
            match sink.try_deliver(frame.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => failed.push((id, e)),
            }
        }

        for (id, reason) in failed {
            if registry.remove(id) {
                outcome.evicted += 1;
                match reason {
                    DeliveryError::Full => tracing::warn!(
                        connection = id,
                        channel = msg.channel(),
                        "Evicted lagging subscriber, queue full"
                    ),
                    DeliveryError::Closed => {
                        tracing::warn!(connection = id, "Evicted closed subscriber during broadcast")
                    }
                }
            }
        }

        tracing::debug!(
            channel = msg.channel(),
            delivered = outcome.delivered,
            evicted = outcome.evicted,
            "Broadcast"
        );
        outcome
    }
}

impl Broadcaster for Relay {
    fn broadcast(&self, msg: &WsMessage) -> FanOut {
        self.publish(msg)
    }
}
