//! Membership of live subscriber connections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::errors::DeliveryError;

/// Opaque identity of one subscriber session.
pub type ConnectionId = u64;

/// One serialized outbound frame, shared across every connection it is sent to.
pub type Frame = Arc<str>;

/// Where the relay hands frames for a single connection.
///
/// Implementations must not block: a slow or dead connection reports an
/// error instead of stalling the broadcast.
pub trait ConnectionSink: Send + Sync {
    fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError>;
}

/// Sink backed by the bounded queue drained by a connection's socket task.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Frame>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }
}

impl ConnectionSink for ChannelSink {
    fn try_deliver(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Set of currently connected sessions keyed by [`ConnectionId`].
#[derive(Default)]
pub struct ConnectionRegistry {
    members: HashMap<ConnectionId, Arc<dyn ConnectionSink>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`. Returns `false` and keeps the existing sink if `id` is
    /// already a member.
    pub fn insert(&mut self, id: ConnectionId, sink: Arc<dyn ConnectionSink>) -> bool {
        if self.members.contains_key(&id) {
            return false;
        }
        self.members.insert(id, sink);
        true
    }

    /// Remove `id`. Returns `false` if it was not a member.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.members.remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &Arc<dyn ConnectionSink>)> {
        self.members.iter().map(|(id, sink)| (*id, sink))
    }
}
