//! Connection handles and outbound delivery.
//!
//! The [`ConnectionManager`] knows nothing about sessions. It hands out a
//! fresh [`ConnectionHandle`] for every accepted transport connection and
//! keeps that connection's outbound queue until the handle is released.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tandem_protocol::Frame;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Opaque identifier for a live transport connection.
///
/// Handles come from a monotonically increasing counter and are never
/// reused by the manager that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Create a handle from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Sending half of a connection's outbound queue.
pub type Outbound = mpsc::Sender<Arc<Frame>>;

/// Result of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was queued for the connection.
    Delivered,
    /// The connection's outbound queue is full; the frame was dropped.
    Backpressure,
    /// The handle is not live; nothing was sent.
    NotLive,
}

impl Delivery {
    /// Label used for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Delivery::Delivered => "delivered",
            Delivery::Backpressure => "backpressure",
            Delivery::NotLive => "not_live",
        }
    }
}

/// Table of live connections and their outbound queues.
#[derive(Debug)]
pub struct ConnectionManager {
    /// Live connections indexed by handle.
    connections: DashMap<ConnectionHandle, Outbound>,
    /// Next handle to issue.
    next_id: AtomicU64,
}

impl ConnectionManager {
    /// Create an empty connection manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new connection and assign it a fresh handle.
    pub fn accept(&self, outbound: Outbound) -> ConnectionHandle {
        let handle = ConnectionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.insert(handle, outbound);
        debug!(connection = %handle, live = self.connections.len(), "Connection accepted");
        handle
    }

    /// Register a new connection with a bounded outbound queue of the given
    /// capacity, returning the handle and the receiving half of the queue.
    pub fn open(&self, capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Arc<Frame>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.accept(tx), rx)
    }

    /// Queue a frame for a connection without waiting.
    ///
    /// Delivery to a handle that is no longer live is a no-op. A full queue
    /// drops the frame for this connection only.
    pub fn deliver(&self, handle: ConnectionHandle, frame: &Arc<Frame>) -> Delivery {
        let Some(outbound) = self.connections.get(&handle) else {
            trace!(connection = %handle, "Delivery to closed connection skipped");
            return Delivery::NotLive;
        };

        match outbound.try_send(Arc::clone(frame)) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection = %handle, kind = %frame.kind(), "Outbound queue full, frame dropped");
                Delivery::Backpressure
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!(connection = %handle, "Outbound queue closed");
                Delivery::NotLive
            }
        }
    }

    /// Forget a connection. Returns `true` if it was live.
    pub fn release(&self, handle: ConnectionHandle) -> bool {
        let released = self.connections.remove(&handle).is_some();
        if released {
            debug!(connection = %handle, live = self.connections.len(), "Connection released");
        }
        released
    }

    /// Check if a handle is live.
    #[must_use]
    pub fn is_live(&self, handle: ConnectionHandle) -> bool {
        self.connections.contains_key(&handle)
    }

    /// Number of live connections.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
