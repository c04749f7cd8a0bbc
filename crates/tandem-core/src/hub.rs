//! The hub: single owner of the session registry.
//!
//! Connection tasks never touch the [`Registry`] directly. They push
//! [`HubEvent`]s into one queue, and the hub task applies them in arrival
//! order. Because each connection pushes its own events sequentially, events
//! from the same connection are applied in the order they happened.
//!
//! The hub is also the lifecycle coordinator: a `Closed` event purges every
//! binding of the handle and releases it from the [`ConnectionManager`] in
//! the same step, before the next event is looked at.

use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::metrics;
use crate::registry::{PurgeReport, Registry, RegistryStats};
use crate::router::{self, Dispatch};
use std::sync::Arc;
use tandem_protocol::Frame;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub task is no longer running.
    #[error("Hub stopped")]
    Stopped,
}

/// Events consumed by the hub.
#[derive(Debug)]
pub enum HubEvent {
    /// A frame arrived on a connection.
    Inbound {
        handle: ConnectionHandle,
        frame: Frame,
    },
    /// A connection closed.
    Closed {
        handle: ConnectionHandle,
        reason: String,
    },
    /// Request a statistics snapshot.
    Stats(oneshot::Sender<HubStats>),
}

/// A consistent snapshot of hub state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Live connections.
    pub connections: usize,
    /// Registry counts.
    pub registry: RegistryStats,
}

/// Cloneable sender side of the hub's event queue.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Queue an inbound frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn inbound(&self, handle: ConnectionHandle, frame: Frame) -> Result<(), HubError> {
        self.send(HubEvent::Inbound { handle, frame }).await
    }

    /// Report that a connection closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn closed(
        &self,
        handle: ConnectionHandle,
        reason: impl Into<String>,
    ) -> Result<(), HubError> {
        self.send(HubEvent::Closed {
            handle,
            reason: reason.into(),
        })
        .await
    }

    /// Ask the hub for a statistics snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Stats(reply)).await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.tx.send(event).await.map_err(|_| HubError::Stopped)
    }
}

/// Registry owner and event processor.
pub struct Hub {
    registry: Registry,
    connections: Arc<ConnectionManager>,
}

impl Hub {
    /// Create a hub with an empty registry.
    #[must_use]
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            registry: Registry::new(),
            connections,
        }
    }

    /// Spawn the hub on the current runtime.
    ///
    /// The hub runs until every [`HubHandle`] is dropped.
    pub fn spawn(self, capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(self.run(rx));
        (HubHandle { tx }, task)
    }

    /// Process events until the queue closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<HubEvent>) {
        info!("Hub started");
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        info!("Hub stopped");
    }

    /// Apply one event.
    pub fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Inbound { handle, frame } => {
                self.on_frame(handle, frame);
            }
            HubEvent::Closed { handle, reason } => {
                self.on_close(handle, &reason);
            }
            HubEvent::Stats(reply) => {
                // The requester may have given up waiting.
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Route a frame from a connection.
    pub fn on_frame(&mut self, handle: ConnectionHandle, frame: Frame) -> Option<Dispatch> {
        metrics::record_message(frame.kind().as_str());

        if !self.connections.is_live(handle) {
            debug!(connection = %handle, kind = %frame.kind(), "Frame from closed connection ignored");
            return None;
        }

        let outcome = router::dispatch(&mut self.registry, &self.connections, handle, frame);
        if matches!(
            outcome,
            Dispatch::ControllerBound { .. } | Dispatch::ObserverAdded { added: true, .. }
        ) {
            metrics::set_active_sessions(self.registry.session_count());
        }
        Some(outcome)
    }

    /// Purge a closed connection and release its handle.
    ///
    /// Safe to call for a handle that never registered or was already
    /// purged.
    pub fn on_close(&mut self, handle: ConnectionHandle, reason: &str) -> PurgeReport {
        let report = self.registry.purge(handle);
        self.connections.release(handle);

        debug!(
            connection = %handle,
            reason = %reason,
            controlled = ?report.controlled,
            observed = ?report.observed,
            "Connection closed"
        );
        if !report.is_empty() {
            metrics::set_active_sessions(self.registry.session_count());
        }
        report
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.live_count(),
            registry: self.registry.stats(),
        }
    }

    /// Read-only access to the registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_close_purges_and_releases() {
        let connections = Arc::new(ConnectionManager::new());
        let mut hub = Hub::new(Arc::clone(&connections));
        let (h1, _rx1) = connections.open(4);
        let (h2, _rx2) = connections.open(4);

        hub.on_frame(h1, Frame::controller_register("A", 1));
        hub.on_frame(h1, Frame::observer_register("B", 1));
        hub.on_frame(h2, Frame::observer_register("A", 1));

        let report = hub.on_close(h1, "client close");
        assert_eq!(report.controlled, vec!["A".to_string()]);
        assert_eq!(report.observed, vec!["B".to_string()]);
        assert!(!connections.is_live(h1));
        assert_eq!(hub.registry().controller("A"), None);
        assert_eq!(hub.registry().observer_count("A"), 1);

        // A second close is harmless.
        assert!(hub.on_close(h1, "again").is_empty());
        assert_eq!(hub.stats().connections, 1);
    }

    #[test]
    fn test_close_before_registration() {
        let connections = Arc::new(ConnectionManager::new());
        let mut hub = Hub::new(Arc::clone(&connections));
        let (h1, _rx) = connections.open(4);

        assert!(hub.on_close(h1, "transport error").is_empty());
        assert_eq!(hub.stats(), HubStats::default());
    }

    #[test]
    fn test_frames_from_closed_connection_are_ignored() {
        let connections = Arc::new(ConnectionManager::new());
        let mut hub = Hub::new(Arc::clone(&connections));
        let (h1, _rx) = connections.open(4);

        hub.on_close(h1, "gone");
        assert_eq!(hub.on_frame(h1, Frame::controller_register("A", 1)), None);
        assert_eq!(hub.registry().controller("A"), None);
    }

    #[tokio::test]
    async fn test_spawned_hub_routes_in_order() {
        let connections = Arc::new(ConnectionManager::new());
        let (hub, _task) = Hub::new(Arc::clone(&connections)).spawn(64);

        let (h1, mut rx1) = connections.open(16);
        let (h2, mut rx2) = connections.open(16);

        hub.inbound(h1, Frame::controller_register("A", 1)).await.unwrap();
        hub.inbound(h2, Frame::observer_register("A", 1)).await.unwrap();
        for value in [10, 20, 30] {
            hub.inbound(h2, Frame::control_set("A", value)).await.unwrap();
        }
        hub.inbound(h1, Frame::control_sync("A", 30, "kindA")).await.unwrap();

        for value in [10, 20, 30] {
            let frame = timeout(Duration::from_secs(1), rx1.recv()).await.unwrap().unwrap();
            assert_eq!(*frame, Frame::control_set("A", value));
        }
        let frame = timeout(Duration::from_secs(1), rx2.recv()).await.unwrap().unwrap();
        assert_eq!(*frame, Frame::control_sync("A", 30, "kindA"));

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.registry.session_count, 1);
        assert_eq!(stats.registry.controller_count, 1);
        assert_eq!(stats.registry.observer_count, 1);

        hub.closed(h1, "client close").await.unwrap();
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.registry.controller_count, 0);
    }

    #[tokio::test]
    async fn test_hub_stops_when_handles_dropped() {
        let connections = Arc::new(ConnectionManager::new());
        let (hub, task) = Hub::new(connections).spawn(4);

        drop(hub);
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
