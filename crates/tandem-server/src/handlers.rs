//! Connection handlers for the Tandem server.
//!
//! Each WebSocket connection runs one task that reads frames from the socket
//! into the hub and writes frames from its outbound queue to the socket.
//! When the socket ends, for whatever reason, the task reports the close to
//! the hub exactly once.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tandem_core::{ConnectionHandle, ConnectionManager, Hub, HubHandle};
use tandem_protocol::{codec, Encoded, Encoding, Frame, ProtocolError};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Sender side of the hub's event queue.
    pub hub: HubHandle,
    /// Live connections and their outbound queues.
    pub connections: Arc<ConnectionManager>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state and spawn the hub.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let connections = Arc::new(ConnectionManager::new());
        let (hub, _task) =
            Hub::new(Arc::clone(&connections)).spawn(config.limits.inbound_queue_capacity);

        Self {
            hub,
            connections,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Tandem server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Serve the application on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops with an I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Build the HTTP router.
///
/// Cross-origin requests are allowed from anywhere.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let ws_path = state.config.transport.websocket_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler, with a registry snapshot taken by the hub.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "connections": stats.connections,
            "sessions": stats.registry.session_count,
            "controllers": stats.registry.controller_count,
            "observers": stats.registry.observer_count,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let limits = &state.config.limits;
    let (handle, mut outbound) = state.connections.open(limits.outbound_queue_capacity);

    debug!(connection = %handle, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Replies use the encoding the client last spoke.
    let mut encoding = Encoding::default();

    let reason: String = 'conn: loop {
        tokio::select! {
            biased;

            // Frames routed to this connection by the hub
            Some(frame) = outbound.recv() => {
                match codec::encode_as(&frame, encoding) {
                    Ok(encoded) => {
                        if sender.send(to_ws_message(encoded)).await.is_err() {
                            break 'conn "send failed".to_string();
                        }
                    }
                    Err(e) => {
                        warn!(connection = %handle, error = %e, "Failed to encode frame");
                        metrics::record_error("encode");
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        encoding = Encoding::Text;
                        if text.len() > limits.max_message_size {
                            drop_oversized(handle, text.len());
                            continue;
                        }
                        match codec::decode_text(&text) {
                            Ok(frame) => {
                                if !forward(&state.hub, handle, frame).await {
                                    break 'conn "hub stopped".to_string();
                                }
                            }
                            Err(e) => drop_undecodable(handle, &e),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        encoding = Encoding::Binary;
                        if data.len() > limits.max_message_size {
                            drop_oversized(handle, data.len());
                            continue;
                        }
                        for decoded in codec::decode_message(&data, limits.max_message_size) {
                            match decoded {
                                Ok(frame) => {
                                    if !forward(&state.hub, handle, frame).await {
                                        break 'conn "hub stopped".to_string();
                                    }
                                }
                                Err(e) => drop_undecodable(handle, &e),
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break 'conn "send failed".to_string();
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        break 'conn "client close".to_string();
                    }
                    Some(Err(e)) => {
                        warn!(connection = %handle, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break 'conn format!("transport error: {e}");
                    }
                    None => {
                        break 'conn "stream ended".to_string();
                    }
                }
            }
        }
    };

    debug!(connection = %handle, reason = %reason, "WebSocket disconnected");

    if state.hub.closed(handle, reason).await.is_err() {
        state.connections.release(handle);
    }
}

/// Hand a decoded frame to the hub. Returns `false` if the hub is gone.
async fn forward(hub: &HubHandle, handle: ConnectionHandle, frame: Frame) -> bool {
    match hub.inbound(handle, frame).await {
        Ok(()) => true,
        Err(e) => {
            error!(connection = %handle, error = %e, "Hub unavailable");
            false
        }
    }
}

fn drop_oversized(handle: ConnectionHandle, size: usize) {
    warn!(connection = %handle, size, "Oversized message dropped");
    tandem_core::metrics::record_drop("oversized");
}

fn drop_undecodable(handle: ConnectionHandle, error: &ProtocolError) {
    debug!(connection = %handle, error = %error, "Undecodable message dropped");
    tandem_core::metrics::record_drop("undecodable");
}

fn to_ws_message(encoded: Encoded) -> Message {
    match encoded {
        Encoded::Text(text) => Message::Text(text),
        Encoded::Binary(data) => Message::Binary(data.to_vec()),
    }
}
