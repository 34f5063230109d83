//! Connection handlers for the courier relay server.
//!
//! This module wires the transport boundary: WebSocket lifecycle,
//! the auth-header shim, and dispatch of decoded commands into the
//! router. Every inbound event is handled statelessly - all registry
//! state lives behind the store, so handler instances share nothing
//! but the store and the delivery transport.

use crate::config::{Config, StoreBackend};
use crate::delivery::LocalDelivery;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use courier_core::{Delivery, Router as CourierRouter, RouterError};
use courier_protocol::{decode_with_limit, ChannelCommand, Command};
use courier_store::{MemoryStore, RedbStore, Store};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The message router.
    pub router: CourierRouter,
    /// The in-process delivery transport.
    pub delivery: Arc<LocalDelivery>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state over the configured store backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn Store> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Redb => Arc::new(
                RedbStore::open(&config.store.path)
                    .with_context(|| format!("Failed to open store at {}", config.store.path))?,
            ),
        };
        let delivery = Arc::new(LocalDelivery::new());

        Ok(Self {
            router: CourierRouter::new(store, delivery.clone()),
            delivery,
            config,
        })
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/channels", get(channels_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Courier relay listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Registry statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> axum::response::Response {
    match state.router.stats().await {
        Ok(stats) => axum::Json(serde_json::json!({
            "connections": stats.connection_count,
            "channels": stats.channel_count,
            "memberships": stats.membership_count,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Stats query failed");
            metrics::record_error("store");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Channel discovery handler.
async fn channels_handler(State(state): State<Arc<AppState>>) -> axum::response::Response {
    match state.router.list_channels().await {
        Ok(channels) => axum::Json(channels).into_response(),
        Err(e) => {
            error!(error = %e, "Channel listing failed");
            metrics::record_error("store");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// WebSocket upgrade handler.
///
/// The auth collaborator has already resolved the caller's identity;
/// the relay trusts the `auth` header as-is and performs no
/// authentication itself.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> axum::response::Response {
    let Some(user_id) = headers
        .get("auth")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
    else {
        return (StatusCode::UNAUTHORIZED, "Missing auth header").into_response();
    };

    ws.on_upgrade(move |socket| handle_websocket(socket, state, user_id))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    // Generate connection ID
    let connection_id = format!(
        "conn_{:x}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    );

    debug!(connection = %connection_id, user = %user_id, "WebSocket connected");

    // Register the outbound queue before the connection record so a
    // concurrent routing operation that sees the record can deliver.
    let mut outbound = state.delivery.register(&connection_id);

    if let Err(e) = state.router.connect(&connection_id, &user_id).await {
        error!(connection = %connection_id, error = %e, "Failed to register connection");
        metrics::record_error("store");
        state.delivery.unregister(&connection_id);
        return;
    }

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Acknowledge the connect
    if sender
        .send(Message::Text("Connected.".to_string()))
        .await
        .is_err()
    {
        error!(connection = %connection_id, "Failed to send connect acknowledgement");
        cleanup(&state, &connection_id).await;
        return;
    }

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Payloads routed to this connection
            Some(payload) = outbound.recv() => {
                metrics::record_message(payload.len(), "outbound");
                let text = String::from_utf8_lossy(&payload).into_owned();
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_payload(&state, &connection_id, &user_id, text.as_bytes()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        handle_payload(&state, &connection_id, &user_id, &data).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    cleanup(&state, &connection_id).await;
    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Unregister the delivery target and drop the connection record.
async fn cleanup(state: &Arc<AppState>, connection_id: &str) {
    state.delivery.unregister(connection_id);
    if let Err(e) = state.router.disconnect(connection_id).await {
        // The record stays until the next connect/disconnect cycle for
        // this identity; routing to it will fail and be logged.
        error!(connection = %connection_id, error = %e, "Failed to remove connection record");
        metrics::record_error("store");
    }
}

/// Decode one inbound payload and dispatch it through the router.
///
/// A store failure aborts only this event; the connection survives and
/// the client may resend.
async fn handle_payload(
    state: &Arc<AppState>,
    connection_id: &str,
    user_id: &str,
    raw: &[u8],
) {
    let start = Instant::now();
    metrics::record_message(raw.len(), "inbound");

    let command = match decode_with_limit(raw, state.config.limits.max_message_size) {
        Ok(command) => command,
        Err(e) => {
            debug!(connection = %connection_id, error = %e, "Undecodable payload");
            metrics::record_error("protocol");
            send_to_self(
                state,
                connection_id,
                &format!("Unrecognized payload: {}", String::from_utf8_lossy(raw)),
            )
            .await;
            return;
        }
    };

    let result = match command {
        Command::Direct { to, message } => state
            .router
            .route_to_user(
                to.as_deref(),
                Bytes::from(message.unwrap_or_default()),
                connection_id,
            )
            .await
            .map(Some),

        Command::Channel(ChannelCommand::ChannelCreate { channel_id }) => state
            .router
            .create_channel(&channel_id, connection_id, user_id)
            .await
            .map(|()| None),

        Command::Channel(ChannelCommand::ChannelJoin { channel_id }) => state
            .router
            .join_channel(&channel_id, connection_id, user_id)
            .await
            .map(|()| None),

        Command::Channel(ChannelCommand::ChannelLeave { channel_id }) => state
            .router
            .leave_channel(&channel_id, connection_id)
            .await
            .map(|()| None),

        Command::Channel(ChannelCommand::SendMessageChannel {
            channel_id,
            message,
        }) => state
            .router
            .route_to_channel(
                &channel_id,
                Bytes::from(message.unwrap_or_default()),
                connection_id,
                user_id,
            )
            .await
            .map(Some),
    };

    match result {
        Ok(Some(report)) => {
            metrics::record_route(report.delivered, report.failed, report.pruned);
        }
        Ok(None) => {}
        Err(RouterError::InvalidChannel(reason)) => {
            debug!(connection = %connection_id, reason, "Rejected channel name");
            metrics::record_error("invalid_channel");
            send_to_self(
                state,
                connection_id,
                &format!("Invalid channel name: {}", reason),
            )
            .await;
        }
        Err(RouterError::Store(e)) => {
            error!(connection = %connection_id, error = %e, "Event processing failed");
            metrics::record_error("store");
        }
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Queue a server diagnostic for the caller's own connection.
async fn send_to_self(state: &Arc<AppState>, connection_id: &str, text: &str) {
    if let Err(e) = state
        .delivery
        .deliver(connection_id, Bytes::from(text.to_string()))
        .await
    {
        warn!(connection = %connection_id, error = %e, "Diagnostic delivery failed");
    }
}
