// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket side of the relay.
//!
//! Each connected client gets a session that:
//! - Forwards every UDP-origin packet as one binary frame
//! - Validates incoming binary frames and queues them for the UDP peer

use crate::relay::{RelayError, Shared, Transport};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Handles shared by the HTTP handlers of one open relay.
pub(crate) struct SessionContext {
    pub(crate) shared: Arc<Shared>,
    pub(crate) udp_out: mpsc::Sender<Vec<u8>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) max_clients: usize,
}

/// Serve WebSocket upgrades until the relay is cancelled.
pub(crate) async fn serve(
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    failures: mpsc::UnboundedSender<RelayError>,
) {
    let cancel = ctx.cancel.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await;

    if let Err(e) = result {
        let _ = failures.send(RelayError::TransportRuntime {
            transport: Transport::WebSocket,
            message: e.to_string(),
        });
    }
    debug!("WebSocket server stopped");
}

/// Occupied client slot, released on drop.
struct ClientSlot {
    shared: Arc<Shared>,
}

impl ClientSlot {
    fn acquire(shared: &Arc<Shared>, max_clients: usize) -> Option<Self> {
        shared
            .clients
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_clients).then_some(n + 1)
            })
            .ok()?;
        Some(Self {
            shared: Arc::clone(shared),
        })
    }
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        self.shared.clients.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(ctx): State<Arc<SessionContext>>,
) -> Response {
    match ClientSlot::acquire(&ctx.shared, ctx.max_clients) {
        Some(slot) => {
            // Subscribe before the upgrade completes so nothing sent after
            // the handshake is missed.
            let outbound = ctx.shared.subscribe_outbound();
            ws.on_upgrade(move |socket| run_session(socket, peer, ctx, slot, outbound))
                .into_response()
        }
        None => {
            warn!(
                "Rejecting {}: max clients ({}) reached",
                peer, ctx.max_clients
            );
            (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response()
        }
    }
}

async fn health_handler(State(ctx): State<Arc<SessionContext>>) -> impl IntoResponse {
    let state = ctx.shared.state();
    Json(serde_json::json!({
        "name": ctx.shared.name,
        "status": state.to_string(),
        "description": state.describe(),
        "version": env!("CARGO_PKG_VERSION"),
        "clients": ctx.shared.client_count(),
        "max_clients": ctx.max_clients,
        "stats": ctx.shared.stats.snapshot(),
    }))
}

async fn run_session(
    socket: WebSocket,
    peer: SocketAddr,
    ctx: Arc<SessionContext>,
    _slot: ClientSlot,
    mut outbound: broadcast::Receiver<Vec<u8>>,
) {
    let shared = &ctx.shared;
    info!(
        "[{}] WebSocket client connected ({} connected)",
        peer,
        shared.client_count()
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let cancel = ctx.cancel.clone();

    let forward = async {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                msg = outbound.recv() => match msg {
                    Ok(payload) => {
                        if ws_tx.send(Message::Binary(payload)).await.is_err() {
                            debug!("[{}] WebSocket send failed, closing", peer);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("[{}] Client too slow, skipped {} messages", peer, skipped);
                        shared
                            .stats
                            .udp_to_ws
                            .messages_dropped
                            .fetch_add(skipped, Ordering::Relaxed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    };

    let receive = async {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Binary(data)) => match osc_wire::decode(&data) {
                    Ok(packet) => {
                        debug!(
                            "[{}] WS -> UDP ({} message(s)): {}",
                            peer,
                            packet.message_count(),
                            packet
                        );
                        if ctx.udp_out.send(data).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        shared.stats.ws_to_udp.record_dropped();
                        warn!("[{}] Dropping malformed frame ({} bytes): {}", peer, data.len(), e);
                    }
                },
                Ok(Message::Text(_)) => {
                    shared.stats.ws_to_udp.record_dropped();
                    warn!("[{}] Text frames are not OSC, dropping", peer);
                }
                Ok(Message::Close(_)) => {
                    info!("[{}] Client closed connection", peer);
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // Axum handles pong automatically
                }
                Err(e) => {
                    warn!("[{}] WebSocket error: {}", peer, e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = forward => {}
        _ = receive => {}
    }

    info!("[{}] WebSocket client disconnected", peer);
}
