//! WebSocket acceptor.
//!
//! Upgrades each inbound connection on `/ws` and runs one [`Session`] per
//! socket on its own task. No authentication is performed; deployments
//! assume a trusted local origin.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::session::{CloseReason, Session};

/// Shared state for the acceptor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Gauge of sessions still finalising, used to drain on shutdown.
    pub active_sessions: Arc<AtomicUsize>,
    /// Broadcast that tells every live session to close with `shutdown`.
    pub shutdown: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(config: Arc<Config>, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            config,
            active_sessions: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }
}

/// Create the router: the ingestion WebSocket plus a liveness endpoint.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    "OK"
}

async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

/// Drive one session: read frames until the socket closes, errors, goes
/// idle or the process shuts down, then finalise.
async fn run_session(mut socket: WebSocket, state: AppState) {
    let mut session = match Session::new(state.config.clone()) {
        Ok(session) => session,
        Err(e) => {
            error!("failed to start session: {:#}", e);
            return;
        }
    };

    state.active_sessions.fetch_add(1, Ordering::SeqCst);
    let mut shutdown_rx = state.shutdown.subscribe();

    let (reason, error) = loop {
        let deadline = tokio::time::Instant::from_std(session.idle_deadline());

        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Binary(data))) => {
                    if let Some(reason) = session.handle_message(&data) {
                        break (reason, None);
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    // The agent speaks the binary envelope only.
                    debug!(session = %session.id(), len = text.len(), "ignoring text frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    break (CloseReason::ClientClose, None);
                }
                Some(Err(e)) => {
                    warn!(session = %session.id(), "socket error: {}", e);
                    break (CloseReason::SocketError, Some(e.to_string()));
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                break (CloseReason::InactivityTimeout, None);
            }
            _ = shutdown_rx.recv() => {
                break (CloseReason::Shutdown, None);
            }
        }
    };

    session.close(reason, error);
    state.active_sessions.fetch_sub(1, Ordering::SeqCst);
    info!(session = %session.id(), "connection finished");
}
