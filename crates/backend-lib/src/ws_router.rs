// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
//!
//! The credential travels in the handshake (`GET /ws?token=...`) and is
//! resolved before the upgrade; a bad credential is connection-fatal and
//! answered with 401. Everything after the upgrade is per-action error
//! handling on a live connection.
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use homelet_common::{ClientEvent, Identity, ServerEvent};
use metrics::{counter, gauge};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::metrics::{WS_ACTIVE, WS_CONNECTION, WS_DISCONNECTION};
use crate::protocol::ChatSession;
use crate::registry::ConnectionId;
use crate::store::MessageStore;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

/// Create the chat router
pub fn create_router<S: MessageStore + Send + Sync + Clone + 'static>(
    state: Arc<AppState<S>>,
) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::<S>))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Handler for WebSocket connections
pub async fn ws_handler<S: MessageStore + Send + Sync + Clone + 'static>(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<Arc<AppState<S>>>,
) -> Response {
    let Some(token) = query.token else {
        return ChatError::Auth("missing credential".to_string()).into_response();
    };

    // Handshake-time identity resolution; failure is connection-fatal.
    match state.identity.resolve(&token).await {
        Ok(identity) => {
            counter!(WS_CONNECTION).increment(1);
            gauge!(WS_ACTIVE).increment(1.0);
            ws.on_upgrade(move |socket| handle_connection(socket, state, identity))
                .into_response()
        },
        Err(err) => {
            warn!(error = %err, "websocket handshake rejected");
            err.into_response()
        },
    }
}

async fn handle_connection<S: MessageStore + Send + Sync + Clone + 'static>(
    socket: WebSocket,
    state: Arc<AppState<S>>,
    identity: Identity,
) {
    let (mut sink, mut stream) = socket.split();
    let conn_id = ConnectionId::new();

    // Per-connection outbox: direct replies and room broadcasts share it, so
    // the client observes a single FIFO.
    let (outbox_tx, mut outbox_rx) = mpsc::channel::<ServerEvent>(state.settings.outbox_capacity);
    state
        .registry
        .register(conn_id, identity.clone(), outbox_tx.clone());
    debug!(%conn_id, user_id = %identity.id, "connection registered");

    // Forward outbox events to the socket and keep the connection alive with
    // periodic pings.
    let ping_interval = state.settings.ping_interval();
    let send_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = outbox_rx.recv() => match event {
                    Some(event) => {
                        let Ok(json) = serde_json::to_string(&event) else { continue };
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    },
                    None => break,
                },
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut session = ChatSession::new(state.clone(), conn_id, identity);
    let idle_timeout = state.settings.idle_timeout();

    // Main task: process incoming events in arrival order. A connection that
    // stays silent past the idle timeout (no frames, not even pongs) is
    // half-open and gets pruned.
    loop {
        let message = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Err(_) => {
                debug!(%conn_id, "idle timeout, pruning half-open connection");
                break;
            },
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                let event = match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => event,
                    Err(err) => {
                        let reply = ServerEvent::Error {
                            code: ChatError::Json(err).error_code().to_string(),
                            message: "malformed event payload".to_string(),
                        };
                        if outbox_tx.send(reply).await.is_err() {
                            break;
                        }
                        continue;
                    },
                };

                match session.handle_event(event).await {
                    Ok(Some(reply)) => {
                        if outbox_tx.send(reply).await.is_err() {
                            break;
                        }
                    },
                    Ok(None) => {},
                    Err(err) => {
                        // Per-action rejection: report to this connection
                        // only, keep it alive.
                        let reply = ServerEvent::Error {
                            code: err.error_code().to_string(),
                            message: err.to_string(),
                        };
                        if outbox_tx.send(reply).await.is_err() {
                            break;
                        }
                    },
                }
            },
            Message::Close(_) => break,
            // Pongs (and any other frame) refresh the idle timeout by
            // arriving; axum answers client pings itself.
            _ => {},
        }
    }

    // Synchronous cleanup on disconnect: no deferred task that a reconnect
    // with a fresh connection id could race.
    state.registry.unregister_all(conn_id);
    send_task.abort();

    counter!(WS_DISCONNECTION).increment(1);
    gauge!(WS_ACTIVE).decrement(1.0);
    debug!(%conn_id, "connection closed");
}
