// ============================
// crates/client-lib/src/lib.rs
// ============================
//! Websocket chat client with automatic reconnection.
//!
//! [`ChatClient::connect`] spawns a background task that owns the socket and
//! the reconnection loop; the handle it returns is what application code
//! holds. Connection state is published through a `watch` channel and server
//! events are fanned out to [`Subscriptions`] callbacks.
//!
//! Reconnection restores the transport only. Room membership is
//! connection-scoped on the server, so after a reconnect the application must
//! join its chats again; the `Connected` state transition is its cue.

pub mod backoff;
pub mod subscriptions;

use futures_util::{SinkExt, StreamExt};
use homelet_common::{ChatMessage, ClientEvent, ServerEvent};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

pub use backoff::ReconnectPolicy;
pub use subscriptions::{Subscriptions, SubscriptionToken};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// No credential configured. The client never attempts a connection
    /// without one; the handshake would only be refused.
    #[error("no credential configured")]
    MissingCredential,

    #[error("not connected")]
    NotConnected,

    #[error("client task stopped")]
    Closed,

    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Observable lifecycle of the background connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not running (before the first attempt, or after `close`).
    Idle,
    /// Handshake in flight.
    Connecting,
    /// Live socket; `send` is accepted.
    Connected,
    /// Waiting out the delay before attempt number `n` (1-based).
    Backoff(u8),
    /// Retry budget exhausted; parked until [`ChatClient::retry`].
    Failed,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL, e.g. `ws://127.0.0.1:3000`.
    pub server_url: String,
    /// Session credential passed in the handshake query string.
    pub token: String,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: token.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

fn ws_url(server_url: &str, token: &str) -> String {
    format!("{}/ws?token={token}", server_url.trim_end_matches('/'))
}

/// Handle to a running chat connection.
pub struct ChatClient {
    state_rx: watch::Receiver<ConnectionState>,
    outgoing_tx: mpsc::UnboundedSender<ClientEvent>,
    subscriptions: Arc<Subscriptions>,
    credential: Arc<Mutex<String>>,
    retry: Arc<Notify>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient").finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Start the connection loop. Requires a configured credential; returns
    /// [`ClientError::MissingCredential`] without attempting the network
    /// otherwise.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        if config.token.trim().is_empty() {
            return Err(ClientError::MissingCredential);
        }

        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let subscriptions = Arc::new(Subscriptions::new());
        let credential = Arc::new(Mutex::new(config.token.clone()));
        let retry = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());

        let task = tokio::spawn(client_loop(
            config,
            credential.clone(),
            outgoing_rx,
            state_tx,
            subscriptions.clone(),
            retry.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            state_rx,
            outgoing_tx,
            subscriptions,
            credential,
            retry,
            shutdown,
            task,
        })
    }

    /// Watch the connection state. The receiver can be awaited with
    /// `wait_for` to block until, say, `Connected`.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Register a callback for every server event, unfiltered.
    pub fn subscribe(
        &self,
        handler: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.subscriptions.subscribe(handler)
    }

    /// Register a callback for persisted messages. Both `MessageAck` (own
    /// sends) and `NewMessage` (others' sends) arrive here, so a chat view
    /// applying both sees each message exactly once.
    pub fn subscribe_messages(
        &self,
        handler: impl Fn(&ChatMessage) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.subscriptions.subscribe_messages(handler)
    }

    /// Register a callback for typing relays: `(chat_id, user_id, is_typing)`.
    pub fn subscribe_typing(
        &self,
        handler: impl Fn(&str, &str, bool) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.subscriptions.subscribe_typing(handler)
    }

    /// Register a callback for transport failures (failed connects, dropped
    /// sockets). Protocol-level `Error` events arrive through the event
    /// subscriptions instead.
    pub fn subscribe_errors(
        &self,
        handler: impl Fn(&ClientError) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.subscriptions.subscribe_errors(handler)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.subscriptions.unsubscribe(token);
    }

    /// Replace the credential used by subsequent connection attempts. The
    /// live connection, if any, is not torn down; the refreshed token is
    /// presented on the next handshake.
    pub fn set_credential(&self, token: impl Into<String>) {
        let mut credential = self.credential.lock().expect("credential lock poisoned");
        *credential = token.into();
    }

    /// Queue an event for the live connection. Refused while not connected
    /// rather than buffered across reconnects.
    pub fn send(&self, event: ClientEvent) -> Result<(), ClientError> {
        if *self.state_rx.borrow() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        self.outgoing_tx.send(event).map_err(|_| ClientError::Closed)
    }

    pub fn join_chat(&self, chat_id: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientEvent::JoinChat {
            chat_id: chat_id.into(),
        })
    }

    pub fn send_message(
        &self,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send(ClientEvent::SendMessage {
            chat_id: chat_id.into(),
            content: content.into(),
        })
    }

    pub fn send_typing(&self, chat_id: impl Into<String>, is_typing: bool) -> Result<(), ClientError> {
        self.send(ClientEvent::Typing {
            chat_id: chat_id.into(),
            is_typing,
        })
    }

    pub fn leave_chat(&self, chat_id: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientEvent::LeaveChat {
            chat_id: chat_id.into(),
        })
    }

    pub fn mark_read(&self, chat_id: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientEvent::MarkRead {
            chat_id: chat_id.into(),
        })
    }

    /// Restart the connection loop after it parked in `Failed`.
    pub fn retry(&self) {
        self.retry.notify_one();
    }

    /// Stop the background task and close the socket.
    pub async fn close(self) {
        self.shutdown.notify_one();
        let _ = self.task.await;
    }
}

async fn client_loop(
    config: ClientConfig,
    credential: Arc<Mutex<String>>,
    mut outgoing_rx: mpsc::UnboundedReceiver<ClientEvent>,
    state_tx: watch::Sender<ConnectionState>,
    subscriptions: Arc<Subscriptions>,
    retry: Arc<Notify>,
    shutdown: Arc<Notify>,
) {
    let mut attempt: u8 = 0;

    loop {
        // Rebuilt per attempt so a token refreshed via `set_credential` is
        // what the next handshake presents.
        let url = {
            let token = credential.lock().expect("credential lock poisoned");
            ws_url(&config.server_url, &token)
        };

        let _ = state_tx.send(ConnectionState::Connecting);
        let result = tokio::select! {
            _ = shutdown.notified() => break,
            result = connect_async(url.as_str()) => result,
        };

        match result {
            Ok((ws, _)) => {
                attempt = 0;
                // Events queued while disconnected are stale, drop them.
                while outgoing_rx.try_recv().is_ok() {}
                let _ = state_tx.send(ConnectionState::Connected);
                debug!(server_url = %config.server_url, "connected");

                if run_connection(ws, &mut outgoing_rx, &subscriptions, &shutdown).await {
                    break;
                }
                debug!("connection lost");
            },
            Err(err) => {
                warn!(error = %err, attempt, "connect failed");
                subscriptions.dispatch_error(&ClientError::Transport(err));
            },
        }

        match config.reconnect.delay_for(attempt) {
            Some(delay) => {
                attempt += 1;
                let _ = state_tx.send(ConnectionState::Backoff(attempt));
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(delay) => {},
                }
            },
            None => {
                let _ = state_tx.send(ConnectionState::Failed);
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = retry.notified() => attempt = 0,
                }
            },
        }
    }

    let _ = state_tx.send(ConnectionState::Idle);
}

/// Drive one live connection. Returns `true` when shutdown was requested,
/// `false` when the connection dropped and the caller should reconnect.
async fn run_connection(
    mut ws: WsStream,
    outgoing_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    subscriptions: &Subscriptions,
    shutdown: &Notify,
) -> bool {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                let _ = ws.close(None).await;
                return true;
            },
            event = outgoing_rx.recv() => match event {
                Some(event) => {
                    let Ok(json) = serde_json::to_string(&event) else { continue };
                    if let Err(err) = ws.send(Message::Text(json.into())).await {
                        subscriptions.dispatch_error(&ClientError::Transport(err));
                        return false;
                    }
                },
                None => {
                    // Every handle is gone, nothing left to do.
                    let _ = ws.close(None).await;
                    return true;
                },
            },
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => subscriptions.dispatch_event(&event),
                        Err(err) => warn!(error = %err, "unparseable server event"),
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    if ws.send(Message::Pong(payload)).await.is_err() {
                        return false;
                    }
                },
                Some(Ok(Message::Close(_))) | None => return false,
                Some(Ok(_)) => {},
                Some(Err(err)) => {
                    warn!(error = %err, "websocket read failed");
                    subscriptions.dispatch_error(&ClientError::Transport(err));
                    return false;
                },
            },
        }
    }
}
