// ============================
// crates/backend-lib/src/protocol.rs
// ============================
//! Chat Channel Protocol handler.
//!
//! One `ChatSession` is instantiated per connection and processes the
//! client's events in arrival order (per-connection FIFO). It owns no shared
//! state itself; room membership lives in the [`ConnectionRegistry`] and
//! persistence goes through the [`MessageStore`].
//!
//! Participant membership is re-checked at every `SendMessage`/`Typing`, not
//! cached from join time, so a participant removed from a chat mid-session
//! loses posting rights on their next action.

use homelet_common::{Chat, ClientEvent, Identity, ServerEvent};
use metrics::counter;
use std::sync::Arc;
use tracing::debug;

use crate::error::ChatError;
use crate::metrics::{MESSAGE_BROADCAST, MESSAGE_SENT, ROOM_JOINED, TYPING_RELAYED};
use crate::registry::ConnectionId;
use crate::store::MessageStore;
use crate::AppState;

/// Per-connection protocol handler
pub struct ChatSession<S> {
    state: Arc<AppState<S>>,
    conn_id: ConnectionId,
    identity: Option<Identity>,
}

impl<S: MessageStore + Send + Sync + Clone + 'static> ChatSession<S> {
    /// Session for a connection whose handshake credential resolved.
    pub fn new(state: Arc<AppState<S>>, conn_id: ConnectionId, identity: Identity) -> Self {
        Self {
            state,
            conn_id,
            identity: Some(identity),
        }
    }

    /// Session that never completed authentication. The router rejects such
    /// connections before the event loop, so this exists for the state
    /// machine's awaiting-auth guard (and its tests).
    pub fn unauthenticated(state: Arc<AppState<S>>, conn_id: ConnectionId) -> Self {
        Self {
            state,
            conn_id,
            identity: None,
        }
    }

    /// Process one client event. `Ok(Some(_))` is a direct reply to the
    /// caller, `Ok(None)` means no reply (typing, mark-read). Errors are
    /// per-action: the connection stays alive and the router turns them into
    /// an `Error` event for the offending connection only.
    pub async fn handle_event(
        &mut self,
        event: ClientEvent,
    ) -> Result<Option<ServerEvent>, ChatError> {
        // awaiting-auth guard: no chat event may mutate state pre-auth
        let identity = self
            .identity
            .clone()
            .ok_or_else(|| ChatError::Auth("not authenticated".to_string()))?;

        match event {
            ClientEvent::JoinChat { chat_id } => {
                let chat = self.load_chat(&chat_id).await?;
                self.ensure_participant(&chat, &identity)?;

                self.state.registry.join(self.conn_id, &chat_id)?;
                counter!(ROOM_JOINED).increment(1);
                debug!(chat_id, user_id = %identity.id, "joined room");
                Ok(Some(ServerEvent::Joined { chat_id }))
            },

            ClientEvent::LeaveChat { chat_id } => {
                self.state.registry.leave(self.conn_id, &chat_id);
                Ok(Some(ServerEvent::Left { chat_id }))
            },

            ClientEvent::SendMessage { chat_id, content } => {
                let content = content.trim();
                if content.is_empty() {
                    return Err(ChatError::Validation(
                        "message content must not be empty".to_string(),
                    ));
                }

                let chat = self.load_chat(&chat_id).await?;
                self.ensure_participant(&chat, &identity)?;

                // Persist first; the broadcast only ever follows a
                // successful write.
                let message = self
                    .state
                    .store
                    .create_message(&chat_id, &identity.id, content)
                    .await?;
                self.state
                    .store
                    .set_last_message(&chat_id, &message.id)
                    .await?;
                counter!(MESSAGE_SENT).increment(1);

                let delivered = self.state.registry.broadcast(
                    &chat_id,
                    &ServerEvent::NewMessage {
                        message: message.clone(),
                    },
                    Some(self.conn_id),
                );
                counter!(MESSAGE_BROADCAST).increment(delivered as u64);
                debug!(chat_id, message_id = %message.id, delivered, "message persisted and broadcast");

                // The ack goes back regardless of room population.
                Ok(Some(ServerEvent::MessageAck { message }))
            },

            ClientEvent::Typing { chat_id, is_typing } => {
                // Typing must not leak to non-participants, but it is not
                // security-sensitive either: ineligible senders are dropped
                // silently rather than answered with an error.
                let Ok(Some(chat)) = self.state.store.get_chat(&chat_id).await else {
                    return Ok(None);
                };
                if !chat.has_participant(&identity.id) {
                    return Ok(None);
                }

                let delivered = self.state.registry.broadcast(
                    &chat_id,
                    &ServerEvent::UserTyping {
                        chat_id: chat_id.clone(),
                        user_id: identity.id.clone(),
                        is_typing,
                    },
                    Some(self.conn_id),
                );
                counter!(TYPING_RELAYED).increment(delivered as u64);
                Ok(None)
            },

            ClientEvent::MarkRead { chat_id } => {
                let chat = self.load_chat(&chat_id).await?;
                self.ensure_participant(&chat, &identity)?;
                self.state.store.mark_read(&chat_id, &identity.id).await?;
                Ok(None)
            },
        }
    }

    async fn load_chat(&self, chat_id: &str) -> Result<Chat, ChatError> {
        self.state
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(chat_id.to_string()))
    }

    fn ensure_participant(&self, chat: &Chat, identity: &Identity) -> Result<(), ChatError> {
        if chat.has_participant(&identity.id) {
            Ok(())
        } else {
            Err(ChatError::Unauthorized(format!(
                "{} is not a participant of {}",
                identity.id, chat.id
            )))
        }
    }
}
