// ============================
// crates/backend-lib/src/store.rs
// ============================
//! Message store abstraction with an in-memory implementation.
//!
//! The chat core treats persistence as an external collaborator: the
//! platform's document database owns chats and messages. [`MessageStore`]
//! is the seam; [`InMemoryStore`] backs the binary and the tests.

use async_trait::async_trait;
use chrono::Utc;
use homelet_common::{Chat, ChatMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ChatError;

/// Trait for message persistence backends
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message in a chat. Content is stored as given; callers
    /// validate before persisting.
    async fn create_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<ChatMessage, ChatError>;

    /// All messages of a chat, ascending by creation time.
    async fn list_messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>, ChatError>;

    /// Load a chat by id.
    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>, ChatError>;

    /// Point the chat's last-message reference at `message_id`.
    async fn set_last_message(&self, chat_id: &str, message_id: &str) -> Result<(), ChatError>;

    /// Mark messages not sent by `reader_id` as read. Returns how many
    /// messages were flipped.
    async fn mark_read(&self, chat_id: &str, reader_id: &str) -> Result<usize, ChatError>;
}

#[derive(Default)]
struct StoreInner {
    chats: HashMap<String, Chat>,
    messages: HashMap<String, Vec<ChatMessage>>,
}

/// In-memory implementation of the `MessageStore` trait
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a chat (normally created by the platform's CRUD API).
    pub async fn insert_chat(&self, chat: Chat) {
        let mut inner = self.inner.write().await;
        inner.chats.insert(chat.id.clone(), chat);
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn create_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<ChatMessage, ChatError> {
        let mut inner = self.inner.write().await;
        if !inner.chats.contains_key(chat_id) {
            return Err(ChatError::NotFound(chat_id.to_string()));
        }

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            read: false,
        };

        inner
            .messages
            .entry(chat_id.to_string())
            .or_default()
            .push(message.clone());

        Ok(message)
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let inner = self.inner.read().await;
        // Insertion order is creation order, which keeps the ascending
        // creation-time contract.
        Ok(inner.messages.get(chat_id).cloned().unwrap_or_default())
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner.chats.get(chat_id).cloned())
    }

    async fn set_last_message(&self, chat_id: &str, message_id: &str) -> Result<(), ChatError> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .get_mut(chat_id)
            .ok_or_else(|| ChatError::NotFound(chat_id.to_string()))?;

        chat.last_message = Some(message_id.to_string());
        chat.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_read(&self, chat_id: &str, reader_id: &str) -> Result<usize, ChatError> {
        let mut inner = self.inner.write().await;
        let Some(messages) = inner.messages.get_mut(chat_id) else {
            return Ok(0);
        };

        let mut flipped = 0;
        for message in messages.iter_mut() {
            if !message.read && message.sender_id != reader_id {
                message.read = true;
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}
