// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between the Homelet chat client and server.
//! This module defines the websocket protocol events and the persisted
//! entities they carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a persisted chat (document id in the property database).
pub type ChatId = String;

/// Identifier of a user account.
pub type UserId = String;

/// Identifier of a persisted message.
pub type MessageId = String;

/// Role attached to a resolved identity.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tenant,
    Agent,
    Admin,
}

/// A caller's resolved identity, as returned by the identity resolver.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn new(id: impl Into<UserId>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}

/// A persisted chat between two or more participants, optionally tied to a
/// property listing.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Chat {
    pub id: ChatId,
    pub participants: Vec<UserId>,
    pub property_id: Option<String>,
    pub last_message: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(id: impl Into<ChatId>, participants: Vec<UserId>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            participants,
            property_id: None,
            last_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_property(mut self, property_id: impl Into<String>) -> Self {
        self.property_id = Some(property_id.into());
        self
    }

    /// Whether `user_id` is listed in this chat's participant set.
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

/// A persisted chat message. Immutable once created except for `read`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// Events sent from client to server over an authenticated connection.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event")]
pub enum ClientEvent {
    /// Join the room for a chat the caller participates in.
    JoinChat { chat_id: ChatId },
    /// Leave a previously joined room. Leaving a room the connection never
    /// joined is a no-op.
    LeaveChat { chat_id: ChatId },
    /// Persist a message and broadcast it to the other room members.
    SendMessage { chat_id: ChatId, content: String },
    /// Ephemeral typing indicator; relayed, never persisted.
    Typing { chat_id: ChatId, is_typing: bool },
    /// Mark the caller's unread messages in a chat as read.
    MarkRead { chat_id: ChatId },
}

/// Events sent from server to client.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// Acknowledges a successful `JoinChat`.
    Joined { chat_id: ChatId },
    /// Acknowledges a `LeaveChat`.
    Left { chat_id: ChatId },
    /// Direct acknowledgment to the sender of a `SendMessage`, carrying the
    /// persisted message. Delivered even when the sender is the only room
    /// member; the sender's UI applies this, not the broadcast.
    MessageAck { message: ChatMessage },
    /// Broadcast to every other member of the room when a message is
    /// persisted. The sender is always excluded (it already has the ack).
    NewMessage { message: ChatMessage },
    /// Typing indicator relayed to the other room members.
    UserTyping {
        chat_id: ChatId,
        user_id: UserId,
        is_typing: bool,
    },
    /// Protocol-level failure, delivered only to the offending connection.
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_serialization() {
        let send = ClientEvent::SendMessage {
            chat_id: "chat-1".to_string(),
            content: "Hello".to_string(),
        };

        let json = serde_json::to_string(&send).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["event"], "SendMessage");
        assert_eq!(parsed["chat_id"], "chat-1");
        assert_eq!(parsed["content"], "Hello");

        let back: ClientEvent = serde_json::from_str(&json).unwrap();
        match back {
            ClientEvent::SendMessage { chat_id, content } => {
                assert_eq!(chat_id, "chat-1");
                assert_eq!(content, "Hello");
            },
            other => panic!("Wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_typing_event_roundtrip() {
        let json = r#"{"event":"Typing","chat_id":"c1","is_typing":true}"#;
        let parsed: ClientEvent = serde_json::from_str(json).unwrap();
        match parsed {
            ClientEvent::Typing { chat_id, is_typing } => {
                assert_eq!(chat_id, "c1");
                assert!(is_typing);
            },
            other => panic!("Wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_tag() {
        let event = ServerEvent::UserTyping {
            chat_id: "c1".to_string(),
            user_id: "u2".to_string(),
            is_typing: false,
        };
        let parsed: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(parsed["event"], "UserTyping");
        assert_eq!(parsed["is_typing"], false);
    }

    #[test]
    fn test_chat_participant_lookup() {
        let chat =
            Chat::new("c1", vec!["u1".to_string(), "u2".to_string()]).with_property("prop-9");
        assert!(chat.has_participant("u1"));
        assert!(chat.has_participant("u2"));
        assert!(!chat.has_participant("u3"));
        assert_eq!(chat.property_id.as_deref(), Some("prop-9"));
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Agent).unwrap(), "\"agent\"");
        let role: Role = serde_json::from_str("\"tenant\"").unwrap();
        assert_eq!(role, Role::Tenant);
    }
}
