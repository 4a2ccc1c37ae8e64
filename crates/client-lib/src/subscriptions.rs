// ============================
// crates/client-lib/src/subscriptions.rs
// ============================
//! Token-based event subscription registry.
//!
//! UI layers register a callback for the kind of traffic they care about
//! (messages, typing, transport errors, or everything) and hold on to the
//! returned token; dropping interest is an explicit `unsubscribe`, so a
//! forgotten token never leaves a dangling callback firing into a dead view.
//! Tokens share one id space, so `unsubscribe` works regardless of kind.

use homelet_common::{ChatMessage, ServerEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::ClientError;

enum Handler {
    /// Every server event, unfiltered.
    Event(Box<dyn Fn(&ServerEvent) + Send + Sync>),
    /// Persisted messages only: `MessageAck` (own sends) and `NewMessage`
    /// (others' sends). Exactly one per message per connection.
    Message(Box<dyn Fn(&ChatMessage) + Send + Sync>),
    /// `UserTyping` relays as `(chat_id, user_id, is_typing)`.
    Typing(Box<dyn Fn(&str, &str, bool) + Send + Sync>),
    /// Transport-level failures from the connection loop.
    Error(Box<dyn Fn(&ClientError) + Send + Sync>),
}

/// Handle identifying one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

#[derive(Default)]
pub struct Subscriptions {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<u64, Handler>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, handler: Handler) -> SubscriptionToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self.handlers.lock().expect("subscriptions lock poisoned");
        handlers.insert(id, handler);
        SubscriptionToken(id)
    }

    pub fn subscribe(
        &self,
        handler: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.insert(Handler::Event(Box::new(handler)))
    }

    pub fn subscribe_messages(
        &self,
        handler: impl Fn(&ChatMessage) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.insert(Handler::Message(Box::new(handler)))
    }

    pub fn subscribe_typing(
        &self,
        handler: impl Fn(&str, &str, bool) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.insert(Handler::Typing(Box::new(handler)))
    }

    pub fn subscribe_errors(
        &self,
        handler: impl Fn(&ClientError) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.insert(Handler::Error(Box::new(handler)))
    }

    /// Remove a callback of any kind. Unknown tokens are a no-op.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let mut handlers = self.handlers.lock().expect("subscriptions lock poisoned");
        handlers.remove(&token.0);
    }

    /// Route a server event to the interested callbacks.
    pub fn dispatch_event(&self, event: &ServerEvent) {
        let handlers = self.handlers.lock().expect("subscriptions lock poisoned");
        for handler in handlers.values() {
            match handler {
                Handler::Event(f) => f(event),
                Handler::Message(f) => match event {
                    ServerEvent::MessageAck { message }
                    | ServerEvent::NewMessage { message } => f(message),
                    _ => {},
                },
                Handler::Typing(f) => {
                    if let ServerEvent::UserTyping {
                        chat_id,
                        user_id,
                        is_typing,
                    } = event
                    {
                        f(chat_id, user_id, *is_typing);
                    }
                },
                Handler::Error(_) => {},
            }
        }
    }

    /// Route a transport failure to the error callbacks.
    pub fn dispatch_error(&self, error: &ClientError) {
        let handlers = self.handlers.lock().expect("subscriptions lock poisoned");
        for handler in handlers.values() {
            if let Handler::Error(f) = handler {
                f(error);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().expect("subscriptions lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
