// ============================
// crates/backend-lib/src/auth.rs
// ============================
//! Identity resolution.
//!
//! Session issuance itself lives outside this service (the platform's auth
//! API hands tokens to browsers); the chat layer only needs to turn the
//! credential presented during the websocket handshake into an [`Identity`].

use async_trait::async_trait;
use homelet_common::Identity;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ChatError;

/// Resolves a bearer credential into the caller's identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<Identity, ChatError>;
}

/// Token-table resolver backing the binary and the tests.
///
/// `issue` hands out an opaque token for an identity; `resolve` looks it up.
/// A production deployment would substitute a resolver that validates the
/// platform's signed session tokens instead.
#[derive(Clone, Default)]
pub struct SessionResolver {
    tokens: Arc<RwLock<HashMap<String, Identity>>>,
}

impl SessionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new opaque token for `identity`.
    pub async fn issue(&self, identity: Identity) -> String {
        let token = Uuid::new_v4().to_string();
        let mut tokens = self.tokens.write().await;
        tokens.insert(token.clone(), identity);
        token
    }

    /// Invalidate a previously issued token. Unknown tokens are a no-op.
    pub async fn revoke(&self, token: &str) {
        let mut tokens = self.tokens.write().await;
        tokens.remove(token);
    }
}

#[async_trait]
impl IdentityResolver for SessionResolver {
    async fn resolve(&self, credential: &str) -> Result<Identity, ChatError> {
        let tokens = self.tokens.read().await;
        tokens
            .get(credential)
            .cloned()
            .ok_or_else(|| ChatError::Auth("unknown or expired credential".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homelet_common::Role;

    #[tokio::test]
    async fn test_issue_and_resolve() {
        let resolver = SessionResolver::new();
        let token = resolver.issue(Identity::new("u1", Role::Tenant)).await;

        let identity = resolver.resolve(&token).await.unwrap();
        assert_eq!(identity.id, "u1");
        assert_eq!(identity.role, Role::Tenant);
    }

    #[tokio::test]
    async fn test_unknown_credential_is_auth_error() {
        let resolver = SessionResolver::new();
        let err = resolver.resolve("not-a-token").await.unwrap_err();
        assert!(matches!(err, ChatError::Auth(_)));
    }

    #[tokio::test]
    async fn test_revoked_credential_no_longer_resolves() {
        let resolver = SessionResolver::new();
        let token = resolver.issue(Identity::new("u2", Role::Agent)).await;
        resolver.revoke(&token).await;
        assert!(resolver.resolve(&token).await.is_err());
    }
}
