// ============================
// crates/backend-bin/src/main.rs
// ============================
//! Homelet chat server binary.
//!
//! Runs the websocket chat backend against the in-memory store with a
//! token-table identity resolver. A demo chat and two identities are seeded
//! at startup and their tokens logged, so a local client can connect with
//! `ws://<bind_addr>/ws?token=<token>`.

use std::sync::Arc;

use anyhow::Context;
use homelet_backend_lib::auth::SessionResolver;
use homelet_backend_lib::config::Settings;
use homelet_backend_lib::store::InMemoryStore;
use homelet_backend_lib::ws_router::create_router;
use homelet_backend_lib::AppState;
use homelet_common::{Chat, Identity, Role};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_level.clone().into()),
        )
        .init();

    let store = InMemoryStore::new();
    let resolver = SessionResolver::new();
    seed_demo_data(&store, &resolver).await;

    let bind_addr = settings.bind_addr;
    let state = Arc::new(AppState::new(store, Arc::new(resolver), settings));

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(%bind_addr, "chat server listening");

    axum::serve(listener, app)
        .await
        .context("server terminated")?;
    Ok(())
}

/// Seed a tenant/agent chat so a fresh server is immediately usable.
async fn seed_demo_data(store: &InMemoryStore, resolver: &SessionResolver) {
    store
        .insert_chat(
            Chat::new(
                "demo-chat",
                vec!["tenant-1".to_string(), "agent-1".to_string()],
            )
            .with_property("property-1"),
        )
        .await;

    let tenant_token = resolver.issue(Identity::new("tenant-1", Role::Tenant)).await;
    let agent_token = resolver.issue(Identity::new("agent-1", Role::Agent)).await;
    info!(chat_id = "demo-chat", %tenant_token, %agent_token, "seeded demo chat");
}
