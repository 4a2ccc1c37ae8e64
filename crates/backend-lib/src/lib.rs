// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Realtime chat backend for the Homelet property platform.
//!
//! The library wires four pieces together: the connection registry
//! ([`registry`]), the per-connection protocol handler ([`protocol`]), the
//! persistence seam ([`store`]) and the websocket router ([`ws_router`]).
//! Binaries construct an [`AppState`] and hand it to
//! [`ws_router::create_router`].

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod ws_router;

use std::sync::Arc;

use auth::IdentityResolver;
use config::Settings;
use registry::ConnectionRegistry;

/// Application state shared across all handlers
pub struct AppState<S> {
    pub registry: ConnectionRegistry,
    pub store: S,
    pub identity: Arc<dyn IdentityResolver>,
    pub settings: Settings,
}

impl<S> AppState<S> {
    pub fn new(store: S, identity: Arc<dyn IdentityResolver>, settings: Settings) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            store,
            identity,
            settings,
        }
    }
}
