// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Log level
    pub log_level: String,
    /// Keep-alive ping interval in seconds
    pub ping_interval_secs: u64,
    /// Idle timeout in seconds after which a half-open connection is pruned
    pub idle_timeout_secs: u64,
    /// Per-connection outbox capacity (queued server events)
    pub outbox_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".parse().unwrap(),
            log_level: "info".to_string(),
            ping_interval_secs: 25,
            idle_timeout_secs: 60,
            outbox_capacity: 64,
        }
    }
}

impl Settings {
    /// Load settings from `homelet.toml` merged with `HOMELET_`-prefixed
    /// environment variables. Missing sources fall back to defaults.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("homelet.toml"))
            .merge(Env::prefixed("HOMELET_"))
            .extract()
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
