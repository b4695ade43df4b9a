//! Bridge configuration.
//!
//! [`BridgeConfig`] is what the facade is constructed from: the daemon
//! address and credential plus the timings that bound every wait in the
//! bridge. All fields have defaults so a config file only needs to name
//! what it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Configuration for a [`Bridge`](crate::Bridge).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// `host:port` of the MPD daemon.
    pub address: String,

    /// Pre-shared credential sent with `password` right after connecting.
    /// `None` skips authentication entirely.
    pub password: Option<String>,

    /// Upper bound on one `idle` wait before the link re-checks its queue (ms).
    pub idle_timeout_ms: u64,

    /// Upper bound on one command round trip, including connect (ms).
    pub command_timeout_ms: u64,

    /// First reconnect delay after a link failure (ms).
    pub reconnect_min_ms: u64,

    /// Cap on the exponential reconnect delay (ms).
    pub reconnect_max_ms: u64,

    /// Broadcast frames buffered per session before it is dropped.
    pub session_queue_capacity: usize,

    /// Diagnostic events retained for late subscribers.
    pub log_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6600".to_string(),
            password: None,
            idle_timeout_ms: 30_000,
            command_timeout_ms: 10_000,
            reconnect_min_ms: 250,
            reconnect_max_ms: 10_000,
            session_queue_capacity: 64,
            log_capacity: 256,
        }
    }
}

impl BridgeConfig {
    /// Creates a config for the given daemon address and optional credential,
    /// with default timings.
    pub fn new(address: impl Into<String>, password: Option<String>) -> Self {
        Self {
            address: address.into(),
            password: password.filter(|p| !p.is_empty()),
            ..Default::default()
        }
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] if any value would cause runtime issues.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.address.trim().is_empty() {
            return Err(BridgeError::Config("address must not be empty".into()));
        }
        if self.idle_timeout_ms == 0 {
            return Err(BridgeError::Config("idle_timeout_ms must be >= 1".into()));
        }
        if self.command_timeout_ms == 0 {
            return Err(BridgeError::Config("command_timeout_ms must be >= 1".into()));
        }
        if self.reconnect_min_ms == 0 || self.reconnect_min_ms > self.reconnect_max_ms {
            return Err(BridgeError::Config(
                "reconnect_min_ms must be >= 1 and <= reconnect_max_ms".into(),
            ));
        }
        if self.session_queue_capacity == 0 {
            return Err(BridgeError::Config(
                "session_queue_capacity must be >= 1 (mpsc::channel panics on 0)".into(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(BridgeError::Config(
                "log_capacity must be >= 1 (broadcast::channel panics on 0)".into(),
            ));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}
