//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! Command-line flags are applied on top in `main.rs`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use webmpc_core::BridgeConfig;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address (`:8080`, `127.0.0.1:8080`) or Unix socket path (`/run/webmpc.sock`).
    /// Override: `WEBMPC_LISTEN`
    pub listen: String,

    /// Directory the browser UI is served from.
    /// Override: `WEBMPC_ROOT`
    pub root: PathBuf,

    /// `host:port` of the MPD daemon.
    /// Override: `WEBMPC_ADDR`
    pub addr: String,

    /// MPD password. Empty means none.
    /// Override: `WEBMPC_PASSWD`
    pub passwd: Option<String>,

    /// Override: `WEBMPC_IDLE_TIMEOUT_MS`
    pub idle_timeout_ms: u64,

    /// Override: `WEBMPC_COMMAND_TIMEOUT_MS`
    pub command_timeout_ms: u64,

    pub reconnect_min_ms: u64,

    pub reconnect_max_ms: u64,

    /// Override: `WEBMPC_SESSION_QUEUE_CAPACITY`
    pub session_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let bridge = BridgeConfig::default();
        Self {
            listen: ":8080".to_string(),
            root: PathBuf::from("./html"),
            addr: bridge.address,
            passwd: None,
            idle_timeout_ms: bridge.idle_timeout_ms,
            command_timeout_ms: bridge.command_timeout_ms,
            reconnect_min_ms: bridge.reconnect_min_ms,
            reconnect_max_ms: bridge.reconnect_max_ms,
            session_queue_capacity: bridge.session_queue_capacity,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`. Unparseable numbers are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("WEBMPC_LISTEN") {
            self.listen = val;
        }
        if let Some(val) = lookup("WEBMPC_ROOT") {
            self.root = PathBuf::from(val);
        }
        if let Some(val) = lookup("WEBMPC_ADDR") {
            self.addr = val;
        }
        if let Some(val) = lookup("WEBMPC_PASSWD") {
            self.passwd = Some(val);
        }
        if let Some(ms) = lookup("WEBMPC_IDLE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.idle_timeout_ms = ms;
        }
        if let Some(ms) = lookup("WEBMPC_COMMAND_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.command_timeout_ms = ms;
        }
        if let Some(n) = lookup("WEBMPC_SESSION_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
            self.session_queue_capacity = n;
        }
    }

    /// Converts to webmpc-core's [`BridgeConfig`].
    pub fn to_bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            idle_timeout_ms: self.idle_timeout_ms,
            command_timeout_ms: self.command_timeout_ms,
            reconnect_min_ms: self.reconnect_min_ms,
            reconnect_max_ms: self.reconnect_max_ms,
            session_queue_capacity: self.session_queue_capacity,
            ..BridgeConfig::new(self.addr.clone(), self.passwd.clone())
        }
    }
}
