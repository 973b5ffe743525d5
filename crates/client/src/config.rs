// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration.
//!
//! Loaded from a TOML file; every field except `url` has a default:
//!
//! ```toml
//! url = "ws://localhost:7890"
//! namespace = "ledger"
//! offline_policy = "keep_applied"
//!
//! [reconnect]
//! initial_delay_ms = 1000
//! multiplier = 2
//! max_delay_ms = 8000
//! max_attempts = 0
//!
//! [merge]
//! strategy = "last_write_wins"
//! fields = { id = "id", timestamp = "updatedAt" }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_core::MergeOptions;

use crate::backoff::{Backoff, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MULTIPLIER};
use crate::connection::ConnectionConfig;
use crate::error::{Error, Result};

const DATA_DIR_NAME: &str = "tally";

/// What to do with an optimistic update made while offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflinePolicy {
    /// Keep the update applied and pending until the queued event replays.
    #[default]
    KeepApplied,
    /// Queue nothing and roll the update back.
    Rollback,
}

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Peer URL (`ws://` or `wss://`).
    pub url: String,
    /// Namespace announced in the handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Directory for the offline queue (default: platform data dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Transport connect plus handshake limit (default: 20000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Heartbeat ping interval in milliseconds (default: 25000). 0 = disabled.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Max time to wait for an acknowledgement (default: 10000).
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Periodic full sync in seconds while connected. 0 = only on connect.
    #[serde(default)]
    pub resync_interval_secs: u64,
    #[serde(default)]
    pub offline_policy: OfflinePolicy,
    #[serde(default)]
    pub merge: MergeOptions,
}

/// Reconnect schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Reconnect attempts before giving up (default: 0 = unlimited).
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial_delay_ms: self.initial_delay_ms,
            multiplier: self.multiplier,
            max_delay_ms: self.max_delay_ms,
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    DEFAULT_INITIAL_DELAY_MS
}

fn default_multiplier() -> u32 {
    DEFAULT_MULTIPLIER
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

fn default_heartbeat_interval_ms() -> u64 {
    25_000
}

fn default_ack_timeout_ms() -> u64 {
    10_000
}

impl ClientConfig {
    /// Config with defaults for everything but the URL.
    pub fn new(url: impl Into<String>) -> Self {
        ClientConfig {
            url: url.into(),
            namespace: None,
            storage_dir: None,
            reconnect: ReconnectConfig::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            resync_interval_secs: 0,
            offline_policy: OfflinePolicy::default(),
            merge: MergeOptions::default(),
        }
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Checks values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "invalid url '{}': must start with ws:// or wss://",
                self.url
            )));
        }
        if self.reconnect.multiplier == 0 {
            return Err(Error::Config("reconnect.multiplier must be at least 1".into()));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(Error::Config(
                "reconnect.initial_delay_ms exceeds reconnect.max_delay_ms".into(),
            ));
        }
        if self.ack_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be greater than zero".into()));
        }
        Ok(())
    }

    /// Connection manager settings derived from this config.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.url.clone(),
            namespace: self.namespace.clone(),
            backoff: self.reconnect.backoff(),
            max_attempts: self.reconnect.max_attempts,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
        }
    }

    /// Periodic resync interval, if enabled.
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }

    /// Where the offline queue lives.
    ///
    /// Falls back to `./.tally` when the platform has no data directory.
    pub fn storage_dir(&self) -> PathBuf {
        if let Some(dir) = &self.storage_dir {
            return dir.clone();
        }
        let base = match dirs::data_local_dir() {
            Some(dir) => dir.join(DATA_DIR_NAME),
            None => PathBuf::from(format!(".{DATA_DIR_NAME}")),
        };
        match &self.namespace {
            Some(ns) => base.join(ns),
            None => base,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
