//! Configuration for the RMA engine and its tools.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RIDGE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ridge/config.toml
//!   3. ~/.config/ridge/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RidgeConfig {
    pub rma: RmaConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RmaConfig {
    /// Byte budget of one streaming unit for accumulate-family operations.
    pub stream_unit_bytes: usize,
    /// Wait for local completion of each replace-op unit before the next.
    pub replace_ordering: bool,
    /// Poll attempts before a replace-op wait gives up. 0 = unbounded.
    pub completion_spin_limit: u64,
    /// Cap on live requests. 0 = unlimited.
    pub max_live_requests: usize,
}

/// Used by the loopback transport; real transports advertise their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest message sent eagerly. Larger get responses go rendezvous.
    pub eager_max_msg_size: usize,
    /// Whether the transport packs non-contiguous buffers itself.
    pub non_contiguous: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RmaConfig {
    fn default() -> Self {
        Self {
            stream_unit_bytes: 65_536,
            replace_ordering: true,
            completion_spin_limit: 0,
            max_live_requests: 0,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            eager_max_msg_size: 16_384,
            non_contiguous: true,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ridge")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RidgeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            RidgeConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&RidgeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// A zero streaming budget can never hold an element.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rma.stream_unit_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "rma.stream_unit_bytes",
                "must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Apply RIDGE_* overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("RIDGE_RMA__STREAM_UNIT_BYTES") {
            if let Ok(n) = v.parse() {
                self.rma.stream_unit_bytes = n;
            }
        }
        if let Some(v) = lookup("RIDGE_RMA__REPLACE_ORDERING") {
            self.rma.replace_ordering = v == "true" || v == "1";
        }
        if let Some(v) = lookup("RIDGE_RMA__COMPLETION_SPIN_LIMIT") {
            if let Ok(n) = v.parse() {
                self.rma.completion_spin_limit = n;
            }
        }
        if let Some(v) = lookup("RIDGE_RMA__MAX_LIVE_REQUESTS") {
            if let Ok(n) = v.parse() {
                self.rma.max_live_requests = n;
            }
        }
        if let Some(v) = lookup("RIDGE_TRANSPORT__EAGER_MAX_MSG_SIZE") {
            if let Ok(n) = v.parse() {
                self.transport.eager_max_msg_size = n;
            }
        }
        if let Some(v) = lookup("RIDGE_TRANSPORT__NON_CONTIGUOUS") {
            self.transport.non_contiguous = v == "true" || v == "1";
        }
    }
}
