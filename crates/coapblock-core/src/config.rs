//! Configuration for the coapblock client.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $COAPBLOCK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/coapblock/config.toml
//!   3. ~/.config/coapblock/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::block::BlockSize;
use crate::wire::DEFAULT_PORT;

/// Fixed header plus payload marker: the least any request with a payload
/// costs on top of its payload bytes.
const MIN_MESSAGE_OVERHEAD: usize = 5;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub transport: TransportConfig,
    pub transfer: TransferConfig,
    pub breaker: BreakerConfig,
}

/// Confirmable-message timing (RFC 7252 §4.8) and datagram limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Port used when a URL does not name one.
    pub port: u16,
    /// Initial retransmission timeout for confirmable requests.
    pub ack_timeout_ms: u64,
    /// Initial timeout is randomised in [ack_timeout, ack_timeout * factor].
    pub ack_random_factor: f64,
    /// Retransmissions after the first send before giving up.
    pub max_retransmit: u32,
    /// How long to wait for a separate or non-confirmable response.
    pub response_timeout_ms: u64,
    /// Largest datagram the transport will send.
    pub max_packet_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Block1 block size in bytes. Power of two, 16..=1024.
    pub block_size: usize,
    /// Payloads up to this many bytes go out in one request, no Block1.
    pub max_single_payload: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Transport failures tolerated before the breaker trips. 0 = disabled.
    pub max_failures: u32,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            transfer: TransferConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            ack_timeout_ms: 2_000,
            ack_random_factor: 1.5,
            max_retransmit: 4,
            response_timeout_ms: 30_000,
            max_packet_size: 1152,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: 1024,
            max_single_payload: 1024,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { max_failures: 20 }
    }
}

impl TransportConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl TransferConfig {
    pub fn block_size(&self) -> Result<BlockSize, ConfigError> {
        BlockSize::from_bytes(self.block_size).ok_or(ConfigError::InvalidBlockSize(self.block_size))
    }
}

// ── Path helpers ─────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("coapblock")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ───────────────────────────────────────────────────────────────────

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
    #[error("block size {0} is not a power of two between 16 and 1024")]
    InvalidBlockSize(usize),
    #[error("ack_random_factor {0} must be finite and at least 1.0")]
    InvalidRandomFactor(f64),
    #[error("max_single_payload {single} exceeds block_size {block}")]
    SinglePayloadAboveBlockSize { single: usize, block: usize },
    #[error("{field} = {value} leaves no room for headers within max_packet_size {max}")]
    ExceedsPacketSize {
        field: &'static str,
        value: usize,
        max: usize,
    },
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl ClientConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit file. A missing file means defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            ClientConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the transport could not honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let block = self.transfer.block_size()?.bytes();
        let single = self.transfer.max_single_payload;
        let max = self.transport.max_packet_size;

        if single > block {
            return Err(ConfigError::SinglePayloadAboveBlockSize { single, block });
        }
        // Payload plus the fixed header alone must already fit.
        for (field, value) in [("block_size", block), ("max_single_payload", single)] {
            if value + MIN_MESSAGE_OVERHEAD > max {
                return Err(ConfigError::ExceedsPacketSize { field, value, max });
            }
        }

        let factor = self.transport.ack_random_factor;
        let max_initial = self.transport.ack_timeout().as_secs_f64() * factor;
        if !factor.is_finite() || factor < 1.0 || Duration::try_from_secs_f64(max_initial).is_err() {
            return Err(ConfigError::InvalidRandomFactor(factor));
        }
        Ok(())
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("COAPBLOCK_CONFIG")
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
            let text = toml::to_string_pretty(&ClientConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply COAPBLOCK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(p) = env_parse("COAPBLOCK_TRANSPORT__PORT") {
            self.transport.port = p;
        }
        if let Some(ms) = env_parse("COAPBLOCK_TRANSPORT__ACK_TIMEOUT_MS") {
            self.transport.ack_timeout_ms = ms;
        }
        if let Some(n) = env_parse("COAPBLOCK_TRANSPORT__MAX_RETRANSMIT") {
            self.transport.max_retransmit = n;
        }
        if let Some(size) = env_parse("COAPBLOCK_TRANSFER__BLOCK_SIZE") {
            self.transfer.block_size = size;
        }
        if let Some(n) = env_parse("COAPBLOCK_BREAKER__MAX_FAILURES") {
            self.breaker.max_failures = n;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
