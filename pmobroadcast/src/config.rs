//! Engine configuration
//!
//! A single serde-deserializable struct with per-field defaults. The config
//! can be loaded from a YAML file (path given explicitly or through the
//! `PMOBROADCAST_CONFIG` environment variable); any missing field falls back
//! to its default, so an empty file is a valid configuration.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the YAML config file
pub const ENV_CONFIG_PATH: &str = "PMOBROADCAST_CONFIG";

const DEFAULT_BITRATE: u32 = 64;
const DEFAULT_VOLUME: f32 = 0.5;
const DEFAULT_ERROR_CLIP_URL: &str = "https://cdn.homer.radio/assets/radios/ERROR.mp3";
const DEFAULT_FEED_BUFFER_CHUNKS: usize = 64;
const DEFAULT_EVENT_BUFFER: usize = 256;
const DEFAULT_RECLAIM_GRACE_SECS: u64 = 30;
const DEFAULT_RECLAIM_INTERVAL_SECS: u64 = 60;
const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 10;

/// Configuration for the broadcast engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Target bitrate in kbps handed to the voice backend
    pub bitrate: u32,
    /// Initial per-session volume in [0, 1]
    pub default_volume: f32,
    /// URL of the short "service error" clip played on upstream failure
    pub error_clip_url: String,
    /// Capacity of the shared audio feed channel, in chunks
    pub feed_buffer_chunks: usize,
    /// Capacity of the engine event channel
    pub event_buffer: usize,
    /// Seconds an empty broadcast survives before idle reclamation
    /// (0 = reclaimed on the first sweep after it empties)
    pub reclaim_grace_secs: u64,
    /// Cadence of the periodic idle-reclamation sweep, in seconds
    pub reclaim_interval_secs: u64,
    /// Upper bound on waiting for the fallback clip to finish, in seconds
    pub recovery_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bitrate: DEFAULT_BITRATE,
            default_volume: DEFAULT_VOLUME,
            error_clip_url: DEFAULT_ERROR_CLIP_URL.to_string(),
            feed_buffer_chunks: DEFAULT_FEED_BUFFER_CHUNKS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            reclaim_grace_secs: DEFAULT_RECLAIM_GRACE_SECS,
            reclaim_interval_secs: DEFAULT_RECLAIM_INTERVAL_SECS,
            recovery_timeout_secs: DEFAULT_RECOVERY_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("cannot read config file {}", path.as_ref().display())
        })?;
        let config = serde_yaml::from_str(&text).context("invalid engine configuration")?;
        Ok(config)
    }

    /// Load configuration from the `PMOBROADCAST_CONFIG` file if set,
    /// otherwise return the defaults
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) if !path.is_empty() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Grace period before an empty broadcast is reclaimed
    pub fn reclaim_grace(&self) -> Duration {
        Duration::from_secs(self.reclaim_grace_secs)
    }

    /// Periodic reclamation sweep interval
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }

    /// Bound on the fallback-clip wait during failure recovery
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}
