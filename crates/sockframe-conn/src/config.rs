use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sockframe_frame::{FrameConfig, DEFAULT_COOKIE};

use crate::stats::EventStats;

/// Tunables shared by every connection in a process.
///
/// Built once at startup and handed to connections through a
/// [`ConnectionContext`]. Missing JSON fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Connect attempts used when a caller passes a negative retry count.
    pub connect_num_attempts: i32,
    /// Delay between connect attempts used when a caller passes a negative timeout.
    pub connect_timeout_ms: i64,
    /// Protocol cookie written into and required on every frame.
    pub cookie: i64,
    /// Message handlers running longer than this are logged.
    pub handler_warning_timeout_ms: i64,
    /// Record execution statistics for completion handlers.
    pub event_stats: bool,
    /// Maximum queued writes flushed by one transport write.
    pub async_write_max_messages: usize,
    /// Queue depth above which power-of-two depths are logged.
    pub queue_warning_threshold: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_num_attempts: 10,
            connect_timeout_ms: 1000,
            cookie: DEFAULT_COOKIE,
            handler_warning_timeout_ms: 1000,
            event_stats: false,
            async_write_max_messages: 1,
            queue_warning_threshold: 1000,
        }
    }
}

impl ConnectionConfig {
    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no connection can operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_num_attempts <= 0 {
            return Err(ConfigError::Invalid(format!(
                "connect_num_attempts must be positive, got {}",
                self.connect_num_attempts
            )));
        }
        if self.connect_timeout_ms < 0 {
            return Err(ConfigError::Invalid(format!(
                "connect_timeout_ms must not be negative, got {}",
                self.connect_timeout_ms
            )));
        }
        if self.async_write_max_messages == 0 {
            return Err(ConfigError::Invalid(
                "async_write_max_messages must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Frame-layer view of this configuration.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig::with_cookie(self.cookie)
    }
}

/// Errors loading or validating a [`ConnectionConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration plus process-wide instrumentation, shared by handle.
#[derive(Debug)]
pub struct ConnectionContext {
    config: ConnectionConfig,
    stats: EventStats,
}

impl ConnectionContext {
    /// Wrap a configuration for sharing across connections.
    pub fn new(config: ConnectionConfig) -> Arc<Self> {
        let stats = EventStats::new(config.event_stats);
        Arc::new(Self { config, stats })
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Handler execution statistics.
    pub fn stats(&self) -> &EventStats {
        &self.stats
    }
}

impl Default for ConnectionContext {
    fn default() -> Self {
        Self {
            config: ConnectionConfig::default(),
            stats: EventStats::new(false),
        }
    }
}
