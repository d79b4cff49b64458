//! Configuration for the bridge and its adapters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a [`Bridge`](crate::bridge::Bridge).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Maximum number of history entries kept for edit/delete/reply tracking.
    /// The oldest entry is dropped when the cap is exceeded.
    pub max_history: usize,
    /// Deadline for each per-sibling send/edit/delete during relay
    /// (milliseconds). Caps head-of-line blocking when one service stalls.
    pub relay_timeout_ms: u64,
    /// Capacity of the event multiplexer queue. When the relay is saturated,
    /// polling tasks block on push, which flow-controls the upstream service.
    pub mux_buffer_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_history: 500,
            relay_timeout_ms: 1_000,
            mux_buffer_size: 100,
        }
    }
}

impl BridgeConfig {
    /// Validate the configuration, returning the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_history == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_history".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.relay_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "relay_timeout_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.mux_buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "mux_buffer_size".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// The per-sibling relay deadline as a [`Duration`].
    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }
}

/// Configuration for the Telegram client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Long-poll timeout passed to `getUpdates` (seconds).
    pub long_poll_seconds: u64,
    /// Minimum interval between profile-photo refreshes per user (seconds).
    pub min_photo_update_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            long_poll_seconds: 100,
            min_photo_update_secs: 30 * 60,
        }
    }
}

impl TelegramConfig {
    /// The per-user photo refresh interval as a [`Duration`].
    pub fn min_photo_update_interval(&self) -> Duration {
        Duration::from_secs(self.min_photo_update_secs)
    }
}
