//! # Radio Configuration
//!
//! Driver and simulator settings, loadable from JSON:
//!
//! ```json
//! {
//!   "driver": { "event_queue_capacity": 64, "max_packet_len": 255 },
//!   "simulator": { "noise_floor_dbm": -110.0, "hardware_crc": true }
//! }
//! ```
//!
//! Every field is optional and falls back to its default.

use crate::radio::hal::SimConfig;
use crate::radio::packet::MAX_PACKET_LEN;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Configuration for `RadioDriver`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Depth of the hardware event queue
    pub event_queue_capacity: usize,
    /// Longest payload accepted by `send_packet` (also capped by the transceiver)
    pub max_packet_len: usize,
    /// Window of the rate limit on dropped-reception warnings
    pub drop_log_window_ms: u64,
    /// Warnings allowed per window
    pub drop_log_cap: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 64,
            max_packet_len: MAX_PACKET_LEN,
            drop_log_window_ms: 1000,
            drop_log_cap: 5,
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_packet_len == 0 || self.max_packet_len > MAX_PACKET_LEN {
            return Err(ConfigError::Invalid(format!(
                "max_packet_len must be within 1..={MAX_PACKET_LEN}"
            )));
        }
        Ok(())
    }
}

/// Combined settings file for the driver and the simulated transceiver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioSettings {
    pub driver: DriverConfig,
    pub simulator: SimConfig,
}

impl RadioSettings {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: RadioSettings = serde_json::from_str(json)?;
        settings.driver.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
