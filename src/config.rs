use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::time::Duration;

// Safety timeouts
pub const AUTO_STOP_TIMEOUT_MS: u64 = 2000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 3000;
pub const COMMAND_POLL_MS: u64 = 10;

// Queue sizing and admission budgets
pub const RAW_QUEUE_CAPACITY: usize = 10;
pub const PROCESSED_QUEUE_CAPACITY: usize = 5;
pub const ADMIT_WAIT_MS: u64 = 50;
pub const EMERGENCY_ADMIT_WAIT_MS: u64 = 250;

pub const STATUS_TICK_MS: u64 = 50;

// An idle operator must be stopped before the link is declared dead.
const_assert!(AUTO_STOP_TIMEOUT_MS < HEARTBEAT_TIMEOUT_MS);
const_assert!(ADMIT_WAIT_MS < EMERGENCY_ADMIT_WAIT_MS);

/// Timing and sizing parameters for the controller pipeline.
///
/// Every field has a default, so a partial JSON document only overrides
/// what it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub auto_stop_timeout_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub command_poll_ms: u64,
    pub raw_queue_capacity: usize,
    pub processed_queue_capacity: usize,
    pub admit_wait_ms: u64,
    pub emergency_admit_wait_ms: u64,
    pub status_tick_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            auto_stop_timeout_ms: AUTO_STOP_TIMEOUT_MS,
            heartbeat_timeout_ms: HEARTBEAT_TIMEOUT_MS,
            command_poll_ms: COMMAND_POLL_MS,
            raw_queue_capacity: RAW_QUEUE_CAPACITY,
            processed_queue_capacity: PROCESSED_QUEUE_CAPACITY,
            admit_wait_ms: ADMIT_WAIT_MS,
            emergency_admit_wait_ms: EMERGENCY_ADMIT_WAIT_MS,
            status_tick_ms: STATUS_TICK_MS,
        }
    }
}

impl SafetyConfig {
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.raw_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("raw command queue"));
        }
        if self.processed_queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("processed command queue"));
        }
        if self.command_poll_ms == 0 {
            return Err(ConfigError::ZeroInterval("command poll"));
        }
        if self.status_tick_ms == 0 {
            return Err(ConfigError::ZeroInterval("status tick"));
        }
        if self.auto_stop_timeout_ms >= self.heartbeat_timeout_ms {
            return Err(ConfigError::TimeoutOrder {
                auto_stop_ms: self.auto_stop_timeout_ms,
                heartbeat_ms: self.heartbeat_timeout_ms,
            });
        }
        Ok(())
    }

    pub fn command_poll(&self) -> Duration {
        Duration::from_millis(self.command_poll_ms)
    }

    pub fn admit_wait(&self) -> Duration {
        Duration::from_millis(self.admit_wait_ms)
    }

    pub fn emergency_admit_wait(&self) -> Duration {
        Duration::from_millis(self.emergency_admit_wait_ms)
    }

    pub fn status_tick(&self) -> Duration {
        Duration::from_millis(self.status_tick_ms)
    }
}
