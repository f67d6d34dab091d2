//! Coordinator configuration.

use serde::{Deserialize, Serialize};

/// Tuning knobs for the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// How often the started poll loop runs a matching pass, in
    /// milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Capacity of the lifecycle event ring buffer.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// How many pending tasks a matching pass inspects per page.
    #[serde(default = "default_match_page")]
    pub match_page: u32,

    /// Heartbeat age in milliseconds after which a worker counts as
    /// unhealthy.
    #[serde(default = "default_heartbeat_threshold_ms")]
    pub heartbeat_threshold_ms: u64,
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_event_capacity() -> usize {
    256
}

const fn default_match_page() -> u32 {
    64
}

const fn default_heartbeat_threshold_ms() -> u64 {
    30_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            event_capacity: default_event_capacity(),
            match_page: default_match_page(),
            heartbeat_threshold_ms: default_heartbeat_threshold_ms(),
        }
    }
}

impl CoordinatorConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be at least 1".to_string());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be at least 1".to_string());
        }
        if self.match_page == 0 {
            return Err("match_page must be at least 1".to_string());
        }
        Ok(())
    }
}
