use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry delay parameters for exponential backoff.
///
/// The computed delay is a value handed to the embedding system's scheduler;
/// the queue never sleeps on it. Millisecond values use u32, which fits
/// exactly in f64.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Initial delay between retries in milliseconds.
    pub base_delay_ms: u32,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff (must be positive).
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,  // 1 second
            max_delay_ms: 60_000, // 60 seconds
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a new `RetryPolicy` with the specified parameters.
    #[must_use]
    pub const fn new(base_delay_ms: u32, max_delay_ms: u32, backoff_factor: f64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            backoff_factor,
        }
    }

    /// Calculates the delay before a retry attempt.
    ///
    /// # Arguments
    /// * `attempt` - The retry attempt number (0-indexed, so the first retry
    ///   is attempt 0 and waits `base_delay_ms`)
    ///
    /// # Returns
    /// `min(base_delay_ms * backoff_factor^attempt, max_delay_ms)` as a
    /// duration.
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        // Cap the exponent: with factor 2 an exponent of 30 is already over
        // a billion times the base, far past any sane max_delay_ms.
        const MAX_EXP: i32 = 30;
        let exp = i32::try_from(attempt).map_or(MAX_EXP, |e| e.min(MAX_EXP));
        let base_ms = f64::from(self.base_delay_ms) * self.backoff_factor.powi(exp);
        let capped_ms = base_ms.min(f64::from(self.max_delay_ms));
        Duration::from_millis(f64_to_u64_saturating(capped_ms))
    }
}

/// Converts f64 milliseconds to u64 with saturation.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn f64_to_u64_saturating(val: f64) -> u64 {
    if !val.is_finite() || val < 0.0 {
        0
    } else if val >= f64::from(u32::MAX) {
        u64::from(u32::MAX)
    } else {
        val as u64
    }
}
