//! Reconnection policy and backoff calculation.
//!
//! The connection supervisor in `tether-client` owns the async retry loop;
//! this module holds the portable pieces:
//!
//! - [`ReconnectPolicy`]: attempt bound, delays, and strategy
//! - [`BackoffStrategy`]: fixed interval or capped exponential
//! - [`calculate_backoff_delay`]: delay before the n-th retry

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum reconnection attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay between attempts in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default cap on the delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// How the delay grows between attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// `base * 2^attempt`, capped at `max_delay_ms`.
    Exponential,
}

/// Bounded reconnection policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Attempts allowed after the first failure before giving up (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay cap in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Delay growth strategy (default: fixed).
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            strategy: BackoffStrategy::Fixed,
        }
    }
}

impl ReconnectPolicy {
    /// Whether another attempt is allowed after `failed_attempts` failures.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts <= self.max_attempts
    }

    /// Delay to wait before retrying after `failed_attempts` failures (1-based).
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let attempt = failed_attempts.saturating_sub(1);
        let ms = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms.min(self.max_delay_ms),
            BackoffStrategy::Exponential => {
                calculate_backoff_delay(attempt, self.base_delay_ms, self.max_delay_ms)
            }
        };
        Duration::from_millis(ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate capped exponential backoff.
///
/// Formula: `min(max_delay, base_delay * 2^attempt)`, where `attempt` is the
/// zero-based retry index.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    exponential.min(max_delay_ms)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
