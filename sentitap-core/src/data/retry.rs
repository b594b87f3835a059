//! Bounded exponential backoff for idempotent window fetches.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry schedule: `base * 2^(attempt-1)`, capped, plus up to `jitter_percent` extra.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_percent: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter_percent: 20,
        }
    }
}

impl RetryPolicy {
    /// No retries; first failure is final.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Delay before retry number `attempt`, with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_millis() as u64;
        if base == 0 || self.jitter_percent == 0 {
            return Duration::from_millis(base);
        }
        let range = (base.saturating_mul(u64::from(self.jitter_percent)) / 100).max(1);
        let jitter = rand::thread_rng().gen_range(0..range);
        Duration::from_millis(base + jitter)
    }
}
