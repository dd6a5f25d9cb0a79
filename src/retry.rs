//! Bounded retry with exponential backoff.
//!
//! The delay after failed attempt `k` (0-indexed) is `base * 2^k`, plus a
//! uniformly random jitter in `[0, max_jitter)` when jitter is configured.
//! No delay is taken after the final attempt.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::error::AccessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, doubled for each subsequent one.
    pub base_delay_ms: u64,
    /// Upper bound (exclusive) of the random jitter added to each delay; 0 disables jitter.
    pub max_jitter_ms: u64,
}

impl RetryPolicy {
    /// Compare-and-swap retries on a versioned allow-list: 10 attempts, 1s base, up to 1s jitter.
    pub const fn versioned() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 1_000,
            max_jitter_ms: 1_000,
        }
    }

    /// Retries on the unversioned rule path: 5 attempts, 1s base, no jitter.
    pub const fn unversioned() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_jitter_ms: 0,
        }
    }

    pub fn validate(&self) -> Result<(), AccessError> {
        if self.max_attempts == 0 {
            return Err(AccessError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The deterministic part of the delay after failed attempt `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Full delay after failed attempt `attempt`, drawing jitter from `rng`.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        if self.max_jitter_ms == 0 {
            return base;
        }
        let jitter_us = rng.gen_range(0..self.max_jitter_ms.saturating_mul(1_000));
        base.saturating_add(Duration::from_micros(jitter_us))
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Whether another attempt follows attempt `attempt`.
    pub fn has_attempt_after(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }

    /// Sleep before the attempt following `attempt`.
    pub(crate) async fn backoff(&self, attempt: u32) {
        // The thread-local RNG must not be held across the await.
        let delay = self.delay_for(attempt);
        debug!(
            event = "Retry",
            phase = "Backoff",
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64
        );
        tokio::time::sleep(delay).await;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::versioned()
    }
}
