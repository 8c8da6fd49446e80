//! Exponential reconnect backoff with multiplicative jitter.
//!
//! After a failed dial or a dropped connection the manager waits
//! `initial_delay * multiplier^attempt`, capped at `max_delay`, then
//! perturbed by a uniform factor in `[1 - jitter, 1 + jitter]` so a fleet of
//! agents does not reconnect in lockstep after a broker restart.
//!
//! ```rust
//! use std::time::Duration;
//! use backhaul_reverse::BackoffConfig;
//!
//! let config = BackoffConfig::default();
//! assert_eq!(config.base_delay(0), Duration::from_secs(1));
//! assert_eq!(config.base_delay(3), Duration::from_secs(8));
//! assert_eq!(config.base_delay(10), Duration::from_secs(60));
//! ```

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{ReverseError, ReverseResult};

/// Backoff tuning. Pure data; [`BackoffPolicy`] owns the randomness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure (milliseconds).
    pub initial_delay_ms: u64,
    /// Ceiling for any delay, jittered or not (milliseconds).
    pub max_delay_ms: u64,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Maximum relative jitter, in `[0.0, 1.0)`.
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> ReverseResult<()> {
        if self.initial_delay_ms == 0 {
            return Err(ReverseError::config("backoff initial delay must be positive"));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ReverseError::config(
                "backoff max delay must not be below the initial delay",
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ReverseError::config("backoff multiplier must be at least 1.0"));
        }
        if !(0.0..1.0).contains(&self.jitter_factor) {
            return Err(ReverseError::config(
                "backoff jitter factor must be in [0.0, 1.0)",
            ));
        }
        Ok(())
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Un-jittered delay for the given number of prior failures.
    ///
    /// Non-decreasing in `attempt` and never above `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms(attempt) as u64)
    }

    fn base_delay_ms(&self, attempt: u32) -> f64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        // powi overflows to +inf for large attempts; min() keeps it finite.
        delay.min(self.max_delay_ms as f64)
    }
}

/// Computes jittered reconnect delays.
///
/// The RNG is owned by the policy and seeded once, from OS entropy in
/// production or from a fixed seed in tests.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    rng: StdRng,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// A policy whose jitter sequence is reproducible.
    pub fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Delay to wait after `attempt` prior consecutive failures.
    pub fn next_delay(&mut self, attempt: u32) -> Duration {
        let base_ms = self.config.base_delay_ms(attempt);
        let jitter = self.config.jitter_factor;
        if jitter <= 0.0 {
            return Duration::from_millis(base_ms as u64);
        }

        let factor = 1.0 + self.rng.gen_range(-jitter..=jitter);
        let delay_ms = (base_ms * factor).clamp(0.0, self.config.max_delay_ms as f64);
        Duration::from_secs_f64(delay_ms / 1_000.0)
    }
}
