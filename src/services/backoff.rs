//! Rate-limit backoff for the listing poll
//!
//! Each throttled fetch doubles the sleep multiplier (capped). A successful fetch
//! takes three off the throttle counter rather than resetting it, so intermittent
//! throttling does not flap between full speed and long sleeps.

use std::time::Duration;
use tracing::{info, warn};

/// Backoff limits
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Upper bound on the sleep multiplier
    pub max_multiplier: u32,
    /// Throttle count removed per successful fetch
    pub decay_per_success: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_multiplier: 20,
            decay_per_success: 3,
        }
    }
}

/// Throttle state owned by the poll loop
#[derive(Debug, Default)]
pub struct RateLimitController {
    config: BackoffConfig,
    consecutive_throttles: u32,
    backoff_multiplier: u32,
}

impl RateLimitController {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            consecutive_throttles: 0,
            backoff_multiplier: 0,
        }
    }

    pub fn consecutive_throttles(&self) -> u32 {
        self.consecutive_throttles
    }

    pub fn backoff_multiplier(&self) -> u32 {
        self.backoff_multiplier
    }

    /// Record a throttled fetch; returns the new multiplier
    pub fn on_throttled(&mut self) -> u32 {
        self.consecutive_throttles = self.consecutive_throttles.saturating_add(1);
        let doubled = 1u32
            .checked_shl(self.consecutive_throttles)
            .unwrap_or(u32::MAX);
        self.backoff_multiplier = doubled.min(self.config.max_multiplier);

        warn!(
            "[Backoff] Rate limited ({} in a row), backing off x{}",
            self.consecutive_throttles, self.backoff_multiplier
        );
        self.backoff_multiplier
    }

    /// Record a successful fetch; returns true when the backoff just cleared
    pub fn on_success(&mut self) -> bool {
        if self.consecutive_throttles == 0 {
            return false;
        }
        self.consecutive_throttles = self
            .consecutive_throttles
            .saturating_sub(self.config.decay_per_success);

        if self.consecutive_throttles == 0 {
            self.backoff_multiplier = 0;
            info!("[Backoff] Rate limit cleared, resuming normal polling");
            return true;
        }
        false
    }

    /// Sleep before the next poll. Throttled cycles scale the base interval by the
    /// multiplier; every other cycle sleeps the base interval.
    pub fn next_sleep(&self, base: Duration, throttled: bool) -> Duration {
        if throttled && self.backoff_multiplier > 0 {
            base.saturating_mul(self.backoff_multiplier)
        } else {
            base
        }
    }
}
