//! Reconnect delay schedule.

use std::time::Duration;

use crate::config::ClientConfig;

/// Delay schedule between reconnect attempts
///
/// With a backoff factor of `1.0` every attempt waits exactly the base
/// interval. Larger factors grow the delay geometrically up to the cap and
/// add ±10% jitter so a fleet of clients does not reconnect in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReconnectPolicy {
    base: Duration,
    factor: f64,
    max: Duration,
}

impl ReconnectPolicy {
    pub(crate) fn from_config(config: &ClientConfig) -> Self {
        let base = Duration::from_millis(config.reconnect_interval_ms);
        Self {
            base,
            factor: config.reconnect_backoff,
            max: config
                .max_reconnect_interval_ms
                .map_or(base, Duration::from_millis),
        }
    }

    fn uses_backoff(&self) -> bool {
        self.factor > 1.0
    }

    /// Delay before `attempt` (1-based), before jitter
    pub(crate) fn base_delay(&self, attempt: u32) -> Duration {
        if !self.uses_backoff() {
            return self.base;
        }
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.base.as_nanos() as f64 * self.factor.powi(exponent);
        let capped = scaled.min(self.max.as_nanos() as f64);
        Duration::from_nanos(capped as u64)
    }

    /// Delay before `attempt` (1-based), jittered when backoff is enabled
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.uses_backoff() {
            delay.mul_f64(0.9 + fastrand::f64() * 0.2)
        } else {
            delay
        }
    }
}
