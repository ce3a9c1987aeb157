//! Reconnection Policy
//!
//! Exponential backoff for transient failures, with fixed delays for
//! authentication and rate-limit failures. Rate-limit cool-downs do not
//! advance the exponential schedule.

use std::time::Duration;

use rand::Rng;

use super::provider::FailureKind;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay after the first transient failure.
    pub initial_delay: Duration,
    /// Cap for the exponential schedule.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0 disables).
    pub jitter_factor: f64,
    /// Fixed delay after an authentication failure.
    pub auth_delay: Duration,
    /// Fixed cool-down after a rate-limit response.
    pub rate_limit_delay: Duration,
    /// Maximum consecutive attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
            auth_delay: Duration::from_secs(10),
            rate_limit_delay: Duration::from_secs(120),
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Defaults with a custom exponential range.
    #[must_use]
    pub fn with_backoff(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            ..Self::default()
        }
    }
}

/// Reconnection schedule for one provider.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt for a failure of the given kind.
    ///
    /// Returns `None` if max attempts have been exceeded.
    #[must_use]
    pub fn next_delay(&mut self, kind: FailureKind) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;

        match kind {
            FailureKind::Auth => Some(self.config.auth_delay),
            FailureKind::RateLimited => Some(self.config.rate_limit_delay),
            FailureKind::Transient => {
                let delay = self.apply_jitter(self.current_delay);
                self.current_delay = self.grow(self.current_delay);
                Some(delay)
            }
        }
    }

    /// Delay the next transient failure would use.
    #[must_use]
    pub const fn current_backoff(&self) -> Duration {
        self.current_delay
    }

    /// Reset after a connection that reached streaming.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Consecutive attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn grow(&self, delay: Duration) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let scaled = (delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

/// Error type for reconnection failures.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}
