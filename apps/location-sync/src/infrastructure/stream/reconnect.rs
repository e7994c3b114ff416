//! Reconnect Policy
//!
//! Delay schedule for re-opening the location stream after an unsolicited
//! close: exponential growth from `initial_delay` up to `max_delay`, with
//! symmetric jitter so many clients dropped at once do not return in
//! lockstep. [`ReconnectConfig::fixed`] gives a constant delay.

use std::time::Duration;

use rand::Rng;

/// Reconnect timing.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Retry cap; 0 retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    /// Constant `delay` between retries, no jitter, no cap.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Limit the number of consecutive retries.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Tracks consecutive failed attempts and yields the next delay.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    base_delay: Duration,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Start a fresh schedule.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let base_delay = config.initial_delay;
        Self {
            config,
            base_delay,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the cap is reached.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempts += 1;

        let delay = jitter(self.base_delay, self.config.jitter_factor, &mut rand::rng());
        self.base_delay = grow(self.base_delay, self.config.multiplier).min(self.config.max_delay);
        Some(delay)
    }

    /// Restart the schedule after the link opened.
    pub const fn reset(&mut self) {
        self.base_delay = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }
}

fn grow(delay: Duration, multiplier: f64) -> Duration {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return delay;
    }
    #[allow(clippy::cast_precision_loss)]
    let millis = (delay.as_millis() as f64 * multiplier).round();
    from_millis_f64(millis).unwrap_or(Duration::MAX)
}

fn jitter<R: Rng>(delay: Duration, factor: f64, rng: &mut R) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }
    #[allow(clippy::cast_precision_loss)]
    let base = delay.as_millis() as f64;
    let spread = base * factor.min(1.0);
    let millis = (base + rng.random_range(-spread..=spread)).round().max(1.0);
    from_millis_f64(millis).unwrap_or(delay)
}

#[allow(clippy::cast_precision_loss)]
fn from_millis_f64(millis: f64) -> Option<Duration> {
    if !millis.is_finite() || millis < 0.0 || millis > u64::MAX as f64 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some(Duration::from_millis(millis as u64))
}
