//! Heartbeat
//!
//! Liveness tracking for an open stream. Any inbound frame counts as
//! activity. The connection loop calls [`HeartbeatMonitor::check`] on every
//! ping tick; if nothing arrived within the timeout the link is treated as
//! dropped and goes through the normal reconnect path.

use std::time::{Duration, Instant};

/// Heartbeat timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence after which the link is considered dead.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Decision for one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Link is alive; send a ping.
    SendPing,
    /// Nothing heard within the timeout.
    Expired {
        /// Time since the last inbound frame.
        silent_for: Duration,
    },
}

/// Per-connection liveness state.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    last_activity: Instant,
}

impl HeartbeatMonitor {
    /// Start monitoring; the link counts as active now.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_activity: Instant::now(),
        }
    }

    /// Ping interval.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        self.config.ping_interval
    }

    /// Record an inbound frame.
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Evaluate liveness now.
    #[must_use]
    pub fn check(&self) -> HeartbeatAction {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> HeartbeatAction {
        let silent_for = now.saturating_duration_since(self.last_activity);
        if silent_for > self.config.timeout {
            HeartbeatAction::Expired { silent_for }
        } else {
            HeartbeatAction::SendPing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(timeout_ms: u64) -> HeartbeatMonitor {
        HeartbeatMonitor::new(HeartbeatConfig {
            ping_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[test]
    fn fresh_link_pings() {
        assert_eq!(monitor(1000).check(), HeartbeatAction::SendPing);
    }

    #[test]
    fn silence_past_timeout_expires() {
        let monitor = monitor(100);
        let later = monitor.last_activity + Duration::from_millis(150);
        assert_eq!(
            monitor.check_at(later),
            HeartbeatAction::Expired {
                silent_for: Duration::from_millis(150)
            }
        );
    }

    #[test]
    fn activity_extends_deadline() {
        let mut monitor = monitor(100);
        let start = monitor.last_activity;
        monitor.record_activity();
        assert!(monitor.last_activity >= start);
        assert_eq!(
            monitor.check_at(monitor.last_activity + Duration::from_millis(50)),
            HeartbeatAction::SendPing
        );
    }
}
