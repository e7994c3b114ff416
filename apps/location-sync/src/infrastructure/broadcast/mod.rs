//! Broadcast Channel Adapters
//!
//! Fan-out of engine output to any number of consumers using tokio
//! broadcast channels.
//!
//! # Architecture
//!
//! The `BroadcastHub` provides one channel per output kind:
//! - View-models, published after every store or history change
//! - Accepted location updates, one per changed stream record
//!
//! A slow receiver lags and skips messages; it never blocks the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::BroadcastSettings;
use crate::domain::location::LocationRecord;
use crate::domain::view::ViewModel;

// =============================================================================
// Broadcast Messages
// =============================================================================

/// Published view-model.
#[derive(Debug, Clone)]
pub struct ViewBroadcast {
    /// Publication sequence, increasing from 1.
    pub sequence: u64,
    /// The view.
    pub view: Arc<ViewModel>,
}

/// Accepted location update.
#[derive(Debug, Clone)]
pub struct LocationUpdateBroadcast {
    /// The stored record.
    pub record: LocationRecord,
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Configuration for broadcast channel capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Capacity for the view channel.
    pub views_capacity: usize,
    /// Capacity for the location update channel.
    pub updates_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            views_capacity: 64,
            updates_capacity: 1_024,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            views_capacity: settings.views_capacity,
            updates_capacity: settings.updates_capacity,
        }
    }
}

/// Central hub for engine output channels.
///
/// # Example
///
/// ```rust
/// use location_sync::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
/// let mut views = hub.views_rx();
/// assert_eq!(hub.stats().views_receivers, 1);
/// # drop(views.try_recv());
/// ```
#[derive(Debug)]
pub struct BroadcastHub {
    views_tx: broadcast::Sender<ViewBroadcast>,
    updates_tx: broadcast::Sender<LocationUpdateBroadcast>,
    view_sequence: AtomicU64,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            views_tx: broadcast::channel(config.views_capacity.max(1)).0,
            updates_tx: broadcast::channel(config.updates_capacity.max(1)).0,
            view_sequence: AtomicU64::new(0),
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    // =========================================================================
    // View Channel
    // =========================================================================

    /// Publish a view to all receivers.
    ///
    /// Returns the number of receivers, or `None` if there are none.
    pub fn send_view(&self, view: Arc<ViewModel>) -> Option<usize> {
        let sequence = self.view_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.views_tx.send(ViewBroadcast { sequence, view }).ok()
    }

    /// Get a new receiver for views.
    #[must_use]
    pub fn views_rx(&self) -> broadcast::Receiver<ViewBroadcast> {
        self.views_tx.subscribe()
    }

    /// Number of views published so far.
    #[must_use]
    pub fn views_published(&self) -> u64 {
        self.view_sequence.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Location Update Channel
    // =========================================================================

    /// Publish an accepted update to all receivers.
    pub fn send_location_update(&self, record: LocationRecord) -> Option<usize> {
        self.updates_tx.send(LocationUpdateBroadcast { record }).ok()
    }

    /// Get a new receiver for accepted updates.
    #[must_use]
    pub fn location_updates_rx(&self) -> broadcast::Receiver<LocationUpdateBroadcast> {
        self.updates_tx.subscribe()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Receiver counts per channel.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            views_receivers: self.views_tx.receiver_count(),
            updates_receivers: self.updates_tx.receiver_count(),
        }
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about broadcast channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Number of view receivers.
    pub views_receivers: usize,
    /// Number of location update receivers.
    pub updates_receivers: usize,
}

impl BroadcastStats {
    /// Total receivers across channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.views_receivers + self.updates_receivers
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::location::{Coordinates, UserId};

    fn record() -> LocationRecord {
        LocationRecord::new(UserId::new(1), "asha", Coordinates::new(10.0, 76.0), None)
    }

    #[tokio::test]
    async fn views_carry_increasing_sequence() {
        let hub = BroadcastHub::with_defaults();
        let mut rx = hub.views_rx();

        assert_eq!(hub.send_view(Arc::new(ViewModel::default())), Some(1));
        let _ = hub.send_view(Arc::new(ViewModel::default()));

        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(rx.recv().await.unwrap().sequence, 2);
        assert_eq!(hub.views_published(), 2);
    }

    #[tokio::test]
    async fn updates_reach_every_receiver() {
        let hub = BroadcastHub::with_defaults();
        let mut rx1 = hub.location_updates_rx();
        let mut rx2 = hub.location_updates_rx();

        assert_eq!(hub.send_location_update(record()), Some(2));

        assert_eq!(rx1.recv().await.unwrap().record.user_id(), UserId::new(1));
        assert_eq!(rx2.recv().await.unwrap().record.username(), "asha");
    }

    #[test]
    fn send_without_receivers_returns_none() {
        let hub = BroadcastHub::with_defaults();
        assert!(hub.send_location_update(record()).is_none());
    }

    #[test]
    fn stats_track_receivers() {
        let hub = BroadcastHub::new(BroadcastConfig {
            views_capacity: 4,
            updates_capacity: 0,
        });
        let _views = hub.views_rx();
        {
            let _updates = hub.location_updates_rx();
            assert_eq!(hub.stats().total_receivers(), 2);
        }
        assert_eq!(
            hub.stats(),
            BroadcastStats {
                views_receivers: 1,
                updates_receivers: 0
            }
        );
    }
}
