//! History Tracks
//!
//! Ordered past positions of a single user, oldest first, as returned by
//! the history endpoint.

use std::collections::BTreeMap;

use crate::domain::location::{Coordinates, LocationRecord, UserId};

/// Tracks keyed by user, in user order.
pub type HistoryTracks = BTreeMap<UserId, HistoryTrack>;

/// Past positions of one user, oldest to newest.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTrack {
    user_id: UserId,
    points: Vec<LocationRecord>,
}

impl HistoryTrack {
    /// Create a track, keeping at most `limit` points (the newest ones).
    #[must_use]
    pub fn new(user_id: UserId, mut points: Vec<LocationRecord>, limit: usize) -> Self {
        if points.len() > limit {
            points.drain(..points.len() - limit);
        }
        Self { user_id, points }
    }

    /// Owning user.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// All points, oldest first.
    #[must_use]
    pub fn points(&self) -> &[LocationRecord] {
        &self.points
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the track is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// A path needs at least two points.
    #[must_use]
    pub fn has_path(&self) -> bool {
        self.points.len() >= 2
    }

    /// Positions along the track.
    pub fn path(&self) -> impl Iterator<Item = Coordinates> + '_ {
        self.points.iter().map(LocationRecord::coordinates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64) -> LocationRecord {
        LocationRecord::new(UserId::new(1), "a", Coordinates::new(lat, 0.0), None)
    }

    #[test]
    fn limit_keeps_newest_points() {
        let track = HistoryTrack::new(UserId::new(1), vec![point(1.0), point(2.0), point(3.0)], 2);
        let lats: Vec<f64> = track.path().map(|c| c.latitude).collect();
        assert_eq!(lats, vec![2.0, 3.0]);
    }

    #[test]
    fn single_point_has_no_path() {
        let track = HistoryTrack::new(UserId::new(1), vec![point(1.0)], 100);
        assert!(!track.has_path());
        assert!(HistoryTrack::new(UserId::new(1), vec![point(1.0), point(2.0)], 100).has_path());
    }
}
