//! Location Store
//!
//! The authoritative "current location per user" table.
//!
//! # Design
//!
//! - Records are indexed by [`UserId`], so upsert and lookup are O(1).
//! - A separate insertion-order index keeps iteration stable: an updated
//!   user keeps its position, a new user is appended.
//! - `replace` swaps the whole table (snapshot fetch), `upsert` merges a
//!   single stream update.
//! - Snapshots can be fenced with a generation ticket so a slow fetch that
//!   was overtaken by a newer one is discarded instead of clobbering it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::location::{Coordinates, FeatureError, LocationFeature, LocationRecord, UserId};

/// Map center used while no snapshot has been applied.
pub const DEFAULT_MAP_CENTER: Coordinates = Coordinates::new(12.8, 74.8);

// =============================================================================
// Snapshot View
// =============================================================================

/// Immutable copy of the store, handed to projection.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSnapshot {
    records: Vec<LocationRecord>,
    map_center: Coordinates,
}

impl LocationSnapshot {
    /// Records in store order.
    pub fn iter(&self) -> impl Iterator<Item = &LocationRecord> {
        self.records.iter()
    }

    /// Record for a user, if known.
    #[must_use]
    pub fn get(&self, user: UserId) -> Option<&LocationRecord> {
        self.records.iter().find(|r| r.user_id() == user)
    }

    /// Number of users with a known location.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no location is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Initial map center.
    #[must_use]
    pub const fn map_center(&self) -> Coordinates {
        self.map_center
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Effect of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First known location for the user.
    Inserted,
    /// Replaced a different earlier record.
    Updated,
    /// Identical to the stored record.
    Unchanged,
}

impl UpsertOutcome {
    /// Whether the table changed.
    #[must_use]
    pub const fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Generation ticket for a fenced snapshot replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotTicket(u64);

// =============================================================================
// Store State
// =============================================================================

#[derive(Debug, Default)]
struct StoreState {
    records: HashMap<UserId, LocationRecord>,
    order: Vec<UserId>,
    map_center: Option<Coordinates>,
}

impl StoreState {
    fn replace(&mut self, records: Vec<LocationRecord>) -> Option<Coordinates> {
        self.records.clear();
        self.order.clear();

        let center = records.first().map(LocationRecord::coordinates);
        for record in records {
            self.upsert(record);
        }
        if center.is_some() {
            self.map_center = center;
        }
        center
    }

    fn upsert(&mut self, record: LocationRecord) -> UpsertOutcome {
        let user = record.user_id();
        match self.records.get_mut(&user) {
            Some(existing) if *existing == record => UpsertOutcome::Unchanged,
            Some(existing) => {
                *existing = record;
                UpsertOutcome::Updated
            }
            None => {
                self.records.insert(user, record);
                self.order.push(user);
                UpsertOutcome::Inserted
            }
        }
    }

    fn snapshot(&self) -> LocationSnapshot {
        let records = self
            .order
            .iter()
            .filter_map(|user| self.records.get(user).cloned())
            .collect();

        LocationSnapshot {
            records,
            map_center: self.map_center.unwrap_or(DEFAULT_MAP_CENTER),
        }
    }
}

// =============================================================================
// Location Store
// =============================================================================

/// Thread-safe current-location table.
///
/// # Example
///
/// ```rust
/// use location_sync::domain::location::{Coordinates, LocationRecord, UserId};
/// use location_sync::domain::store::LocationStore;
///
/// let store = LocationStore::new();
/// store.replace(vec![LocationRecord::new(UserId::new(1), "asha", Coordinates::new(10.0, 76.5), None)]);
///
/// let moved = LocationRecord::new(UserId::new(1), "asha", Coordinates::new(10.1, 76.6), None);
/// assert!(store.upsert(moved).changed());
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct LocationStore {
    state: RwLock<StoreState>,
    snapshot_generation: AtomicU64,
}

impl LocationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard the table and install `records`, keyed by user.
    ///
    /// Returns the new map center (first record's position) when `records`
    /// is non-empty. Duplicate users keep the first position and the last
    /// record.
    pub fn replace(&self, records: Vec<LocationRecord>) -> Option<Coordinates> {
        self.state.write().replace(records)
    }

    /// Start a fenced snapshot; any earlier ticket becomes stale.
    pub fn begin_snapshot(&self) -> SnapshotTicket {
        SnapshotTicket(self.snapshot_generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Replace the table only if no newer snapshot has begun since `ticket`.
    ///
    /// Returns `None` when the ticket was superseded and nothing changed.
    pub fn replace_if_current(
        &self,
        ticket: SnapshotTicket,
        records: Vec<LocationRecord>,
    ) -> Option<Option<Coordinates>> {
        let mut state = self.state.write();
        if self.snapshot_generation.load(Ordering::SeqCst) != ticket.0 {
            return None;
        }
        Some(state.replace(records))
    }

    /// Insert or replace the record for its user.
    pub fn upsert(&self, record: LocationRecord) -> UpsertOutcome {
        self.state.write().upsert(record)
    }

    /// Validate a stream feature and upsert it.
    ///
    /// # Errors
    ///
    /// Returns the validation failure; the table is left untouched.
    pub fn upsert_feature(
        &self,
        feature: &LocationFeature,
        fallback_user: Option<UserId>,
    ) -> Result<UpsertOutcome, FeatureError> {
        let record = LocationRecord::from_feature(feature, fallback_user)?;
        Ok(self.upsert(record))
    }

    /// Immutable copy of the current table.
    #[must_use]
    pub fn current_snapshot(&self) -> LocationSnapshot {
        self.state.read().snapshot()
    }

    /// Current record for a user.
    #[must_use]
    pub fn get(&self, user: UserId) -> Option<LocationRecord> {
        self.state.read().records.get(&user).cloned()
    }

    /// Current map center.
    #[must_use]
    pub fn map_center(&self) -> Coordinates {
        self.state.read().map_center.unwrap_or(DEFAULT_MAP_CENTER)
    }

    /// Number of users with a known location.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn record(user: u64, lat: f64, lon: f64) -> LocationRecord {
        LocationRecord::new(
            UserId::new(user),
            format!("user{user}"),
            Coordinates::new(lat, lon),
            None,
        )
    }

    fn users(snapshot: &LocationSnapshot) -> Vec<u64> {
        snapshot.iter().map(|r| r.user_id().get()).collect()
    }

    #[test]
    fn empty_store_uses_default_center() {
        let store = LocationStore::new();
        assert!(store.is_empty());
        assert_eq!(store.current_snapshot().map_center(), DEFAULT_MAP_CENTER);
    }

    #[test]
    fn replace_installs_exactly_given_records() {
        let store = LocationStore::new();
        store.upsert(record(9, 1.0, 1.0));

        let center = store.replace(vec![record(1, 10.0, 76.0), record(2, 11.0, 77.0)]);

        assert_eq!(center, Some(Coordinates::new(10.0, 76.0)));
        assert_eq!(users(&store.current_snapshot()), vec![1, 2]);
        assert!(store.get(UserId::new(9)).is_none());
    }

    #[test]
    fn replace_with_empty_keeps_previous_center() {
        let store = LocationStore::new();
        store.replace(vec![record(1, 10.0, 76.0)]);
        assert_eq!(store.replace(vec![]), None);
        assert!(store.is_empty());
        assert_eq!(store.map_center(), Coordinates::new(10.0, 76.0));
    }

    #[test]
    fn upsert_updates_in_place_and_appends_new() {
        let store = LocationStore::new();
        store.replace(vec![record(1, 1.0, 1.0), record(2, 2.0, 2.0)]);

        assert_eq!(store.upsert(record(1, 2.0, 3.0)), UpsertOutcome::Updated);
        assert_eq!(store.upsert(record(3, 3.0, 3.0)), UpsertOutcome::Inserted);

        let snapshot = store.current_snapshot();
        assert_eq!(users(&snapshot), vec![1, 2, 3]);
        assert_eq!(
            snapshot.get(UserId::new(1)).unwrap().coordinates(),
            Coordinates::new(2.0, 3.0)
        );
        assert_eq!(
            snapshot.get(UserId::new(2)).unwrap().coordinates(),
            Coordinates::new(2.0, 2.0)
        );
    }

    #[test]
    fn upsert_same_record_is_unchanged() {
        let store = LocationStore::new();
        assert_eq!(store.upsert(record(1, 1.0, 1.0)), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(record(1, 1.0, 1.0)), UpsertOutcome::Unchanged);
        assert!(!UpsertOutcome::Unchanged.changed());
    }

    #[test]
    fn invalid_feature_leaves_store_untouched() {
        let store = LocationStore::new();
        store.upsert(record(1, 1.0, 1.0));
        let before = store.current_snapshot();

        let feature = LocationFeature {
            properties: None,
            ..LocationFeature::point(UserId::new(1), "x", Coordinates::new(5.0, 5.0))
        };
        assert_eq!(
            store.upsert_feature(&feature, None),
            Err(FeatureError::MissingProperties)
        );
        assert_eq!(store.current_snapshot(), before);
    }

    #[test]
    fn superseded_snapshot_is_discarded() {
        let store = LocationStore::new();
        let slow = store.begin_snapshot();
        let fast = store.begin_snapshot();

        assert!(store.replace_if_current(fast, vec![record(2, 2.0, 2.0)]).is_some());
        assert!(store.replace_if_current(slow, vec![record(1, 1.0, 1.0)]).is_none());
        assert_eq!(users(&store.current_snapshot()), vec![2]);
    }

    #[test]
    fn snapshot_is_detached_from_store() {
        let store = LocationStore::new();
        store.upsert(record(1, 1.0, 1.0));
        let snapshot = store.current_snapshot();
        store.upsert(record(2, 2.0, 2.0));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }

    fn arb_record() -> impl Strategy<Value = LocationRecord> {
        (0u64..8, -90.0f64..90.0, -180.0f64..180.0).prop_map(|(u, lat, lon)| record(u, lat, lon))
    }

    proptest! {
        #[test]
        fn upsert_is_idempotent(
            seed in proptest::collection::vec(arb_record(), 0..16),
            update in arb_record(),
        ) {
            let once = LocationStore::new();
            once.replace(seed.clone());
            once.upsert(update.clone());

            let twice = LocationStore::new();
            twice.replace(seed);
            twice.upsert(update.clone());
            twice.upsert(update);

            prop_assert_eq!(once.current_snapshot(), twice.current_snapshot());
        }

        #[test]
        fn replace_ignores_prior_content(
            prior in proptest::collection::vec(arb_record(), 0..16),
            a in arb_record(),
            b in arb_record(),
        ) {
            prop_assume!(a.user_id() != b.user_id());
            let store = LocationStore::new();
            store.replace(prior);
            store.replace(vec![a.clone(), b.clone()]);

            let snapshot = store.current_snapshot();
            prop_assert_eq!(snapshot.len(), 2);
            prop_assert_eq!(snapshot.get(a.user_id()), Some(&a));
            prop_assert_eq!(snapshot.get(b.user_id()), Some(&b));
        }
    }
}
