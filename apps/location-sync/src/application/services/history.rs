//! History Cache
//!
//! Per-user history tracks for the current selection.
//!
//! Each `refresh` takes a new generation number. Per-user fetches run
//! concurrently and the aggregate is installed only once all of them have
//! finished, and only if no newer refresh started in the meantime. A
//! failed fetch yields no track for that user and does not affect others.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures::future::join_all;
use parking_lot::RwLock;

use crate::application::ports::{LocationApi, LocationApiError};
use crate::domain::history::{HistoryTrack, HistoryTracks};
use crate::domain::location::{LocationRecord, UserId};
use crate::domain::selection::Selection;
use crate::infrastructure::metrics;

/// Default number of history points per user.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Result of a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Tracks installed.
    Applied {
        /// Users with a track.
        tracks: usize,
        /// Users whose fetch failed.
        failed: usize,
    },
    /// History hidden or nothing selected; cache emptied.
    Cleared,
    /// A newer refresh started first; results discarded.
    Superseded,
}

/// Cache of history tracks for the selected users.
pub struct HistoryCache {
    api: Arc<dyn LocationApi>,
    limit: usize,
    generation: AtomicU64,
    tracks: RwLock<Arc<HistoryTracks>>,
}

impl HistoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(api: Arc<dyn LocationApi>, limit: usize) -> Self {
        Self {
            api,
            limit: limit.max(1),
            generation: AtomicU64::new(0),
            tracks: RwLock::new(Arc::new(HistoryTracks::new())),
        }
    }

    /// Point cap per user.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Current tracks.
    #[must_use]
    pub fn tracks(&self) -> Arc<HistoryTracks> {
        Arc::clone(&self.tracks.read())
    }

    /// Refetch tracks for `selection`, or clear the cache if history is
    /// hidden or the selection is empty.
    #[tracing::instrument(
        name = "history.refresh",
        skip_all,
        fields(
            users = selection.user_ids().len(),
            visible = selection.history_visible(),
            generation = tracing::field::Empty
        )
    )]
    pub async fn refresh(&self, selection: &Selection) -> RefreshOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::Span::current().record("generation", generation);

        if !selection.wants_history() {
            return if self.install(generation, HistoryTracks::new()) {
                tracing::debug!(generation, "History cache cleared");
                RefreshOutcome::Cleared
            } else {
                RefreshOutcome::Superseded
            };
        }

        let started = Instant::now();
        let fetches = selection
            .user_ids()
            .iter()
            .map(|&user| async move { (user, self.fetch_track(user).await) });
        let results = join_all(fetches).await;

        let mut tracks = HistoryTracks::new();
        let mut failed = 0;
        for (user, result) in results {
            match result {
                Ok(track) => {
                    tracks.insert(user, track);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(user_id = %user, error = %e, "History fetch failed");
                }
            }
        }
        metrics::record_history_refresh(started.elapsed(), failed);

        let count = tracks.len();
        if self.install(generation, tracks) {
            tracing::debug!(generation, tracks = count, failed, "History cache refreshed");
            RefreshOutcome::Applied {
                tracks: count,
                failed,
            }
        } else {
            tracing::debug!(generation, "History refresh superseded");
            RefreshOutcome::Superseded
        }
    }

    /// Install `tracks` if `generation` is still the latest.
    fn install(&self, generation: u64, tracks: HistoryTracks) -> bool {
        let mut current = self.tracks.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        *current = Arc::new(tracks);
        true
    }

    #[tracing::instrument(name = "history.fetch", skip_all, fields(user_id = %user))]
    async fn fetch_track(&self, user: UserId) -> Result<HistoryTrack, LocationApiError> {
        let collection = self.api.location_history(user, self.limit).await?;

        let points = collection
            .features
            .iter()
            .filter_map(|feature| match LocationRecord::from_feature(feature, Some(user)) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::debug!(user_id = %user, error = %e, "Skipping invalid history point");
                    None
                }
            })
            .collect();

        Ok(HistoryTrack::new(user, points, self.limit))
    }
}

// =============================================================================
// Tests
// =============================================================================
