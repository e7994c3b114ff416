//! View Projection
//!
//! Pure derivation of the render-ready view-model from the store snapshot,
//! the history tracks, and the caller's selection. No I/O, no clocks.
//!
//! # Output
//!
//! - **Current markers**: one per selected user with a known location,
//!   keyed by user id.
//! - **History polylines**: one per selected user's track with at least two
//!   points, colored by `user_id % palette.len()`.
//! - **Historical markers**: one per track point except the earliest, which
//!   would sit on top of the live marker.
//!
//! History elements carry a stable key (explicit id, then user id, then
//! username, then a positional fallback) so renderers can reconcile
//! without churn.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::history::HistoryTracks;
use crate::domain::location::{Coordinates, LocationRecord, UserId};
use crate::domain::selection::Selection;
use crate::domain::store::{DEFAULT_MAP_CENTER, LocationSnapshot};

/// Default polyline palette.
pub const DEFAULT_PALETTE: &[&str] = &["blue", "red", "green", "purple", "orange"];

/// Polyline stroke width.
pub const POLYLINE_WEIGHT: u8 = 3;

/// Polyline opacity.
pub const POLYLINE_OPACITY: f32 = 0.7;

/// Opacity of historical markers.
pub const HISTORICAL_MARKER_OPACITY: f32 = 0.6;

// =============================================================================
// View-Model
// =============================================================================

/// A point marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    /// Stable reconciliation key.
    pub key: String,
    /// Owning user.
    pub user_id: UserId,
    /// Display name.
    pub username: String,
    /// Position.
    pub position: Coordinates,
    /// Recording time.
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether this marks a past position.
    pub historical: bool,
    /// Render opacity.
    pub opacity: f32,
}

impl Marker {
    /// Popup text lines for the marker.
    #[must_use]
    pub fn popup_lines(&self) -> Vec<String> {
        let mut lines = vec![self.username.clone()];
        if self.historical {
            lines.push("Historical Location".to_string());
        } else {
            lines.push(format!("Latitude: {:.6}", self.position.latitude));
            lines.push(format!("Longitude: {:.6}", self.position.longitude));
        }
        if let Some(ts) = self.timestamp {
            let label = if self.historical { "Timestamp" } else { "Updated" };
            lines.push(format!("{label}: {}", ts.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        lines
    }
}

/// A history path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polyline {
    /// Stable reconciliation key.
    pub key: String,
    /// Owning user.
    pub user_id: UserId,
    /// Points, oldest first.
    pub path: Vec<Coordinates>,
    /// Palette color.
    pub color: &'static str,
    /// Stroke width.
    pub weight: u8,
    /// Render opacity.
    pub opacity: f32,
}

/// Everything the renderer draws.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    /// Initial map center.
    pub center: Coordinates,
    /// Live positions.
    pub markers: Vec<Marker>,
    /// History paths (empty unless history is visible).
    pub polylines: Vec<Polyline>,
    /// Past positions (empty unless history is visible).
    pub historical_markers: Vec<Marker>,
}

impl Default for ViewModel {
    fn default() -> Self {
        Self {
            center: DEFAULT_MAP_CENTER,
            markers: Vec::new(),
            polylines: Vec::new(),
            historical_markers: Vec::new(),
        }
    }
}

impl ViewModel {
    /// Total number of drawable elements.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.markers.len() + self.polylines.len() + self.historical_markers.len()
    }
}

// =============================================================================
// Keys
// =============================================================================

/// Build a stable element key.
///
/// Priority: explicit id, then user id, then username, then `fallback`.
#[must_use]
pub fn element_key(
    prefix: &str,
    id: Option<&str>,
    user: Option<UserId>,
    username: Option<&str>,
    fallback: &str,
) -> String {
    let part = id
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| user.map(|u| u.to_string()))
        .or_else(|| username.filter(|s| !s.is_empty()).map(str::to_string))
        .unwrap_or_else(|| fallback.to_string());
    format!("{prefix}-{part}")
}

fn record_key(prefix: &str, record: &LocationRecord, fallback: &str) -> String {
    element_key(
        prefix,
        record.feature_id(),
        Some(record.user_id()),
        Some(record.username()),
        fallback,
    )
}

// =============================================================================
// Projector
// =============================================================================

/// Derives [`ViewModel`]s. Holds only styling.
#[derive(Debug, Clone, Copy)]
pub struct ViewProjector {
    palette: &'static [&'static str],
}

impl Default for ViewProjector {
    fn default() -> Self {
        Self::new(DEFAULT_PALETTE)
    }
}

impl ViewProjector {
    /// Create a projector with a custom palette. An empty palette falls
    /// back to [`DEFAULT_PALETTE`].
    #[must_use]
    pub const fn new(palette: &'static [&'static str]) -> Self {
        if palette.is_empty() {
            Self {
                palette: DEFAULT_PALETTE,
            }
        } else {
            Self { palette }
        }
    }

    /// Color for a user's path.
    #[must_use]
    pub fn color_for(&self, user: UserId) -> &'static str {
        let len = self.palette.len() as u64;
        #[allow(clippy::cast_possible_truncation)]
        let index = (user.get() % len) as usize;
        self.palette[index]
    }

    /// Project the view-model.
    #[must_use]
    pub fn project(
        &self,
        snapshot: &LocationSnapshot,
        history: &HistoryTracks,
        selection: &Selection,
    ) -> ViewModel {
        let markers = snapshot
            .iter()
            .filter(|record| selection.includes(record.user_id()))
            .map(|record| Marker {
                key: format!("marker-{}", record.user_id()),
                user_id: record.user_id(),
                username: record.username().to_string(),
                position: record.coordinates(),
                timestamp: record.timestamp(),
                historical: false,
                opacity: 1.0,
            })
            .collect();

        let (polylines, historical_markers) = if selection.history_visible() {
            (
                self.polylines(history, selection),
                Self::historical_markers(history, selection),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        ViewModel {
            center: snapshot.map_center(),
            markers,
            polylines,
            historical_markers,
        }
    }

    fn polylines(&self, history: &HistoryTracks, selection: &Selection) -> Vec<Polyline> {
        history
            .values()
            .filter(|track| track.has_path() && selection.includes(track.user_id()))
            .map(|track| Polyline {
                key: format!("history-{}", track.user_id()),
                user_id: track.user_id(),
                path: track.path().collect(),
                color: self.color_for(track.user_id()),
                weight: POLYLINE_WEIGHT,
                opacity: POLYLINE_OPACITY,
            })
            .collect()
    }

    fn historical_markers(history: &HistoryTracks, selection: &Selection) -> Vec<Marker> {
        history
            .values()
            .filter(|track| track.has_path() && selection.includes(track.user_id()))
            .flat_map(|track| {
                track
                    .points()
                    .iter()
                    .enumerate()
                    .skip(1)
                    .map(move |(index, point)| Marker {
                        key: record_key(
                            "history-marker",
                            point,
                            &format!("{}-{index}", track.user_id()),
                        ),
                        user_id: track.user_id(),
                        username: point.username().to_string(),
                        position: point.coordinates(),
                        timestamp: point.timestamp(),
                        historical: true,
                        opacity: HISTORICAL_MARKER_OPACITY,
                    })
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
