#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Location Sync - Live Location Synchronization Engine
//!
//! Keeps an in-memory picture of where every tracked user is, fed by a
//! REST snapshot plus a live WebSocket stream of GeoJSON features, and
//! derives a render-ready view-model (markers, history paths, map center)
//! for whichever users the caller has selected.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Location state and view derivation
//!   - `location`: Records, coordinates, GeoJSON feature shape
//!   - `store`: Current-location table with snapshot fencing
//!   - `selection`: User filter and history flag
//!   - `history`: Per-user history tracks
//!   - `view`: View-model projection
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Location REST API interface
//!   - `services`: Sync engine, history cache, location simulator
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: Shared WebSocket link, subscriber registry, reconnect
//!   - `http`: REST client
//!   - `broadcast`: Channel-based view distribution
//!   - `config`: Configuration from environment
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! REST snapshot ──────────┐
//!                         ▼
//! WS /ws/locations/ ─► Registry ─► LocationStore ─┐
//!                                                 ├─► ViewProjector ─► BroadcastHub ─► consumers
//! REST history ─────► HistoryCache ───────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Location types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::location::{
    Coordinates, FeatureCollection, FeatureError, LocationFeature, LocationRecord, UserId,
};
pub use domain::selection::Selection;
pub use domain::store::{LocationSnapshot, LocationStore, UpsertOutcome};
pub use domain::view::{Marker, Polyline, ViewModel, ViewProjector};

// Application services
pub use application::ports::{LocationApi, LocationApiError, LocationUpdate, UserSummary};
pub use application::services::{
    BoundingBox, HistoryCache, LocationSimulator, LocationSyncEngine, RefreshOutcome,
    SimulatorError,
};

// Infrastructure config
pub use infrastructure::config::{
    ApiSettings, ApiToken, BroadcastSettings, ConfigError, ServerSettings, StreamSettings,
    SyncConfig,
};

// Stream client
pub use infrastructure::stream::{
    ConnectionState, SharedStreamConnection, StreamConnection, StreamConnectionConfig,
    StreamError, SubscriberError, SubscriberRegistry,
};

// REST client
pub use infrastructure::http::{ApiError, LocationApiClient};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, SharedBroadcastHub, ViewBroadcast,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
