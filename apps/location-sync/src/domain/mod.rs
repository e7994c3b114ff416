//! Domain Layer - Location state and view derivation.
//!
//! Pure types and algorithms with no I/O: the location table, history
//! tracks, the caller's selection, and the projection that turns them into
//! a render-ready view-model.

/// Location records and the GeoJSON feature wire shape.
pub mod location;

/// Authoritative current-location table.
pub mod store;

/// Caller-owned user filter and history flag.
pub mod selection;

/// Per-user history tracks.
pub mod history;

/// View-model projection.
pub mod view;
