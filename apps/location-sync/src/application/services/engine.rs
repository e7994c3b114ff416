//! Location Sync Engine
//!
//! Wires the pieces together:
//!
//! ```text
//! GET /active-locations/ ──► LocationStore::replace ──┐
//! stream message ──► registry ──► LocationStore::upsert ─┼──► ViewProjector ──► view channel
//! selection change ──► HistoryCache::refresh ───────────┘
//! ```
//!
//! Every change to the store or the history cache re-projects the view and
//! publishes it on the broadcast hub for the renderer.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::application::ports::{LocationApi, LocationApiError, UserSummary};
use crate::application::services::history::{HistoryCache, RefreshOutcome};
use crate::domain::location::{LocationFeature, LocationRecord, UserId};
use crate::domain::selection::Selection;
use crate::domain::store::{LocationStore, UpsertOutcome};
use crate::domain::view::{ViewModel, ViewProjector};
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::metrics;
use crate::infrastructure::stream::{StreamConnection, SubscriberError};

/// Registry name the engine subscribes under.
pub const STORE_SUBSCRIBER: &str = "location-store";

/// Engine holding the live location view.
pub struct LocationSyncEngine {
    api: Arc<dyn LocationApi>,
    store: Arc<LocationStore>,
    history: HistoryCache,
    projector: ViewProjector,
    hub: SharedBroadcastHub,
    selection: RwLock<Selection>,
    current_user: RwLock<Option<UserId>>,
    users: RwLock<Vec<UserSummary>>,
    attached: Mutex<Option<Arc<StreamConnection>>>,
}

impl LocationSyncEngine {
    /// Create an engine with an empty store.
    #[must_use]
    pub fn new(api: Arc<dyn LocationApi>, hub: SharedBroadcastHub, history_limit: usize) -> Self {
        Self {
            history: HistoryCache::new(Arc::clone(&api), history_limit),
            api,
            store: Arc::new(LocationStore::new()),
            projector: ViewProjector::default(),
            hub,
            selection: RwLock::new(Selection::all()),
            current_user: RwLock::new(None),
            users: RwLock::new(Vec::new()),
            attached: Mutex::new(None),
        }
    }

    /// Use a custom projector.
    #[must_use]
    pub const fn with_projector(mut self, projector: ViewProjector) -> Self {
        self.projector = projector;
        self
    }

    /// The location table.
    #[must_use]
    pub fn store(&self) -> Arc<LocationStore> {
        Arc::clone(&self.store)
    }

    /// The history cache.
    #[must_use]
    pub const fn history(&self) -> &HistoryCache {
        &self.history
    }

    /// Users loaded by [`Self::load_users`].
    #[must_use]
    pub fn users(&self) -> Vec<UserSummary> {
        self.users.read().clone()
    }

    /// Current selection.
    #[must_use]
    pub fn selection(&self) -> Selection {
        self.selection.read().clone()
    }

    /// Attribute stream updates without an owning user to `user`.
    pub fn set_current_user(&self, user: Option<UserId>) {
        *self.current_user.write() = user;
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Fetch the user list.
    ///
    /// # Errors
    ///
    /// Returns the transport failure; the previous list is kept.
    pub async fn load_users(&self) -> Result<Vec<UserSummary>, LocationApiError> {
        let users = self.api.list_users().await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to fetch users");
        })?;
        tracing::info!(count = users.len(), "Users loaded");
        self.users.write().clone_from(&users);
        Ok(users)
    }

    /// Fetch the active-location snapshot and replace the store with it.
    ///
    /// Returns the number of installed records. Invalid features are
    /// skipped. A snapshot overtaken by a later call is dropped and reports
    /// `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns the transport failure; the store is left untouched.
    #[tracing::instrument(
        name = "engine.load_snapshot",
        skip_all,
        fields(records = tracing::field::Empty)
    )]
    pub async fn load_snapshot(&self) -> Result<usize, LocationApiError> {
        let ticket = self.store.begin_snapshot();
        let collection = self.api.active_locations().await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to fetch active locations");
        })?;

        let records: Vec<LocationRecord> = collection
            .features
            .iter()
            .filter_map(|feature| match LocationRecord::from_feature(feature, None) {
                Ok(record) => Some(record),
                Err(e) => {
                    metrics::record_rejected_record("snapshot");
                    tracing::warn!(error = %e, "Skipping invalid snapshot feature");
                    None
                }
            })
            .collect();
        let count = records.len();
        tracing::Span::current().record("records", count);

        match self.store.replace_if_current(ticket, records) {
            Some(center) => {
                tracing::info!(count, center = ?center, "Snapshot applied");
                metrics::set_store_size(self.store.len());
                self.publish_view();
                Ok(count)
            }
            None => {
                tracing::debug!("Snapshot superseded by a newer fetch");
                Ok(0)
            }
        }
    }

    // =========================================================================
    // Stream Updates
    // =========================================================================

    /// Merge one stream feature into the store.
    ///
    /// # Errors
    ///
    /// Returns the validation failure; the store is left untouched.
    pub fn apply_stream_feature(
        &self,
        feature: &LocationFeature,
    ) -> Result<UpsertOutcome, crate::domain::location::FeatureError> {
        let fallback = *self.current_user.read();
        let record = LocationRecord::from_feature(feature, fallback)?;
        let outcome = self.store.upsert(record.clone());

        if outcome.changed() {
            tracing::trace!(user_id = %record.user_id(), ?outcome, "Location updated");
            metrics::set_store_size(self.store.len());
            let _ = self.hub.send_location_update(record);
            self.publish_view();
        }
        Ok(outcome)
    }

    /// Register the store subscriber and take a hold on the connection.
    ///
    /// Attaching to the current connection again is a no-op. Attaching to a
    /// different one detaches from the previous connection first.
    pub fn attach(self: &Arc<Self>, connection: &Arc<StreamConnection>) {
        let mut attached = self.attached.lock();
        if let Some(current) = attached.as_ref() {
            if Arc::ptr_eq(current, connection) {
                tracing::debug!("Engine already attached, attach ignored");
                return;
            }
            Self::unsubscribe(current);
        }

        let engine = Arc::downgrade(self);
        connection.registry().add(STORE_SUBSCRIBER, move |feature| {
            let Some(engine) = engine.upgrade() else {
                return Ok(());
            };
            match engine.apply_stream_feature(feature) {
                Ok(_) => Ok(()),
                Err(e) => {
                    metrics::record_rejected_record("stream");
                    tracing::warn!(error = %e, "Rejected stream update");
                    Err(SubscriberError::Rejected(e.to_string()))
                }
            }
        });
        connection.acquire();
        *attached = Some(Arc::clone(connection));
    }

    /// Remove the store subscriber and release the hold.
    ///
    /// No-op unless attached to `connection`.
    pub fn detach(&self, connection: &Arc<StreamConnection>) {
        let mut attached = self.attached.lock();
        match attached.as_ref() {
            Some(current) if Arc::ptr_eq(current, connection) => {
                Self::unsubscribe(current);
                *attached = None;
            }
            _ => tracing::debug!("Engine not attached to this connection, detach ignored"),
        }
    }

    /// Whether the engine holds a connection.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.lock().is_some()
    }

    fn unsubscribe(connection: &StreamConnection) {
        connection.registry().remove(STORE_SUBSCRIBER);
        connection.release();
    }

    // =========================================================================
    // Selection and View
    // =========================================================================

    /// Change the selection, refresh history, and publish the new view.
    pub async fn set_selection(&self, selection: Selection) -> RefreshOutcome {
        self.selection.write().clone_from(&selection);
        // Publish the filter change right away; history follows.
        self.publish_view();

        let outcome = self.history.refresh(&selection).await;
        if outcome != RefreshOutcome::Superseded {
            self.publish_view();
        }
        outcome
    }

    /// Project the current view.
    #[must_use]
    pub fn view(&self) -> ViewModel {
        let snapshot = self.store.current_snapshot();
        let tracks = self.history.tracks();
        let selection = self.selection.read().clone();
        self.projector.project(&snapshot, &tracks, &selection)
    }

    /// Project and publish the current view.
    pub fn publish_view(&self) {
        let view = self.view();
        let _ = self.hub.send_view(Arc::new(view));
    }
}

// =============================================================================
// Tests
// =============================================================================
