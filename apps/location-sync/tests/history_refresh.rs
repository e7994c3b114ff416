//! History Refresh Integration Tests
//!
//! Overlapping selection changes against a gated fake of the location API:
//! a slow refresh that finishes after a newer one must never replace the
//! newer tracks or the published view.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::timeout;

use location_sync::{
    BroadcastHub, Coordinates, FeatureCollection, LocationApi, LocationApiError, LocationFeature,
    LocationSyncEngine, LocationUpdate, RefreshOutcome, Selection, UserId, UserSummary,
};

const WAIT: Duration = Duration::from_secs(5);

/// History fetches for a gated user block until the gate opens.
struct GatedApi {
    gates: HashMap<UserId, Gate>,
}

struct Gate {
    entered: Arc<Notify>,
    open: Arc<Notify>,
}

impl GatedApi {
    fn new() -> Self {
        Self {
            gates: HashMap::new(),
        }
    }

    fn gate(mut self, user: u64) -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let open = Arc::new(Notify::new());
        self.gates.insert(
            UserId::new(user),
            Gate {
                entered: Arc::clone(&entered),
                open: Arc::clone(&open),
            },
        );
        (self, entered, open)
    }
}

fn track(user: UserId, points: usize) -> FeatureCollection {
    let base = 10.0 + f64::from(u32::try_from(user.get()).unwrap());
    FeatureCollection {
        features: (0..points)
            .map(|i| {
                let step = f64::from(u32::try_from(i).unwrap()) * 0.01;
                LocationFeature::point(user, "someone", Coordinates::new(base + step, 76.0))
            })
            .collect(),
    }
}

#[async_trait]
impl LocationApi for GatedApi {
    async fn list_users(&self) -> Result<Vec<UserSummary>, LocationApiError> {
        Ok(Vec::new())
    }

    async fn active_locations(&self) -> Result<FeatureCollection, LocationApiError> {
        Ok(FeatureCollection::default())
    }

    async fn location_history(
        &self,
        user: UserId,
        _limit: usize,
    ) -> Result<FeatureCollection, LocationApiError> {
        if let Some(gate) = self.gates.get(&user) {
            gate.entered.notify_one();
            gate.open.notified().await;
        }
        if user.get() >= 100 {
            return Err(LocationApiError::Status {
                status: 404,
                message: "User not found".to_string(),
            });
        }
        Ok(track(user, 3))
    }

    async fn update_location(
        &self,
        _update: LocationUpdate,
    ) -> Result<serde_json::Value, LocationApiError> {
        Ok(serde_json::Value::Null)
    }
}

fn engine(api: GatedApi) -> Arc<LocationSyncEngine> {
    engine_on(api, Arc::new(BroadcastHub::with_defaults()))
}

fn engine_on(api: GatedApi, hub: Arc<BroadcastHub>) -> Arc<LocationSyncEngine> {
    Arc::new(LocationSyncEngine::new(Arc::new(api), hub, 50))
}

#[tokio::test]
async fn stale_refresh_never_overwrites_newer_one() {
    let (api, entered, open) = GatedApi::new().gate(1);
    let engine = engine(api);

    let slow = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move {
            engine
                .set_selection(Selection::users([UserId::new(1)]).with_history(true))
                .await
        }
    });
    timeout(WAIT, entered.notified()).await.unwrap();

    let fast = engine
        .set_selection(Selection::users([UserId::new(2)]).with_history(true))
        .await;
    assert_eq!(
        fast,
        RefreshOutcome::Applied {
            tracks: 1,
            failed: 0
        }
    );

    open.notify_one();
    let stale = timeout(WAIT, slow).await.unwrap().unwrap();
    assert_eq!(stale, RefreshOutcome::Superseded);

    let tracks = engine.history().tracks();
    assert_eq!(tracks.keys().copied().collect::<Vec<_>>(), vec![UserId::new(2)]);

    let view = engine.view();
    assert_eq!(view.polylines.len(), 1);
    assert_eq!(view.polylines[0].user_id, UserId::new(2));
    // First point is covered by the live marker.
    assert_eq!(view.historical_markers.len(), 2);
}

#[tokio::test]
async fn hiding_history_supersedes_pending_fetch() {
    let (api, entered, open) = GatedApi::new().gate(1);
    let engine = engine(api);

    let slow = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move {
            engine
                .set_selection(Selection::users([UserId::new(1)]).with_history(true))
                .await
        }
    });
    timeout(WAIT, entered.notified()).await.unwrap();

    let hidden = engine
        .set_selection(Selection::users([UserId::new(1)]).with_history(false))
        .await;
    assert_eq!(hidden, RefreshOutcome::Cleared);

    open.notify_one();
    assert_eq!(
        timeout(WAIT, slow).await.unwrap().unwrap(),
        RefreshOutcome::Superseded
    );
    assert!(engine.history().tracks().is_empty());
    assert!(engine.view().polylines.is_empty());
}

#[tokio::test]
async fn failed_fetch_only_drops_that_user() {
    let engine = engine(GatedApi::new());

    let outcome = engine
        .set_selection(Selection::users([UserId::new(2), UserId::new(404)]).with_history(true))
        .await;

    assert_eq!(
        outcome,
        RefreshOutcome::Applied {
            tracks: 1,
            failed: 1
        }
    );
    assert!(engine.history().tracks().contains_key(&UserId::new(2)));
}

#[tokio::test]
async fn pending_refresh_hides_previous_selection_tracks() {
    let (api, entered, open) = GatedApi::new().gate(2);
    let hub = Arc::new(BroadcastHub::with_defaults());
    let engine = engine_on(api, Arc::clone(&hub));

    engine
        .set_selection(Selection::users([UserId::new(1)]).with_history(true))
        .await;
    assert_eq!(engine.view().polylines.len(), 1);

    let mut views = hub.views_rx();
    let pending = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move {
            engine
                .set_selection(Selection::users([UserId::new(2)]).with_history(true))
                .await
        }
    });
    timeout(WAIT, entered.notified()).await.unwrap();

    let first = timeout(WAIT, views.recv()).await.unwrap().unwrap();
    assert!(first.view.polylines.is_empty());
    assert!(first.view.historical_markers.is_empty());

    open.notify_one();
    assert_eq!(
        timeout(WAIT, pending).await.unwrap().unwrap(),
        RefreshOutcome::Applied {
            tracks: 1,
            failed: 0
        }
    );
    let settled = timeout(WAIT, views.recv()).await.unwrap().unwrap();
    let users: Vec<_> = settled.view.polylines.iter().map(|p| p.user_id).collect();
    assert_eq!(users, vec![UserId::new(2)]);
}
