//! Engine Flow Integration Tests
//!
//! Snapshot over REST, then live updates over a WebSocket stream, through to
//! published view-models.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use location_sync::infrastructure::stream::ReconnectConfig;
use location_sync::{
    ApiSettings, BroadcastHub, ConnectionState, Coordinates, LocationApiClient, LocationFeature,
    LocationSyncEngine, Selection, StreamConnection, StreamConnectionConfig, UserId, ViewModel,
};

const WAIT: Duration = Duration::from_secs(5);

async fn rest_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "username": "asha"},
            {"id": 2, "username": "ravi"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/active-locations/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "features": [{
                "geometry": {"type": "Point", "coordinates": [74.9, 12.1]},
                "properties": {"user": 1, "username": "asha"}
            }]
        })))
        .mount(&server)
        .await;
    server
}

/// Serve `frames` to the first client once `release` fires.
async fn stream_server(frames: Vec<String>) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws/locations/", listener.local_addr().unwrap());
    let (release_tx, release_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = release_rx.await;
        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
        while let Some(Ok(_)) = ws.next().await {}
    });

    (url, release_tx)
}

fn frame(feature: &LocationFeature) -> String {
    serde_json::to_string(feature).unwrap()
}

async fn wait_for_view(
    rx: &mut tokio::sync::broadcast::Receiver<location_sync::ViewBroadcast>,
    done: impl Fn(&ViewModel) -> bool,
) -> Arc<ViewModel> {
    timeout(WAIT, async {
        loop {
            let published = rx.recv().await.unwrap();
            if done(&published.view) {
                return published.view;
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn snapshot_then_stream_updates_reach_the_view() {
    let rest = rest_server().await;
    let (ws_url, release) = stream_server(vec![
        frame(&LocationFeature::point(
            UserId::new(2),
            "ravi",
            Coordinates::new(9.5, 76.1),
        )),
        "{\"broken\": ".to_string(),
        frame(&LocationFeature::point(
            UserId::new(1),
            "asha",
            Coordinates::new(12.2, 75.0),
        )),
    ])
    .await;

    let api = LocationApiClient::new(&ApiSettings {
        base_url: Url::parse(&format!("{}/api", rest.uri())).unwrap(),
        token: None,
        timeout: Duration::from_secs(2),
    })
    .unwrap();
    let hub = Arc::new(BroadcastHub::with_defaults());
    let mut views = hub.views_rx();
    let engine = Arc::new(LocationSyncEngine::new(Arc::new(api), hub, 100));

    let connection = Arc::new(StreamConnection::new(
        StreamConnectionConfig::new(ws_url)
            .with_reconnect(ReconnectConfig::fixed(Duration::from_millis(50))),
    ));
    engine.attach(&connection);
    assert_eq!(connection.holders(), 1);

    assert_eq!(engine.load_users().await.unwrap().len(), 2);
    assert_eq!(engine.load_snapshot().await.unwrap(), 1);

    let view = wait_for_view(&mut views, |v| v.markers.len() == 1).await;
    assert_eq!(view.center, Coordinates::new(12.1, 74.9));

    release.send(()).unwrap();

    let view = wait_for_view(&mut views, |v| {
        v.markers
            .iter()
            .any(|m| m.user_id == UserId::new(1) && m.position == Coordinates::new(12.2, 75.0))
    })
    .await;
    // Order follows first sighting: snapshot user first, stream user second.
    let users: Vec<_> = view.markers.iter().map(|m| m.user_id).collect();
    assert_eq!(users, vec![UserId::new(1), UserId::new(2)]);
    assert_eq!(engine.store().len(), 2);

    engine
        .set_selection(Selection::users([UserId::new(2)]))
        .await;
    let filtered = engine.view();
    assert_eq!(filtered.markers.len(), 1);
    assert_eq!(filtered.markers[0].username, "ravi");

    engine.detach(&connection);
    assert_eq!(connection.holders(), 0);
    let mut state = connection.subscribe_state();
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Idle))
        .await
        .unwrap()
        .unwrap();
    assert!(connection.registry().is_empty());
}

#[tokio::test]
async fn stream_features_without_user_use_current_user() {
    let rest = rest_server().await;
    let mut anonymous =
        LocationFeature::point(UserId::new(0), "asha", Coordinates::new(11.0, 75.5));
    if let Some(props) = anonymous.properties.as_mut() {
        props.user = None;
    }
    let (ws_url, release) = stream_server(vec![frame(&anonymous)]).await;

    let api = LocationApiClient::new(&ApiSettings {
        base_url: Url::parse(&format!("{}/api", rest.uri())).unwrap(),
        token: None,
        timeout: Duration::from_secs(2),
    })
    .unwrap();
    let hub = Arc::new(BroadcastHub::with_defaults());
    let mut updates = hub.location_updates_rx();
    let engine = Arc::new(LocationSyncEngine::new(Arc::new(api), hub, 100));
    engine.set_current_user(Some(UserId::new(1)));

    let connection = Arc::new(StreamConnection::new(StreamConnectionConfig::new(ws_url)));
    engine.attach(&connection);
    release.send(()).unwrap();

    let update = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.record.user_id(), UserId::new(1));
    assert_eq!(update.record.coordinates(), Coordinates::new(11.0, 75.5));

    engine.detach(&connection);
}
