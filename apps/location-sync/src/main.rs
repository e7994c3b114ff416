//! Location Sync Binary
//!
//! Starts the live location synchronization engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin location-sync
//! ```
//!
//! # Environment Variables
//!
//! - `LOCATION_API_URL`: REST base URL (default: <http://localhost:8000/api>)
//! - `LOCATION_APP_ORIGIN`: Origin the stream URL is derived from (default: <http://localhost:3000>)
//! - `LOCATION_STREAM_URL`: Explicit stream URL
//! - `LOCATION_API_TOKEN`: Token for location injection
//! - `LOCATION_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `LOCATION_SIMULATOR_INTERVAL_SECS`: Random injection interval, 0 disables (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use location_sync::infrastructure::health::{HealthServer, HealthServerState};
use location_sync::infrastructure::telemetry;
use location_sync::{
    BroadcastConfig, BroadcastHub, LocationApi, LocationApiClient, LocationSimulator,
    LocationSyncEngine, SharedBroadcastHub, StreamConnection, SyncConfig, TelemetryConfig,
    init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv_from_ancestors();

    let config = SyncConfig::from_env().context("invalid configuration")?;
    let connection_config = config.stream.connection_config()?;

    let _telemetry_guard = telemetry::init_with_config(
        TelemetryConfig::from_env()
            .with_stream_url(&connection_config.url)
            .with_api_url(config.api.base_url.as_str()),
    );

    tracing::info!("Starting location sync engine");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    log_config(&config, &connection_config.url);

    let shutdown_token = CancellationToken::new();

    let broadcast_hub: SharedBroadcastHub =
        Arc::new(BroadcastHub::new(BroadcastConfig::from(config.broadcast)));

    let api: Arc<dyn LocationApi> = Arc::new(
        LocationApiClient::new(&config.api).context("failed to build REST client")?,
    );

    let engine = Arc::new(LocationSyncEngine::new(
        Arc::clone(&api),
        Arc::clone(&broadcast_hub),
        config.history_limit,
    ));

    let connection = StreamConnection::shared(connection_config);
    engine.attach(&connection);

    if let Err(e) = engine.load_users().await {
        tracing::warn!(error = %e, "Continuing without user list");
    }
    if let Err(e) = engine.load_snapshot().await {
        tracing::warn!(error = %e, "Continuing without initial snapshot");
    }

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&connection),
            engine.store(),
            Arc::clone(&broadcast_hub),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    if let Some(interval) = config.simulator_interval {
        let simulator = LocationSimulator::new(Arc::clone(&api));
        tokio::spawn(run_simulator(simulator, interval, shutdown_token.clone()));
    }

    tokio::spawn(log_views(
        Arc::clone(&broadcast_hub),
        shutdown_token.clone(),
    ));

    tracing::info!("Location sync engine ready");

    await_shutdown(shutdown_token).await;

    engine.detach(&connection);

    tracing::info!("Location sync engine stopped");
    Ok(())
}

/// Inject a random location every `interval` until cancelled.
async fn run_simulator(
    simulator: LocationSimulator,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(interval_secs = interval.as_secs(), "Location simulator running");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = simulator.inject_random().await {
                    tracing::warn!(error = %e, "Simulated update failed");
                }
            }
        }
    }
}

/// Log a summary of each published view.
async fn log_views(hub: SharedBroadcastHub, cancel: CancellationToken) {
    let mut views = hub.views_rx();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            received = views.recv() => match received {
                Ok(published) => tracing::debug!(
                    sequence = published.sequence,
                    markers = published.view.markers.len(),
                    polylines = published.view.polylines.len(),
                    historical = published.view.historical_markers.len(),
                    "View published"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "View logger lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &SyncConfig, stream_url: &str) {
    tracing::info!(
        api_url = %config.api.base_url,
        stream_url,
        health_port = config.server.health_port,
        history_limit = config.history_limit,
        simulator = config.simulator_interval.is_some(),
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
