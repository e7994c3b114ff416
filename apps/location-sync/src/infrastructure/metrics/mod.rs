//! Prometheus Metrics Module
//!
//! Exposes engine metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Stream**: Messages received, decode errors, reconnects, link state
//! - **Store**: Tracked users, rejected records
//! - **Subscribers**: Callback failures by subscriber
//! - **History**: Refresh latency and failed fetches
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::stream::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Calling again returns the installed handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Stream
    describe_counter!(
        "location_sync_stream_messages_total",
        "Text frames received on the location stream"
    );
    describe_counter!(
        "location_sync_decode_errors_total",
        "Stream frames discarded because they did not decode"
    );
    describe_counter!(
        "location_sync_reconnects_total",
        "Reconnect attempts after an unsolicited close"
    );
    describe_gauge!(
        "location_sync_connection_state",
        "Stream link state (0 idle, 1 connecting, 2 open, 3 closing, 4 reconnecting)"
    );

    // Store
    describe_gauge!("location_sync_store_users", "Users in the location table");
    describe_counter!(
        "location_sync_rejected_records_total",
        "Features rejected by validation, by source"
    );

    // Subscribers
    describe_counter!(
        "location_sync_subscriber_failures_total",
        "Subscriber callbacks that failed or panicked"
    );

    // History
    describe_histogram!(
        "location_sync_history_refresh_seconds",
        "Time to fetch all history tracks for a selection"
    );
    describe_counter!(
        "location_sync_history_fetch_failures_total",
        "Per-user history fetches that failed"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const fn state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Idle => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Open => 2.0,
        ConnectionState::Closing => 3.0,
        ConnectionState::Reconnecting => 4.0,
    }
}

/// Record a text frame received on the stream.
pub fn record_stream_message() {
    counter!("location_sync_stream_messages_total").increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!("location_sync_decode_errors_total").increment(1);
}

/// Record a reconnect attempt.
pub fn record_reconnect_attempt() {
    counter!("location_sync_reconnects_total").increment(1);
}

/// Update the link state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("location_sync_connection_state").set(state_value(state));
}

/// Update the tracked user count.
#[allow(clippy::cast_precision_loss)]
pub fn set_store_size(users: usize) {
    gauge!("location_sync_store_users").set(users as f64);
}

/// Record a rejected feature. `source` is `snapshot` or `stream`.
pub fn record_rejected_record(source: &'static str) {
    counter!("location_sync_rejected_records_total", "source" => source).increment(1);
}

/// Record a failed subscriber callback.
pub fn record_subscriber_failure(subscriber: &str) {
    counter!(
        "location_sync_subscriber_failures_total",
        "subscriber" => subscriber.to_string()
    )
    .increment(1);
}

/// Record a completed history refresh.
pub fn record_history_refresh(duration: Duration, failed: usize) {
    histogram!("location_sync_history_refresh_seconds").record(duration.as_secs_f64());
    if failed > 0 {
        counter!("location_sync_history_fetch_failures_total")
            .increment(u64::try_from(failed).unwrap_or(u64::MAX));
    }
}

// =============================================================================
// Tests
// =============================================================================
