//! Stream Connection
//!
//! The process-wide WebSocket link to the location stream.
//!
//! # Lifecycle
//!
//! ```text
//!            connect()                open
//!   Idle ─────────────► Connecting ─────────► Open
//!    ▲                     ▲                   │ unsolicited close
//!    │                     │ delay elapsed     ▼
//!    │                     └────────────── Reconnecting
//!    │  task exits                             │
//!    └──────────── Closing ◄───────────────────┘ disconnect() from any state
//! ```
//!
//! A run task owns the socket and processes frames strictly in arrival
//! order, dispatching each decoded feature to the [`SubscriberRegistry`]
//! before reading the next one. Each `connect()` starts a new generation
//! with its own [`CancellationToken`]; `disconnect()` cancels it, which also
//! cancels a pending reconnect delay. A task from an older generation never
//! publishes state.
//!
//! Consumers sharing the link should use [`StreamConnection::acquire`] and
//! [`StreamConnection::release`]: the link opens on the first hold and
//! closes when the last hold is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, FeatureCodec};
use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::registry::SubscriberRegistry;
use crate::infrastructure::metrics;

/// Floor for the heartbeat ticker period; `interval_at` rejects zero.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur on the stream connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The link is not open.
    #[error("stream is not connected")]
    NotConnected,

    /// Remote end closed the link.
    #[error("connection closed")]
    ConnectionClosed,

    /// Nothing received within the heartbeat timeout.
    #[error("heartbeat timeout after {0:?}")]
    HeartbeatTimeout(Duration),
}

// =============================================================================
// Connection State
// =============================================================================

/// Link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to.
    #[default]
    Idle,
    /// Opening the socket.
    Connecting,
    /// Receiving updates.
    Open,
    /// `disconnect()` called; the run task is shutting down.
    Closing,
    /// Dropped unexpectedly; waiting to retry.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Whether a run task is active in this state.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Reconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Stream connection configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnect timing.
    pub reconnect: ReconnectConfig,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatConfig,
}

impl StreamConnectionConfig {
    /// Default timing for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Override reconnect timing.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Override heartbeat timing.
    #[must_use]
    pub const fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

// =============================================================================
// Stream Connection
// =============================================================================

/// Handle to the connection shared by every consumer in the process.
pub type SharedStreamConnection = Arc<StreamConnection>;

static SHARED: OnceLock<SharedStreamConnection> = OnceLock::new();

struct Session {
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct Control {
    generation: u64,
    session: Option<Session>,
    holders: usize,
}

/// WebSocket client for the location stream.
pub struct StreamConnection {
    config: StreamConnectionConfig,
    codec: FeatureCodec,
    registry: Arc<SubscriberRegistry>,
    control: Mutex<Control>,
    state_tx: watch::Sender<ConnectionState>,
    connection_attempts: AtomicU64,
    reconnect_attempts: AtomicU64,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .field("subscribers", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl StreamConnection {
    /// Create an idle connection with an empty registry.
    #[must_use]
    pub fn new(config: StreamConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            config,
            codec: FeatureCodec::new(),
            registry: Arc::new(SubscriberRegistry::new()),
            control: Mutex::new(Control::default()),
            state_tx,
            connection_attempts: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
        }
    }

    /// The process-wide connection, created from `config` on first use.
    ///
    /// Later calls return the same instance and ignore `config`.
    #[must_use]
    pub fn shared(config: StreamConnectionConfig) -> SharedStreamConnection {
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new(config))))
    }

    /// Subscribers receiving decoded messages.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Stream URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Socket open attempts, including the first.
    #[must_use]
    pub fn connection_attempts(&self) -> u64 {
        self.connection_attempts.load(Ordering::Relaxed)
    }

    /// Retries fired after an unsolicited close.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Current number of holds.
    #[must_use]
    pub fn holders(&self) -> usize {
        self.control.lock().holders
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Open the link. No-op while a run task is active.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(self: &Arc<Self>) {
        let mut control = self.control.lock();
        self.start(&mut control);
    }

    /// Close the link and cancel any pending reconnect.
    ///
    /// The state moves to `Closing` immediately and to `Idle` once the run
    /// task has closed the socket.
    pub fn disconnect(&self) {
        let mut control = self.control.lock();
        self.stop(&mut control);
    }

    /// Take a hold on the link, opening it on the first hold.
    ///
    /// Returns the number of holds.
    pub fn acquire(self: &Arc<Self>) -> usize {
        let mut control = self.control.lock();
        control.holders += 1;
        tracing::debug!(holders = control.holders, "Stream hold acquired");
        if control.holders == 1 {
            self.start(&mut control);
        }
        control.holders
    }

    /// Release a hold, closing the link when the last one goes.
    ///
    /// Releasing with no holds is a no-op. Returns the remaining holds.
    pub fn release(&self) -> usize {
        let mut control = self.control.lock();
        if control.holders == 0 {
            tracing::warn!("Stream hold released without a matching acquire");
            return 0;
        }
        control.holders -= 1;
        tracing::debug!(holders = control.holders, "Stream hold released");
        if control.holders == 0 {
            self.stop(&mut control);
        }
        control.holders
    }

    /// Send `value` as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NotConnected`] unless the link is open, or a
    /// codec error if `value` does not serialize.
    pub fn send<T: Serialize>(&self, value: &T) -> Result<(), StreamError> {
        if self.state() != ConnectionState::Open {
            return Err(StreamError::NotConnected);
        }
        let text = self.codec.encode(value)?;
        let control = self.control.lock();
        let session = control.session.as_ref().ok_or(StreamError::NotConnected)?;
        session
            .outbound
            .send(Message::Text(text.into()))
            .map_err(|_| StreamError::NotConnected)
    }

    fn start(self: &Arc<Self>, control: &mut Control) {
        if control.session.is_some() {
            tracing::debug!(state = %self.state(), "Stream already active, connect ignored");
            return;
        }
        control.generation += 1;
        let generation = control.generation;
        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        control.session = Some(Session {
            cancel: cancel.clone(),
            outbound,
        });
        self.publish(ConnectionState::Connecting);

        tokio::spawn(Arc::clone(self).run(generation, cancel, outbound_rx));
    }

    fn stop(&self, control: &mut Control) {
        let Some(session) = control.session.take() else {
            tracing::debug!("Stream already idle, disconnect ignored");
            return;
        };
        tracing::info!(url = %self.config.url, "Disconnecting from location stream");
        self.publish(ConnectionState::Closing);
        session.cancel.cancel();
    }

    /// Publish `state` if `generation` is still the active session.
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let control = self.control.lock();
        let current = control.generation == generation && control.session.is_some();
        if current {
            self.publish(state);
        }
        current
    }

    /// Mark the run task for `generation` as finished.
    fn finish(&self, generation: u64) {
        let mut control = self.control.lock();
        if control.generation == generation {
            control.session = None;
            self.publish(ConnectionState::Idle);
        }
    }

    fn publish(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Stream state changed");
            metrics::set_connection_state(state);
        }
    }

    // =========================================================================
    // Run Loop
    // =========================================================================

    async fn run(
        self: Arc<Self>,
        generation: u64,
        cancel: CancellationToken,
        mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    ) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.connection_attempts.fetch_add(1, Ordering::Relaxed);

            match self
                .connect_and_run(generation, &cancel, &mut outbound_rx, &mut policy)
                .await
            {
                Ok(()) => break,
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    tracing::warn!(error = %e, "Location stream dropped");

                    let Some(delay) = policy.next_delay() else {
                        tracing::error!(
                            attempts = policy.attempt_count(),
                            "Giving up on location stream"
                        );
                        break;
                    };
                    let attempt = policy.attempt_count();
                    if !self.transition(generation, ConnectionState::Reconnecting) {
                        break;
                    }
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to location stream"
                    );

                    tokio::select! {
                        () = cancel.cancelled() => {
                            tracing::debug!("Reconnect cancelled");
                            break;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }

                    if !self.transition(generation, ConnectionState::Connecting) {
                        break;
                    }
                    self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
                    metrics::record_reconnect_attempt();
                }
            }
        }

        self.finish(generation);
        tracing::info!("Location stream task stopped");
    }

    /// Open one socket and pump it until it drops or `cancel` fires.
    ///
    /// `Ok(())` means cancelled.
    #[tracing::instrument(
        name = "stream.session",
        skip_all,
        fields(url = %self.config.url, generation = generation)
    )]
    async fn connect_and_run(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        outbound_rx: &mut mpsc::UnboundedReceiver<Message>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), StreamError> {
        tracing::info!("Connecting to location stream");

        let (ws_stream, _response) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result?,
        };
        let (mut write, mut read) = ws_stream.split();

        if !self.transition(generation, ConnectionState::Open) {
            let _ = write.send(Message::Close(None)).await;
            return Ok(());
        }
        policy.reset();
        tracing::info!("Location stream open");

        let mut heartbeat = HeartbeatMonitor::new(self.config.heartbeat.clone());
        let period = heartbeat.ping_interval().max(MIN_PING_INTERVAL);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match heartbeat.check() {
                        HeartbeatAction::SendPing => {
                            write.send(Message::Ping(Vec::new().into())).await?;
                        }
                        HeartbeatAction::Expired { silent_for } => {
                            return Err(StreamError::HeartbeatTimeout(silent_for));
                        }
                    }
                }
                Some(outbound) = outbound_rx.recv() => {
                    write.send(outbound).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.record_activity();
                            self.handle_text(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat.record_activity();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Server sent close frame");
                            return Err(StreamError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            heartbeat.record_activity();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(StreamError::ConnectionClosed),
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        metrics::record_stream_message();

        match self.codec.decode(text) {
            Ok(feature) => {
                let report = self.registry.dispatch(&feature);
                tracing::trace!(
                    delivered = report.delivered,
                    failed = report.failures.len(),
                    "Stream message dispatched"
                );
            }
            Err(e) => {
                metrics::record_decode_error();
                tracing::warn!(error = %e, "Discarding undecodable stream message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> StreamConnectionConfig {
        StreamConnectionConfig::new("ws://127.0.0.1:9/ws/locations/")
            .with_reconnect(ReconnectConfig::fixed(Duration::from_secs(60)))
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert!(ConnectionState::Open.is_active());
        assert!(!ConnectionState::Closing.is_active());
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }

    #[test]
    fn send_requires_open_link() {
        let connection = StreamConnection::new(unreachable_config());
        assert!(matches!(
            connection.send(&serde_json::json!({"ping": true})),
            Err(StreamError::NotConnected)
        ));
    }

    #[test]
    fn release_without_acquire_is_noop() {
        let connection = StreamConnection::new(unreachable_config());
        assert_eq!(connection.release(), 0);
        assert_eq!(connection.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_reconnect() {
        let connection = Arc::new(StreamConnection::new(unreachable_config()));
        let mut states = connection.subscribe_state();

        connection.connect();
        states
            .wait_for(|s| *s == ConnectionState::Reconnecting)
            .await
            .unwrap();

        connection.disconnect();
        states.wait_for(|s| *s == ConnectionState::Idle).await.unwrap();
        assert_eq!(connection.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn holds_are_counted() {
        let connection = Arc::new(StreamConnection::new(unreachable_config()));

        assert_eq!(connection.acquire(), 1);
        assert_eq!(connection.acquire(), 2);
        assert!(connection.state().is_active());

        assert_eq!(connection.release(), 1);
        assert!(connection.state().is_active());

        assert_eq!(connection.release(), 0);
        let mut states = connection.subscribe_state();
        states.wait_for(|s| *s == ConnectionState::Idle).await.unwrap();
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let connection = Arc::new(StreamConnection::new(unreachable_config()));
        connection.connect();
        connection.connect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connection.connection_attempts(), 1);
        connection.disconnect();
    }
}
