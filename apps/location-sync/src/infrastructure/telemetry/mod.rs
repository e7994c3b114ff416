//! Tracing and OpenTelemetry
//!
//! Installs the `tracing` subscriber: a formatted log layer filtered by
//! `RUST_LOG`, plus an OTLP span exporter when enabled. Spans exported
//! from the engine carry the endpoints this instance syncs against as
//! resource attributes, so traces from several engines can be told apart.
//!
//! Spans emitted by the engine:
//!
//! | Span | Where |
//! |------|-------|
//! | `engine.load_snapshot` | REST snapshot fetch and store replace |
//! | `history.refresh` | one history refresh generation |
//! | `history.fetch` | one user's history request |
//! | `stream.session` | one WebSocket session, connect to drop |
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: `false` or `0` disables export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: location-sync)

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default service name.
pub const DEFAULT_SERVICE_NAME: &str = "location-sync";

/// Default OTLP gRPC endpoint.
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Resource attribute naming the stream endpoint.
pub const STREAM_URL_ATTRIBUTE: &str = "location_sync.stream.url";

/// Resource attribute naming the REST base URL.
pub const API_URL_ATTRIBUTE: &str = "location_sync.api.url";

/// Log filter directives applied on top of `RUST_LOG`.
const FILTER_DIRECTIVES: &[&str] = &[
    "location_sync=info",
    "tungstenite=warn",
    "tokio_tungstenite=warn",
    "hyper=warn",
    "reqwest=warn",
];

/// Flushes and shuts down the exporter on drop.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are exported.
    #[must_use]
    pub const fn exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shut down span exporter: {e}");
        }
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Export spans over OTLP.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// `service.name` resource attribute.
    pub service_name: String,
    /// Extra resource attributes.
    pub attributes: Vec<(&'static str, String)>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            attributes: Vec::new(),
        }
    }
}

impl TelemetryConfig {
    /// Read settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`. Blank values count as unset.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            enabled: get("OTEL_ENABLED").is_none_or(|v| {
                !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no")
            }),
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint),
            service_name: get("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            attributes: Vec::new(),
        }
    }

    /// Tag exported spans with the stream endpoint.
    #[must_use]
    pub fn with_stream_url(self, url: impl Into<String>) -> Self {
        self.with_attribute(STREAM_URL_ATTRIBUTE, url)
    }

    /// Tag exported spans with the REST base URL.
    #[must_use]
    pub fn with_api_url(self, url: impl Into<String>) -> Self {
        self.with_attribute(API_URL_ATTRIBUTE, url)
    }

    /// Add a resource attribute, replacing an earlier value for `key`.
    #[must_use]
    pub fn with_attribute(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.attributes.retain(|(k, _)| *k != key);
        self.attributes.push((key, value.into()));
        self
    }

    /// OpenTelemetry resource describing this instance.
    #[must_use]
    pub fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
            .with_attributes(
                self.attributes
                    .iter()
                    .map(|(key, value)| KeyValue::new(*key, value.clone())),
            )
            .build()
    }
}

/// `RUST_LOG` plus the engine's default directives.
fn env_filter() -> EnvFilter {
    FILTER_DIRECTIVES
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive)
}

/// Install the subscriber using [`TelemetryConfig::from_env`].
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Install the subscriber.
///
/// Keep the guard alive for the life of the process. If the OTLP exporter
/// cannot be built, logging continues without export.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let exporter = if config.enabled {
        opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.otlp_endpoint)
            .build()
            .map_err(|e| eprintln!("OTLP exporter unavailable, logging only: {e}"))
            .ok()
    } else {
        None
    };

    let Some(exporter) = exporter else {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .init();
        return TelemetryGuard {
            tracer_provider: None,
        };
    };

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .build();
    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer(config.service_name));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    }
}

// =============================================================================
// Tests
// =============================================================================
