//! Engine Configuration Settings
//!
//! Configuration types for the location sync engine, loaded from
//! environment variables.

use std::time::Duration;

use reqwest::Url;

use crate::infrastructure::stream::{
    DEFAULT_DEV_PORT, EndpointError, HeartbeatConfig, ReconnectConfig, StreamConnectionConfig,
    stream_url_for_origin,
};

/// Token sent as `Authorization: Token <token>` on location updates.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    /// Wrap a token.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self(token)
    }

    /// The raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiToken([REDACTED])")
    }
}

/// REST API settings.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Base URL, e.g. `http://localhost:8000/api`.
    pub base_url: Url,
    /// Optional token for location updates.
    pub token: Option<ApiToken>,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Location stream settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Origin serving the app; the stream URL is derived from it.
    pub app_origin: String,
    /// Explicit stream URL, overriding derivation.
    pub url_override: Option<String>,
    /// Port substituted on a development host.
    pub dev_port: u16,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence before the link is considered dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnect delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnect delay.
    pub reconnect_delay_max: Duration,
    /// Reconnect delay multiplier.
    pub reconnect_delay_multiplier: f64,
    /// Reconnect jitter fraction.
    pub reconnect_jitter: f64,
    /// Maximum reconnect attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let reconnect = ReconnectConfig::default();
        let heartbeat = HeartbeatConfig::default();
        Self {
            app_origin: "http://localhost:3000".to_string(),
            url_override: None,
            dev_port: DEFAULT_DEV_PORT,
            heartbeat_interval: heartbeat.ping_interval,
            heartbeat_timeout: heartbeat.timeout,
            reconnect_delay_initial: reconnect.initial_delay,
            reconnect_delay_max: reconnect.max_delay,
            reconnect_delay_multiplier: reconnect.multiplier,
            reconnect_jitter: reconnect.jitter_factor,
            max_reconnect_attempts: reconnect.max_attempts,
        }
    }
}

impl StreamSettings {
    /// Stream URL: the override if set, otherwise derived from the origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin cannot be turned into a stream URL.
    pub fn url(&self) -> Result<String, ConfigError> {
        match &self.url_override {
            Some(url) => Ok(url.clone()),
            None => Ok(stream_url_for_origin(&self.app_origin, self.dev_port)?),
        }
    }

    /// Reconnect timing.
    #[must_use]
    pub const fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: self.reconnect_delay_initial,
            max_delay: self.reconnect_delay_max,
            multiplier: self.reconnect_delay_multiplier,
            jitter_factor: self.reconnect_jitter,
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// Heartbeat timing.
    #[must_use]
    pub const fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            ping_interval: self.heartbeat_interval,
            timeout: self.heartbeat_timeout,
        }
    }

    /// Full connection configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream URL cannot be derived.
    pub fn connection_config(&self) -> Result<StreamConnectionConfig, ConfigError> {
        Ok(StreamConnectionConfig::new(self.url()?)
            .with_reconnect(self.reconnect())
            .with_heartbeat(self.heartbeat()))
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Capacity of the view channel.
    pub views_capacity: usize,
    /// Capacity of the location update channel.
    pub updates_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            views_capacity: 64,
            updates_capacity: 1_024,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// REST API settings.
    pub api: ApiSettings,
    /// Location stream settings.
    pub stream: StreamSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// History points per user.
    pub history_limit: usize,
    /// Interval between simulated updates; `None` disables the simulator.
    pub simulator_interval: Option<Duration>,
}

/// Default REST base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

impl SyncConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL variable does not parse or the token is
    /// set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let api_url = env.string("LOCATION_API_URL", DEFAULT_API_URL);
        let base_url = Url::parse(&api_url).map_err(|e| ConfigError::InvalidUrl {
            key: "LOCATION_API_URL".to_string(),
            message: e.to_string(),
        })?;

        let token = match env.get("LOCATION_API_TOKEN") {
            Some(token) if token.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("LOCATION_API_TOKEN".to_string()));
            }
            Some(token) => Some(ApiToken::new(token.trim().to_string())),
            None => None,
        };

        let api = ApiSettings {
            base_url,
            token,
            timeout: env.secs("LOCATION_HTTP_TIMEOUT_SECS", Duration::from_secs(10)),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            app_origin: env.string("LOCATION_APP_ORIGIN", &defaults.app_origin),
            url_override: env.get("LOCATION_STREAM_URL").filter(|v| !v.trim().is_empty()),
            dev_port: env.parse("LOCATION_STREAM_DEV_PORT", defaults.dev_port),
            heartbeat_interval: env.secs(
                "LOCATION_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env.secs(
                "LOCATION_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: env.millis(
                "LOCATION_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "LOCATION_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "LOCATION_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: env.parse("LOCATION_RECONNECT_JITTER", defaults.reconnect_jitter),
            max_reconnect_attempts: env.parse(
                "LOCATION_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };
        stream.url()?;
        for (key, value) in [
            ("LOCATION_HEARTBEAT_INTERVAL_SECS", stream.heartbeat_interval),
            ("LOCATION_HEARTBEAT_TIMEOUT_SECS", stream.heartbeat_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(key.to_string()));
            }
        }

        let broadcast = BroadcastSettings {
            views_capacity: env.parse(
                "LOCATION_VIEW_CAPACITY",
                BroadcastSettings::default().views_capacity,
            ),
            updates_capacity: env.parse(
                "LOCATION_UPDATES_CAPACITY",
                BroadcastSettings::default().updates_capacity,
            ),
        };

        let server = ServerSettings {
            health_port: env.parse("LOCATION_HEALTH_PORT", ServerSettings::default().health_port),
        };

        let simulator_secs: u64 = env.parse("LOCATION_SIMULATOR_INTERVAL_SECS", 0);

        Ok(Self {
            api,
            stream,
            broadcast,
            server,
            history_limit: env.parse("LOCATION_HISTORY_LIMIT", 100_usize).max(1),
            simulator_interval: (simulator_secs > 0).then(|| Duration::from_secs(simulator_secs)),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// URL variable does not parse.
    #[error("invalid URL in {key}: {message}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Parser message.
        message: String,
    },

    /// Duration variable must be positive.
    #[error("environment variable {0} must be greater than zero")]
    ZeroDuration(String),

    /// Stream URL cannot be derived.
    #[error("cannot derive stream URL: {0}")]
    Endpoint(#[from] EndpointError),
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Result<SyncConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        SyncConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.api.base_url.as_str(), "http://localhost:8000/api");
        assert!(config.api.token.is_none());
        assert_eq!(config.history_limit, 100);
        assert_eq!(config.server.health_port, 8083);
        assert!(config.simulator_interval.is_none());
        assert_eq!(
            config.stream.url().unwrap(),
            "ws://localhost:8001/ws/locations/"
        );
        assert_eq!(
            config.stream.reconnect_delay_initial,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn overrides() {
        let config = config_from(&[
            ("LOCATION_APP_ORIGIN", "https://maps.example.org"),
            ("LOCATION_HISTORY_LIMIT", "25"),
            ("LOCATION_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("LOCATION_MAX_RECONNECT_ATTEMPTS", "7"),
            ("LOCATION_SIMULATOR_INTERVAL_SECS", "3"),
            ("LOCATION_API_TOKEN", " abc123 "),
        ])
        .unwrap();

        assert_eq!(
            config.stream.url().unwrap(),
            "wss://maps.example.org/ws/locations/"
        );
        assert_eq!(config.history_limit, 25);
        assert_eq!(config.simulator_interval, Some(Duration::from_secs(3)));
        assert_eq!(config.api.token.as_ref().map(ApiToken::expose), Some("abc123"));

        let reconnect = config.stream.reconnect();
        assert_eq!(reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(reconnect.max_attempts, 7);
    }

    #[test]
    fn stream_url_override_wins() {
        let config = config_from(&[("LOCATION_STREAM_URL", "ws://10.0.0.5:9000/ws/locations/")])
            .unwrap();
        assert_eq!(
            config.stream.connection_config().unwrap().url,
            "ws://10.0.0.5:9000/ws/locations/"
        );
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let config = config_from(&[("LOCATION_HISTORY_LIMIT", "lots")]).unwrap();
        assert_eq!(config.history_limit, 100);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(matches!(
            config_from(&[("LOCATION_API_URL", "not a url")]),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            config_from(&[("LOCATION_API_TOKEN", "  ")]),
            Err(ConfigError::EmptyValue(_))
        ));
        assert!(matches!(
            config_from(&[("LOCATION_HEARTBEAT_INTERVAL_SECS", "0")]),
            Err(ConfigError::ZeroDuration(ref key)) if key == "LOCATION_HEARTBEAT_INTERVAL_SECS"
        ));
        assert!(matches!(
            config_from(&[("LOCATION_HEARTBEAT_TIMEOUT_SECS", "0")]),
            Err(ConfigError::ZeroDuration(_))
        ));
        assert!(matches!(
            config_from(&[("LOCATION_APP_ORIGIN", "ftp://example.org")]),
            Err(ConfigError::Endpoint(_))
        ));
    }

    #[test]
    fn token_redacted_debug() {
        let token = ApiToken::new("secret456".to_string());
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));
    }
}
