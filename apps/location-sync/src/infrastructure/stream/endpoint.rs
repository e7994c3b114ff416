//! Stream endpoint derivation.
//!
//! The stream lives under the same host that serves the app, at
//! `/ws/locations/`. `http` becomes `ws` and `https` becomes `wss`. On a
//! local development host the stream is served by a separate process, so
//! the port is swapped for the dev port.

use reqwest::Url;

/// Path of the location stream.
pub const STREAM_PATH: &str = "/ws/locations/";

/// Port the stream listens on during local development.
pub const DEFAULT_DEV_PORT: u16 = 8001;

const DEV_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

/// Endpoint derivation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    /// Origin is not a valid URL.
    #[error("invalid origin {origin}: {message}")]
    InvalidOrigin {
        /// The rejected origin.
        origin: String,
        /// Parser message.
        message: String,
    },

    /// Origin scheme is not `http` or `https`.
    #[error("unsupported origin scheme: {0}")]
    UnsupportedScheme(String),
}

/// Derive the stream URL from the app origin.
///
/// # Errors
///
/// Returns an error if `origin` does not parse or is not `http(s)`.
///
/// # Example
///
/// ```
/// use location_sync::infrastructure::stream::stream_url_for_origin;
///
/// let url = stream_url_for_origin("http://localhost:3000", 8001).unwrap();
/// assert_eq!(url, "ws://localhost:8001/ws/locations/");
///
/// let url = stream_url_for_origin("https://maps.example.org", 8001).unwrap();
/// assert_eq!(url, "wss://maps.example.org/ws/locations/");
/// ```
pub fn stream_url_for_origin(origin: &str, dev_port: u16) -> Result<String, EndpointError> {
    let parsed = Url::parse(origin).map_err(|e| EndpointError::InvalidOrigin {
        origin: origin.to_string(),
        message: e.to_string(),
    })?;

    let scheme = match parsed.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
    };
    let host = parsed.host_str().ok_or_else(|| EndpointError::InvalidOrigin {
        origin: origin.to_string(),
        message: "missing host".to_string(),
    })?;

    let port = if DEV_HOSTS.contains(&host) {
        Some(dev_port)
    } else {
        parsed.port()
    };

    Ok(match port {
        Some(port) => format!("{scheme}://{host}:{port}{STREAM_PATH}"),
        None => format!("{scheme}://{host}{STREAM_PATH}"),
    })
}
