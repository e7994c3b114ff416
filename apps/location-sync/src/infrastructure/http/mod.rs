//! Location REST Client
//!
//! `reqwest` adapter implementing the [`LocationApi`] port.
//!
//! | Operation | Request |
//! |---|---|
//! | users | `GET {base}/users/` |
//! | snapshot | `GET {base}/active-locations/` |
//! | history | `GET {base}/location-history/{user}/?limit=N` |
//! | inject | `POST {base}/update-location/` |
//!
//! Failures are returned to the caller without retry.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::application::ports::{LocationApi, LocationApiError, LocationUpdate, UserSummary};
use crate::domain::location::{FeatureCollection, UserId};
use crate::infrastructure::config::{ApiSettings, ApiToken};

// =============================================================================
// Error Type
// =============================================================================

/// REST client errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Client could not be built.
    #[error("HTTP client setup failed: {0}")]
    Setup(String),

    /// Request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// Server returned an `{"error": ...}` payload.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Server-provided message.
        message: String,
    },

    /// Non-success status without an error payload.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Raw body.
        body: String,
    },

    /// Body did not decode.
    #[error("JSON parse error: {0}")]
    JsonParse(String),
}

impl From<ApiError> for LocationApiError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Setup(message) | ApiError::Network(message) => Self::Transport { message },
            ApiError::Api { status, message } => Self::Status { status, message },
            ApiError::Status { status, body } => Self::Status {
                status,
                message: body,
            },
            ApiError::JsonParse(message) => Self::Decode { message },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: String,
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the location API.
#[derive(Debug, Clone)]
pub struct LocationApiClient {
    client: Client,
    base_url: String,
    token: Option<ApiToken>,
}

impl LocationApiClient {
    /// Create a client from settings.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Setup`] if the underlying client cannot be built.
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ApiError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.as_str().trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(self.client.get(self.url(path))).await
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if status.is_success() {
            let body = if body.trim().is_empty() { "null" } else { &body };
            return serde_json::from_str(body).map_err(|e| ApiError::JsonParse(e.to_string()));
        }
        Err(error_for(status, body))
    }
}

fn error_for(status: StatusCode, body: String) -> ApiError {
    match serde_json::from_str::<ErrorPayload>(&body) {
        Ok(payload) => ApiError::Api {
            status: status.as_u16(),
            message: payload.error,
        },
        Err(_) => ApiError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl LocationApi for LocationApiClient {
    async fn list_users(&self) -> Result<Vec<UserSummary>, LocationApiError> {
        Ok(self.get("users/").await?)
    }

    async fn active_locations(&self) -> Result<FeatureCollection, LocationApiError> {
        Ok(self.get("active-locations/").await?)
    }

    async fn location_history(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<FeatureCollection, LocationApiError> {
        let request = self
            .client
            .get(self.url(&format!("location-history/{user}/")))
            .query(&[("limit", limit)]);
        Ok(self.execute(request).await?)
    }

    async fn update_location(
        &self,
        update: LocationUpdate,
    ) -> Result<serde_json::Value, LocationApiError> {
        let mut request = self.client.post(self.url("update-location/")).json(&update);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {}", token.expose()));
        }
        Ok(self.execute(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::Url;

    use super::*;

    fn client(base: &str) -> LocationApiClient {
        LocationApiClient::new(&ApiSettings {
            base_url: Url::parse(base).unwrap(),
            token: None,
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[test]
    fn urls_join_cleanly() {
        let client = client("http://localhost:8000/api/");
        assert_eq!(client.base_url(), "http://localhost:8000/api");
        assert_eq!(client.url("users/"), "http://localhost:8000/api/users/");
        assert_eq!(client.url("/users/"), "http://localhost:8000/api/users/");
    }

    #[test]
    fn error_payload_becomes_api_error() {
        let err = error_for(StatusCode::BAD_REQUEST, r#"{"error":"User not found"}"#.to_string());
        assert!(matches!(err, ApiError::Api { status: 400, ref message } if message == "User not found"));

        let err = error_for(StatusCode::BAD_GATEWAY, "upstream down".to_string());
        assert!(matches!(err, ApiError::Status { status: 502, .. }));
    }

    #[test]
    fn maps_into_port_error() {
        assert_eq!(
            LocationApiError::from(ApiError::Network("refused".to_string())),
            LocationApiError::Transport {
                message: "refused".to_string()
            }
        );
        assert_eq!(
            LocationApiError::from(ApiError::Api {
                status: 400,
                message: "bad".to_string()
            }),
            LocationApiError::Status {
                status: 400,
                message: "bad".to_string()
            }
        );
    }
}
