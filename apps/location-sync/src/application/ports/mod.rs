//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `LocationApi`: request/response access to users, the active-location
//!   snapshot, per-user history, and location injection

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::location::{FeatureCollection, UserId};

/// A user known to the location API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    /// User id.
    pub id: UserId,
    /// Login name.
    pub username: String,
}

/// Body of an injected location update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationUpdate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Target user.
    pub user_id: UserId,
}

/// Location API errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationApiError {
    /// Request never produced a response.
    #[error("location API transport error: {message}")]
    Transport {
        /// Error details.
        message: String,
    },

    /// Server answered with a non-success status.
    #[error("location API returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error payload or body.
        message: String,
    },

    /// Response body could not be decoded.
    #[error("location API response decode error: {message}")]
    Decode {
        /// Error details.
        message: String,
    },
}

/// Port for the location REST API.
#[async_trait]
pub trait LocationApi: Send + Sync {
    /// `GET /users/`
    async fn list_users(&self) -> Result<Vec<UserSummary>, LocationApiError>;

    /// `GET /active-locations/`
    async fn active_locations(&self) -> Result<FeatureCollection, LocationApiError>;

    /// `GET /location-history/{user}/?limit=N`
    async fn location_history(
        &self,
        user: UserId,
        limit: usize,
    ) -> Result<FeatureCollection, LocationApiError>;

    /// `POST /update-location/`
    ///
    /// Returns the created or updated record as sent by the server.
    async fn update_location(
        &self,
        update: LocationUpdate,
    ) -> Result<serde_json::Value, LocationApiError>;
}
