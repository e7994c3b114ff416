//! Location Simulator
//!
//! Injects synthetic location updates for a user through the REST API.
//! The server echoes each accepted update on the live stream.

use std::sync::Arc;

use rand::Rng;

use crate::application::ports::{LocationApi, LocationApiError, LocationUpdate, UserSummary};
use crate::domain::location::Coordinates;

/// Decimal places kept on generated coordinates.
const COORDINATE_PRECISION: f64 = 1_000_000.0;

/// Area random coordinates are drawn from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Southern edge.
    pub min_latitude: f64,
    /// Northern edge.
    pub max_latitude: f64,
    /// Western edge.
    pub min_longitude: f64,
    /// Eastern edge.
    pub max_longitude: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min_latitude: 8.3,
            max_latitude: 12.8,
            min_longitude: 74.8,
            max_longitude: 77.2,
        }
    }
}

impl BoundingBox {
    /// Whether `coordinates` fall inside the box.
    #[must_use]
    pub fn contains(&self, coordinates: Coordinates) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&coordinates.latitude)
            && (self.min_longitude..=self.max_longitude).contains(&coordinates.longitude)
    }

    /// Draw a random point, rounded to six decimals.
    #[must_use]
    pub fn random_coordinates<R: Rng>(&self, rng: &mut R) -> Coordinates {
        let latitude = round(rng.random_range(self.min_latitude..=self.max_latitude));
        let longitude = round(rng.random_range(self.min_longitude..=self.max_longitude));
        Coordinates::new(latitude, longitude)
    }
}

fn round(value: f64) -> f64 {
    (value * COORDINATE_PRECISION).round() / COORDINATE_PRECISION
}

/// Simulator errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulatorError {
    /// The user list is empty.
    #[error("no users available")]
    NoUsers,

    /// No user with that name.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// The API call failed.
    #[error(transparent)]
    Api(#[from] LocationApiError),
}

/// Injects updates through a [`LocationApi`].
pub struct LocationSimulator {
    api: Arc<dyn LocationApi>,
    bounds: BoundingBox,
}

impl LocationSimulator {
    /// Create a simulator over the default bounding box.
    #[must_use]
    pub fn new(api: Arc<dyn LocationApi>) -> Self {
        Self {
            api,
            bounds: BoundingBox::default(),
        }
    }

    /// Use a custom bounding box.
    #[must_use]
    pub const fn with_bounds(mut self, bounds: BoundingBox) -> Self {
        self.bounds = bounds;
        self
    }

    /// The bounding box in use.
    #[must_use]
    pub const fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Send `coordinates` for the user named `username`.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::UnknownUser`] if no user has that name, or
    /// the API failure. Server error payloads surface as the error message.
    pub async fn inject(
        &self,
        username: &str,
        coordinates: Coordinates,
    ) -> Result<serde_json::Value, SimulatorError> {
        let users = self.api.list_users().await?;
        let user = users
            .iter()
            .find(|u| u.username == username)
            .ok_or_else(|| SimulatorError::UnknownUser(username.to_string()))?;
        self.send(user, coordinates).await
    }

    /// Send a random point for a random user.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::NoUsers`] if the user list is empty, or the
    /// API failure.
    pub async fn inject_random(&self) -> Result<serde_json::Value, SimulatorError> {
        let users = self.api.list_users().await?;
        let (user, coordinates) = {
            let mut rng = rand::rng();
            if users.is_empty() {
                return Err(SimulatorError::NoUsers);
            }
            let user = &users[rng.random_range(0..users.len())];
            (user, self.bounds.random_coordinates(&mut rng))
        };
        self.send(user, coordinates).await
    }

    async fn send(
        &self,
        user: &UserSummary,
        coordinates: Coordinates,
    ) -> Result<serde_json::Value, SimulatorError> {
        let update = LocationUpdate {
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            user_id: user.id,
        };
        let response = self.api.update_location(update).await?;
        tracing::info!(
            user_id = %user.id,
            username = %user.username,
            latitude = coordinates.latitude,
            longitude = coordinates.longitude,
            "Injected location update"
        );
        Ok(response)
    }
}
