//! Location Types
//!
//! The GeoJSON feature shape served by the location API and stream, and the
//! validated [`LocationRecord`] the rest of the engine works with.
//!
//! # Wire Shape
//!
//! ```json
//! {
//!   "type": "Feature",
//!   "id": 42,
//!   "geometry": { "type": "Point", "coordinates": [76.27, 9.93] },
//!   "properties": { "user": 3, "username": "asha", "timestamp": "2024-05-01T10:00:00Z" }
//! }
//! ```
//!
//! Coordinates are `[longitude, latitude]` on the wire; everything past
//! decoding uses [`Coordinates`] with named fields.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Identity of a tracked user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// Create a user id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Coordinates
// =============================================================================

/// A WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees, -90..=90.
    pub latitude: f64,
    /// Longitude in degrees, -180..=180.
    pub longitude: f64,
}

impl Coordinates {
    /// Create a position from latitude and longitude.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Build from a GeoJSON `[longitude, latitude, ...]` array.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than two values are present or either value
    /// is out of range.
    pub fn from_geojson(coordinates: &[f64]) -> Result<Self, FeatureError> {
        let [longitude, latitude, ..] = coordinates else {
            return Err(FeatureError::InvalidCoordinates(format!(
                "expected [longitude, latitude], got {} values",
                coordinates.len()
            )));
        };

        let coords = Self::new(*latitude, *longitude);
        coords.validate()?;
        Ok(coords)
    }

    /// Check that both axes are finite and in range.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::InvalidCoordinates`] when out of range.
    pub fn validate(&self) -> Result<(), FeatureError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(FeatureError::InvalidCoordinates(format!(
                "latitude {} out of range",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(FeatureError::InvalidCoordinates(format!(
                "longitude {} out of range",
                self.longitude
            )));
        }
        Ok(())
    }

    /// The GeoJSON `[longitude, latitude]` pair.
    #[must_use]
    pub const fn to_geojson(self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Point geometry of a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointGeometry {
    /// Geometry type, normally `"Point"`.
    #[serde(rename = "type", default = "point_type")]
    pub kind: String,
    /// `[longitude, latitude]`.
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

fn point_type() -> String {
    "Point".to_string()
}

/// Properties of a location feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    /// Owning user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserId>,
    /// Display name of the owning user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// When the position was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Any other properties the server sends along.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A single GeoJSON feature describing one user's position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationFeature {
    /// Feature id assigned by the server (number or string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    /// Point geometry.
    #[serde(default)]
    pub geometry: Option<PointGeometry>,
    /// Feature properties.
    #[serde(default)]
    pub properties: Option<FeatureProperties>,
}

impl LocationFeature {
    /// Build a feature from its parts.
    #[must_use]
    pub fn point(user: UserId, username: &str, coordinates: Coordinates) -> Self {
        Self {
            id: None,
            geometry: Some(PointGeometry {
                kind: point_type(),
                coordinates: coordinates.to_geojson().to_vec(),
            }),
            properties: Some(FeatureProperties {
                user: Some(user),
                username: Some(username.to_string()),
                timestamp: None,
                extra: serde_json::Map::new(),
            }),
        }
    }

    /// Attach a timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        if let Some(props) = self.properties.as_mut() {
            props.timestamp = Some(timestamp);
        }
        self
    }

    /// Attach a feature id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<serde_json::Value>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A GeoJSON feature collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    /// The features, in server order.
    #[serde(default)]
    pub features: Vec<LocationFeature>,
}

// =============================================================================
// Location Record
// =============================================================================

/// The validated, most recent known location of one user.
///
/// Records are immutable: a newer update produces a new record that replaces
/// the stored one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationRecord {
    feature_id: Option<String>,
    user_id: UserId,
    username: String,
    coordinates: Coordinates,
    timestamp: Option<DateTime<Utc>>,
}

impl LocationRecord {
    /// Create a record directly.
    #[must_use]
    pub fn new(
        user_id: UserId,
        username: impl Into<String>,
        coordinates: Coordinates,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            feature_id: None,
            user_id,
            username: username.into(),
            coordinates,
            timestamp,
        }
    }

    /// Attach the server feature id.
    #[must_use]
    pub fn with_feature_id(mut self, id: impl Into<String>) -> Self {
        self.feature_id = Some(id.into());
        self
    }

    /// Validate and convert a decoded feature.
    ///
    /// `fallback_user` attributes features that carry no `properties.user`.
    ///
    /// # Errors
    ///
    /// Rejects features with missing geometry, missing properties, bad
    /// coordinates, or no resolvable user.
    pub fn from_feature(
        feature: &LocationFeature,
        fallback_user: Option<UserId>,
    ) -> Result<Self, FeatureError> {
        let geometry = feature
            .geometry
            .as_ref()
            .ok_or(FeatureError::MissingGeometry)?;
        let properties = feature
            .properties
            .as_ref()
            .ok_or(FeatureError::MissingProperties)?;

        let user_id = properties
            .user
            .or(fallback_user)
            .ok_or(FeatureError::MissingUser)?;
        let coordinates = Coordinates::from_geojson(&geometry.coordinates)?;

        Ok(Self {
            feature_id: feature.id.as_ref().and_then(feature_id_key),
            user_id,
            username: properties.username.clone().unwrap_or_default(),
            coordinates,
            timestamp: properties.timestamp,
        })
    }

    /// Server feature id, if any.
    #[must_use]
    pub fn feature_id(&self) -> Option<&str> {
        self.feature_id.as_deref()
    }

    /// Owning user.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Display name (may be empty).
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Position.
    #[must_use]
    pub const fn coordinates(&self) -> Coordinates {
        self.coordinates
    }

    /// Recording time.
    #[must_use]
    pub const fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }
}

fn feature_id_key(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Why a feature could not become a [`LocationRecord`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeatureError {
    /// No geometry.
    #[error("feature has no geometry")]
    MissingGeometry,
    /// No properties.
    #[error("feature has no properties")]
    MissingProperties,
    /// No owning user.
    #[error("feature has no owning user")]
    MissingUser,
    /// Coordinates missing or out of range.
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),
}

// =============================================================================
// Tests
// =============================================================================
