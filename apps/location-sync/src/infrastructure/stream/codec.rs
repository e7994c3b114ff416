//! Stream Codec
//!
//! Every text frame on the location stream carries exactly one GeoJSON
//! feature:
//!
//! ```json
//! {"type":"Feature","geometry":{"type":"Point","coordinates":[76.2,10.1]},
//!  "properties":{"user":3,"username":"asha","timestamp":"2024-05-01T10:00:00Z"}}
//! ```
//!
//! The codec only checks the frame shape. Field validation belongs to
//! [`LocationRecord::from_feature`](crate::domain::location::LocationRecord::from_feature).

use crate::domain::location::LocationFeature;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not a single JSON object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for location stream frames.
#[derive(Debug, Default, Clone)]
pub struct FeatureCodec;

impl FeatureCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame into a feature.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object or does not match
    /// the feature shape.
    pub fn decode(&self, text: &str) -> Result<LocationFeature, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}",
                preview(trimmed)
            )));
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    /// Encode a value as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map_or(text.len(), |(index, _)| index);
    &text[..end]
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::location::{Coordinates, UserId};

    #[test]
    fn decode_feature() {
        let codec = FeatureCodec::new();
        let feature = codec
            .decode(
                r#"{"type":"Feature","id":7,
                    "geometry":{"type":"Point","coordinates":[76.2,10.1]},
                    "properties":{"user":3,"username":"asha","timestamp":"2024-05-01T10:00:00Z"}}"#,
            )
            .unwrap();

        let properties = feature.properties.unwrap();
        assert_eq!(properties.user, Some(UserId::new(3)));
        assert_eq!(properties.username.as_deref(), Some("asha"));
        assert_eq!(feature.geometry.unwrap().coordinates, vec![76.2, 10.1]);
    }

    #[test]
    fn decode_keeps_partial_features() {
        let feature = FeatureCodec::new().decode(r#"{"type":"Feature"}"#).unwrap();
        assert!(feature.geometry.is_none());
        assert!(feature.properties.is_none());
    }

    #[test_case("not json" ; "plain text")]
    #[test_case("[1, 2]" ; "array")]
    #[test_case("{\"geometry\": " ; "truncated object")]
    #[test_case("" ; "empty")]
    fn decode_rejects(frame: &str) {
        assert!(FeatureCodec::new().decode(frame).is_err());
    }

    #[test]
    fn encode_feature() {
        let codec = FeatureCodec::new();
        let feature = LocationFeature::point(UserId::new(1), "asha", Coordinates::new(10.0, 76.0));
        let text = codec.encode(&feature).unwrap();
        assert_eq!(codec.decode(&text).unwrap(), feature);
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let long = "é".repeat(80);
        assert_eq!(preview(&long).chars().count(), 50);
    }
}
