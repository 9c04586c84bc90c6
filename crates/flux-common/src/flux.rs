//! Flux measurement types.
//!
//! A raw flux reading of exactly zero means the sensor saturated. That case is
//! carried as [`FluxValue::Saturated`] from the moment a file is parsed, so it
//! can never be mistaken for a real zero-flux reading further downstream.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::space_object::ObjectId;

/// Text used wherever a saturated reading is surfaced.
pub const SATURATED: &str = "saturated";

/// Opaque identity of the authenticated user, supplied by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned measurement identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementId(pub i64);

/// A single aperture flux reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FluxValue {
    /// The sensor saturated; the raw reading was exactly zero.
    Saturated,
    /// A real flux reading.
    Value(f64),
}

impl FluxValue {
    /// Classify a raw reading taken from an input file.
    pub fn from_raw(raw: f64) -> Self {
        if raw == 0.0 {
            FluxValue::Saturated
        } else {
            FluxValue::Value(raw)
        }
    }

    /// Rebuild a value from its stored form, where `None` marks saturation.
    pub fn from_stored(stored: Option<f64>) -> Self {
        match stored {
            Some(v) => FluxValue::Value(v),
            None => FluxValue::Saturated,
        }
    }

    /// Stored form of this value; saturation is `None`.
    pub fn to_stored(self) -> Option<f64> {
        self.value()
    }

    pub fn is_saturated(&self) -> bool {
        matches!(self, FluxValue::Saturated)
    }

    /// The numeric reading, if the sensor did not saturate.
    pub fn value(&self) -> Option<f64> {
        match self {
            FluxValue::Saturated => None,
            FluxValue::Value(v) => Some(*v),
        }
    }
}

impl fmt::Display for FluxValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FluxValue::Saturated => f.write_str(SATURATED),
            FluxValue::Value(v) => write!(f, "{}", v),
        }
    }
}

impl Serialize for FluxValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FluxValue::Saturated => serializer.serialize_str(SATURATED),
            FluxValue::Value(v) => serializer.serialize_f64(*v),
        }
    }
}

impl<'de> Deserialize<'de> for FluxValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(FluxValue::from_raw(v)),
            Repr::Text(s) if s == SATURATED => Ok(FluxValue::Saturated),
            Repr::Text(s) => Err(serde::de::Error::custom(format!(
                "expected a number or \"{}\", got \"{}\"",
                SATURATED, s
            ))),
        }
    }
}

/// A measurement ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFluxMeasurement {
    pub object_id: ObjectId,
    pub user_id: UserId,
    pub exposure_begin: DateTime<Utc>,
    pub exposure_end: DateTime<Utc>,
    pub ap_auto: FluxValue,
    pub apertures: Vec<FluxValue>,
    pub ref_ap_auto: FluxValue,
    pub ref_apertures: Vec<FluxValue>,
}

/// A persisted photometric reading for one object and one exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxMeasurement {
    pub id: MeasurementId,
    pub object_id: ObjectId,
    pub user_id: UserId,
    pub exposure_begin: DateTime<Utc>,
    pub exposure_end: DateTime<Utc>,
    pub ap_auto: FluxValue,
    pub apertures: Vec<FluxValue>,
    pub ref_ap_auto: FluxValue,
    pub ref_apertures: Vec<FluxValue>,
}

impl FluxMeasurement {
    pub fn from_new(id: MeasurementId, new: NewFluxMeasurement) -> Self {
        Self {
            id,
            object_id: new.object_id,
            user_id: new.user_id,
            exposure_begin: new.exposure_begin,
            exposure_end: new.exposure_end,
            ap_auto: new.ap_auto,
            apertures: new.apertures,
            ref_ap_auto: new.ref_ap_auto,
            ref_apertures: new.ref_apertures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_saturated() {
        assert_eq!(FluxValue::from_raw(0.0), FluxValue::Saturated);
        assert_eq!(FluxValue::from_raw(-0.0), FluxValue::Saturated);
        assert_eq!(FluxValue::from_raw(1e-12), FluxValue::Value(1e-12));
        assert_eq!(FluxValue::from_raw(-3.5), FluxValue::Value(-3.5));
    }

    #[test]
    fn test_stored_form() {
        assert_eq!(FluxValue::Saturated.to_stored(), None);
        assert_eq!(FluxValue::from_stored(None), FluxValue::Saturated);
        assert_eq!(FluxValue::from_stored(Some(12.5)), FluxValue::Value(12.5));
    }

    #[test]
    fn test_display() {
        assert_eq!(FluxValue::Saturated.to_string(), "saturated");
        assert_eq!(FluxValue::Value(1520.25).to_string(), "1520.25");
    }

    #[test]
    fn test_serialization() {
        let values = vec![FluxValue::Value(2.5), FluxValue::Saturated];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[2.5,"saturated"]"#);

        let back: Vec<FluxValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_deserialize_rejects_unknown_text() {
        let result: Result<FluxValue, _> = serde_json::from_str(r#""bright""#);
        assert!(result.is_err());
    }
}
