//! Catalogued space objects.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sky::SkyPosition;

/// Store-assigned space object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub i64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A catalogued astronomical object.
///
/// The `(catalog, catalog_id)` pair is unique across the store. Objects are
/// created on first reference and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceObject {
    pub id: ObjectId,
    pub name: String,
    pub catalog: String,
    pub catalog_id: String,
    /// Right ascension as written in the source file.
    pub ra_text: String,
    /// Declination as written in the source file.
    pub dec_text: String,
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub magnitude: f64,
}

impl SpaceObject {
    pub fn from_new(id: ObjectId, new: NewSpaceObject) -> Self {
        Self {
            id,
            name: new.name,
            catalog: new.catalog,
            catalog_id: new.catalog_id,
            ra_text: new.ra_text,
            dec_text: new.dec_text,
            ra_deg: new.ra_deg,
            dec_deg: new.dec_deg,
            magnitude: new.magnitude,
        }
    }

    pub fn position(&self) -> SkyPosition {
        SkyPosition::new(self.ra_deg, self.dec_deg)
    }
}

/// Attributes of an object to resolve or create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSpaceObject {
    pub catalog_id: String,
    pub name: String,
    pub catalog: String,
    pub dec_text: String,
    pub ra_text: String,
    pub dec_deg: f64,
    pub ra_deg: f64,
    pub magnitude: f64,
}

impl NewSpaceObject {
    /// The uniqueness key of the object.
    pub fn key(&self) -> (&str, &str) {
        (&self.catalog, &self.catalog_id)
    }
}

/// A search result: one object with the number of measurements recorded for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectFluxCount {
    #[serde(flatten)]
    pub object: SpaceObject,
    pub flux_count: u64,
}
