//! Catalog search filters.
//!
//! Every filter field has an "empty" value meaning "do not filter on this".
//! [`SearchFilters::predicates`] turns the fields that are set into a list of
//! [`Predicate`]s which the stores combine with logical AND.

use serde::{Deserialize, Serialize};

use crate::error::{FluxError, FluxResult};
use crate::sky::SkyPosition;
use crate::space_object::SpaceObject;

/// Maximum number of rows a catalog search returns.
pub const SEARCH_LIMIT: usize = 100;

/// Catalog filter value meaning "any catalog".
pub const ALL_CATALOGUES: &str = "All catalogues";

/// Lower bound of the magnitude range that applies no filtering.
pub const DEFAULT_MIN_MAGNITUDE: f64 = 0.0;

/// Upper bound of the magnitude range that applies no filtering.
pub const DEFAULT_MAX_MAGNITUDE: f64 = 15.0;

/// Spatial filter: a cone around a sky position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ConeFilter {
    #[default]
    Unbounded,
    Within {
        center: SkyPosition,
        radius_deg: f64,
    },
}

/// Inclusive magnitude range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagnitudeRange {
    pub min: f64,
    pub max: f64,
}

impl MagnitudeRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether this is the range that applies no filtering.
    pub fn is_default(&self) -> bool {
        self.min == DEFAULT_MIN_MAGNITUDE && self.max == DEFAULT_MAX_MAGNITUDE
    }

    pub fn contains(&self, magnitude: f64) -> bool {
        magnitude >= self.min && magnitude <= self.max
    }
}

impl Default for MagnitudeRange {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_MAGNITUDE, DEFAULT_MAX_MAGNITUDE)
    }
}

/// Filters for a catalog search. The default value filters nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub cone: ConeFilter,
    /// Substring of the display name; empty for no filter.
    pub name: String,
    pub magnitude: MagnitudeRange,
    /// Exact catalog name; [`ALL_CATALOGUES`] for no filter.
    pub catalog: String,
    /// Substring of the catalog identifier; empty for no filter.
    pub catalog_id: String,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            cone: ConeFilter::Unbounded,
            name: String::new(),
            magnitude: MagnitudeRange::default(),
            catalog: ALL_CATALOGUES.to_string(),
            catalog_id: String::new(),
        }
    }
}

/// One applied search condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Cone { center: SkyPosition, radius_deg: f64 },
    NameContains(String),
    MagnitudeBetween(MagnitudeRange),
    CatalogIs(String),
    CatalogIdContains(String),
}

impl Predicate {
    /// Evaluate the predicate against an object.
    pub fn matches(&self, object: &SpaceObject) -> bool {
        match self {
            Predicate::Cone { center, radius_deg } => {
                center.separation_deg(&object.position()) <= *radius_deg
            }
            Predicate::NameContains(needle) => object.name.contains(needle.as_str()),
            Predicate::MagnitudeBetween(range) => range.contains(object.magnitude),
            Predicate::CatalogIs(catalog) => object.catalog == *catalog,
            Predicate::CatalogIdContains(needle) => object.catalog_id.contains(needle.as_str()),
        }
    }
}

impl SearchFilters {
    /// Predicates for every filter that differs from its empty value.
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut predicates = Vec::new();

        if let ConeFilter::Within { center, radius_deg } = self.cone {
            predicates.push(Predicate::Cone { center, radius_deg });
        }
        if !self.name.is_empty() {
            predicates.push(Predicate::NameContains(self.name.clone()));
        }
        if !self.magnitude.is_default() {
            predicates.push(Predicate::MagnitudeBetween(self.magnitude));
        }
        if self.catalog != ALL_CATALOGUES {
            predicates.push(Predicate::CatalogIs(self.catalog.clone()));
        }
        if !self.catalog_id.is_empty() {
            predicates.push(Predicate::CatalogIdContains(self.catalog_id.clone()));
        }

        predicates
    }

    /// Whether `object` passes every applied filter.
    pub fn matches(&self, object: &SpaceObject) -> bool {
        self.predicates().iter().all(|p| p.matches(object))
    }

    /// Build filters from the textual fields of a search form.
    ///
    /// Empty strings are the "no filter" values. The cone filter is applied
    /// only when `ra` is given, in which case `dec` and `radius` are required.
    #[allow(clippy::too_many_arguments)]
    pub fn from_form(
        ra: &str,
        dec: &str,
        radius: &str,
        name: &str,
        min_mag: &str,
        max_mag: &str,
        catalog: &str,
        catalog_id: &str,
    ) -> FluxResult<Self> {
        let cone = if ra.trim().is_empty() {
            ConeFilter::Unbounded
        } else {
            let center = SkyPosition::new(parse_number("ra", ra)?, parse_number("dec", dec)?);
            if !center.is_valid() {
                return Err(FluxError::invalid_param("dec", "declination must be within -90..90"));
            }
            let radius_deg = parse_number("radius", radius)?;
            if radius_deg < 0.0 {
                return Err(FluxError::invalid_param("radius", "radius must not be negative"));
            }
            ConeFilter::Within { center, radius_deg }
        };

        let min = if min_mag.trim().is_empty() {
            DEFAULT_MIN_MAGNITUDE
        } else {
            parse_number("min-mag", min_mag)?
        };
        let max = if max_mag.trim().is_empty() {
            DEFAULT_MAX_MAGNITUDE
        } else {
            parse_number("max-mag", max_mag)?
        };

        let catalog = if catalog.trim().is_empty() {
            ALL_CATALOGUES.to_string()
        } else {
            catalog.trim().to_string()
        };

        Ok(Self {
            cone,
            name: name.trim().to_string(),
            magnitude: MagnitudeRange::new(min, max),
            catalog,
            catalog_id: catalog_id.trim().to_string(),
        })
    }
}

fn parse_number(param: &str, value: &str) -> FluxResult<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FluxError::MissingParameter(param.to_string()));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FluxError::invalid_param(param, format!("'{}' is not a number", trimmed)))
}
