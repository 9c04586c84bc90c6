//! Equatorial sky coordinates.

use serde::{Deserialize, Serialize};

/// A position on the celestial sphere, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    /// Right ascension in degrees.
    pub ra_deg: f64,
    /// Declination in degrees, -90 to 90.
    pub dec_deg: f64,
}

impl SkyPosition {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self { ra_deg, dec_deg }
    }

    /// Whether both coordinates are finite and the declination is in range.
    pub fn is_valid(&self) -> bool {
        self.ra_deg.is_finite() && self.dec_deg.is_finite() && self.dec_deg.abs() <= 90.0
    }

    /// Great-circle separation to another position, in degrees.
    ///
    /// Uses the haversine form, which stays accurate for small separations.
    pub fn separation_deg(&self, other: &SkyPosition) -> f64 {
        let (ra1, dec1) = (self.ra_deg.to_radians(), self.dec_deg.to_radians());
        let (ra2, dec2) = (other.ra_deg.to_radians(), other.dec_deg.to_radians());

        let sin_ddec = ((dec2 - dec1) / 2.0).sin();
        let sin_dra = ((ra2 - ra1) / 2.0).sin();
        let h = sin_ddec * sin_ddec + dec1.cos() * dec2.cos() * sin_dra * sin_dra;

        (2.0 * h.sqrt().min(1.0).asin()).to_degrees()
    }
}
