//! Common test fixtures for photometry tests.

use flux_common::NewSpaceObject;

/// Fixed leading columns of the ingest CSV format.
pub const FIXED_COLUMNS: [&str; 10] = [
    "catalog_id",
    "name",
    "catalog",
    "ra",
    "dec",
    "ra_deg",
    "dec_deg",
    "magnitude",
    "exposure_begin",
    "exposure_end",
];

/// One data row of an ingest file.
#[derive(Debug, Clone)]
pub struct FluxRowSpec {
    pub catalog_id: String,
    pub name: String,
    pub catalog: String,
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub magnitude: f64,
    pub exposure_begin: String,
    pub exposure_end: String,
    pub ap_auto: String,
    pub apertures: Vec<String>,
    pub ref_ap_auto: String,
    pub ref_apertures: Vec<String>,
}

impl FluxRowSpec {
    /// A valid row with three apertures for the given UCAC4 identifier.
    pub fn sample(catalog_id: &str) -> Self {
        Self {
            catalog_id: catalog_id.to_string(),
            name: format!("Star {}", catalog_id),
            catalog: "UCAC4".to_string(),
            ra_deg: 83.8221,
            dec_deg: -5.3911,
            magnitude: 11.4,
            exposure_begin: "2021-03-14T20:15:00Z".to_string(),
            exposure_end: "2021-03-14T20:16:30Z".to_string(),
            ap_auto: "15234.5".to_string(),
            apertures: vec!["9021.25".into(), "12011.0".into(), "14870.75".into()],
            ref_ap_auto: "20110.0".to_string(),
            ref_apertures: vec!["11002.5".into(), "16410.0".into(), "19854.0".into()],
        }
    }

    pub fn with_ap_auto(mut self, value: &str) -> Self {
        self.ap_auto = value.to_string();
        self
    }

    pub fn with_apertures(mut self, values: &[&str]) -> Self {
        self.apertures = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_ref_ap_auto(mut self, value: &str) -> Self {
        self.ref_ap_auto = value.to_string();
        self
    }

    pub fn with_ref_apertures(mut self, values: &[&str]) -> Self {
        self.ref_apertures = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_exposure(mut self, begin: &str, end: &str) -> Self {
        self.exposure_begin = begin.to_string();
        self.exposure_end = end.to_string();
        self
    }

    pub fn with_position(mut self, ra_deg: f64, dec_deg: f64) -> Self {
        self.ra_deg = ra_deg;
        self.dec_deg = dec_deg;
        self
    }

    fn to_csv_line(&self) -> String {
        let mut fields = vec![
            self.catalog_id.clone(),
            self.name.clone(),
            self.catalog.clone(),
            format!("{:.4}", self.ra_deg),
            format!("{:.4}", self.dec_deg),
            self.ra_deg.to_string(),
            self.dec_deg.to_string(),
            self.magnitude.to_string(),
            self.exposure_begin.clone(),
            self.exposure_end.clone(),
            self.ap_auto.clone(),
        ];
        fields.extend(self.apertures.iter().cloned());
        fields.push(self.ref_ap_auto.clone());
        fields.extend(self.ref_apertures.iter().cloned());
        fields.join(",")
    }
}

/// Header line for the given aperture counts.
pub fn flux_csv_header(apertures: usize, ref_apertures: usize) -> String {
    let mut columns: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
    columns.push("ap_auto".to_string());
    columns.extend((1..=apertures).map(|i| format!("ap_{}", i)));
    columns.push("ref_ap_auto".to_string());
    columns.extend((1..=ref_apertures).map(|i| format!("ref_ap_{}", i)));
    columns.join(",")
}

/// A complete ingest file. The header arity follows the first row, or three
/// apertures when there are no rows.
pub fn flux_csv(rows: &[FluxRowSpec]) -> String {
    let (apertures, ref_apertures) = rows
        .first()
        .map(|r| (r.apertures.len(), r.ref_apertures.len()))
        .unwrap_or((3, 3));

    let mut out = flux_csv_header(apertures, ref_apertures);
    out.push('\n');
    for row in rows {
        out.push_str(&row.to_csv_line());
        out.push('\n');
    }
    out
}

/// A valid ingest file with one row per identifier.
pub fn sample_flux_csv(catalog_ids: &[&str]) -> String {
    let rows: Vec<FluxRowSpec> = catalog_ids.iter().map(|id| FluxRowSpec::sample(id)).collect();
    flux_csv(&rows)
}

/// Object attributes for store tests.
pub fn new_space_object(catalog: &str, catalog_id: &str, ra_deg: f64, dec_deg: f64, magnitude: f64) -> NewSpaceObject {
    NewSpaceObject {
        catalog_id: catalog_id.to_string(),
        name: format!("{} {}", catalog, catalog_id),
        catalog: catalog.to_string(),
        dec_text: format!("{:.4}", dec_deg),
        ra_text: format!("{:.4}", ra_deg),
        dec_deg,
        ra_deg,
        magnitude,
    }
}
