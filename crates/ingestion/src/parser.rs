//! Photometry file parser.
//!
//! Input files are CSV with a header row. Lines starting with `#` are
//! comments. The columns are, in order:
//!
//! ```text
//! catalog_id, name, catalog, ra, dec, ra_deg, dec_deg, magnitude,
//! exposure_begin, exposure_end,
//! ap_auto, ap_1 .. ap_n, ref_ap_auto, ref_ap_1 .. ref_ap_n
//! ```
//!
//! The header fixes the number of apertures, which must be the same for the
//! target and the reference star. Any malformed record fails the whole file.

use chrono::{DateTime, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};

use flux_common::{FluxValue, NewFluxMeasurement, NewSpaceObject, ObjectId, SkyPosition, UserId};

use crate::error::{IngestionError, Result};

/// Leading columns every file starts with.
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

const AP_AUTO: &str = "ap_auto";
const REF_AP_AUTO: &str = "ref_ap_auto";

/// Naive timestamp layouts, read as UTC.
const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// One measurement row as read from a file, before its object is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// 1-based line number in the source file.
    pub line: u64,
    pub object: NewSpaceObject,
    pub exposure_begin: DateTime<Utc>,
    pub exposure_end: DateTime<Utc>,
    pub ap_auto: FluxValue,
    pub apertures: Vec<FluxValue>,
    pub ref_ap_auto: FluxValue,
    pub ref_apertures: Vec<FluxValue>,
}

impl ParsedRow {
    /// Attach the resolved object and the uploading user.
    pub fn into_measurement(self, object_id: ObjectId, user_id: UserId) -> NewFluxMeasurement {
        NewFluxMeasurement {
            object_id,
            user_id,
            exposure_begin: self.exposure_begin,
            exposure_end: self.exposure_end,
            ap_auto: self.ap_auto,
            apertures: self.apertures,
            ref_ap_auto: self.ref_ap_auto,
            ref_apertures: self.ref_apertures,
        }
    }
}

/// Column layout derived from the header row.
struct Layout {
    columns: Vec<String>,
    apertures: usize,
}

impl Layout {
    fn from_header(header: &StringRecord, line: u64) -> Result<Self> {
        let columns: Vec<String> = header.iter().map(|c| c.to_ascii_lowercase()).collect();

        if columns.len() < FIXED_COLUMNS.len() + 2 {
            return Err(IngestionError::content(
                line,
                format!(
                    "header has {} columns, expected at least {}",
                    columns.len(),
                    FIXED_COLUMNS.len() + 2
                ),
            ));
        }

        for (i, expected) in FIXED_COLUMNS.iter().enumerate() {
            if columns[i] != *expected {
                return Err(IngestionError::content(
                    line,
                    format!("column {} should be '{}', found '{}'", i + 1, expected, columns[i]),
                ));
            }
        }

        let flux = &columns[FIXED_COLUMNS.len()..];
        if flux[0] != AP_AUTO {
            return Err(IngestionError::content(
                line,
                format!("expected '{}' after the fixed columns, found '{}'", AP_AUTO, flux[0]),
            ));
        }

        let ref_at = flux.iter().position(|c| c == REF_AP_AUTO).ok_or_else(|| {
            IngestionError::content(line, format!("missing '{}' column", REF_AP_AUTO))
        })?;

        let target = &flux[1..ref_at];
        let reference = &flux[ref_at + 1..];

        if let Some(bad) = target.iter().find(|c| !is_numbered(c, "ap_")) {
            return Err(IngestionError::content(line, format!("unexpected aperture column '{}'", bad)));
        }
        if let Some(bad) = reference.iter().find(|c| !is_numbered(c, "ref_ap_")) {
            return Err(IngestionError::content(
                line,
                format!("unexpected reference aperture column '{}'", bad),
            ));
        }
        if target.len() != reference.len() {
            return Err(IngestionError::content(
                line,
                format!(
                    "{} apertures for the target but {} for the reference star",
                    target.len(),
                    reference.len()
                ),
            ));
        }

        Ok(Self {
            apertures: target.len(),
            columns,
        })
    }

    fn width(&self) -> usize {
        self.columns.len()
    }

    fn ap_auto_index(&self) -> usize {
        FIXED_COLUMNS.len()
    }

    fn ref_ap_auto_index(&self) -> usize {
        self.ap_auto_index() + 1 + self.apertures
    }
}

/// Whether `column` is `prefix` followed by an aperture number.
fn is_numbered(column: &str, prefix: &str) -> bool {
    column
        .strip_prefix(prefix)
        .map_or(false, |n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Parse the contents of one uploaded file.
pub fn parse_bytes(content: &[u8]) -> Result<Vec<ParsedRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_reader(content);

    let header = reader.headers().map_err(csv_error)?.clone();
    let header_line = header.position().map(|p| p.line()).unwrap_or(1);
    if header.is_empty() {
        return Err(IngestionError::content(header_line, "missing header row"));
    }
    let layout = Layout::from_header(&header, header_line)?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(csv_error)?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        rows.push(parse_record(&record, &layout, line)?);
    }

    Ok(rows)
}

fn parse_record(record: &StringRecord, layout: &Layout, line: u64) -> Result<ParsedRow> {
    if record.len() != layout.width() {
        return Err(IngestionError::content(
            line,
            format!("expected {} columns, found {}", layout.width(), record.len()),
        ));
    }

    let catalog_id = required_text(record, layout, 0, line)?;
    let catalog = required_text(record, layout, 2, line)?;
    let name = match &record[1] {
        "" => catalog_id.clone(),
        name => name.to_string(),
    };

    let ra_deg = number(record, layout, 5, line)?;
    let dec_deg = number(record, layout, 6, line)?;
    if !SkyPosition::new(ra_deg, dec_deg).is_valid() {
        return Err(IngestionError::content(
            line,
            format!("declination {} is outside -90..90", dec_deg),
        ));
    }
    let magnitude = number(record, layout, 7, line)?;

    let exposure_begin = timestamp(record, layout, 8, line)?;
    let exposure_end = timestamp(record, layout, 9, line)?;
    if exposure_end < exposure_begin {
        return Err(IngestionError::content(line, "exposure ends before it begins"));
    }

    let ap_at = layout.ap_auto_index();
    let ref_at = layout.ref_ap_auto_index();

    let ap_auto = flux(record, layout, ap_at, line)?;
    let apertures = (ap_at + 1..ref_at)
        .map(|i| flux(record, layout, i, line))
        .collect::<Result<Vec<_>>>()?;
    let ref_ap_auto = flux(record, layout, ref_at, line)?;
    let ref_apertures = (ref_at + 1..layout.width())
        .map(|i| flux(record, layout, i, line))
        .collect::<Result<Vec<_>>>()?;

    Ok(ParsedRow {
        line,
        object: NewSpaceObject {
            catalog_id,
            name,
            catalog,
            dec_text: record[4].to_string(),
            ra_text: record[3].to_string(),
            dec_deg,
            ra_deg,
            magnitude,
        },
        exposure_begin,
        exposure_end,
        ap_auto,
        apertures,
        ref_ap_auto,
        ref_apertures,
    })
}

fn required_text(record: &StringRecord, layout: &Layout, i: usize, line: u64) -> Result<String> {
    match &record[i] {
        "" => Err(IngestionError::content(
            line,
            format!("'{}' must not be empty", layout.columns[i]),
        )),
        value => Ok(value.to_string()),
    }
}

fn number(record: &StringRecord, layout: &Layout, i: usize, line: u64) -> Result<f64> {
    let raw = &record[i];
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            IngestionError::content(
                line,
                format!("'{}' is not a number: '{}'", layout.columns[i], raw),
            )
        })
}

fn flux(record: &StringRecord, layout: &Layout, i: usize, line: u64) -> Result<FluxValue> {
    number(record, layout, i, line).map(FluxValue::from_raw)
}

fn timestamp(record: &StringRecord, layout: &Layout, i: usize, line: u64) -> Result<DateTime<Utc>> {
    let raw = &record[i];
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            IngestionError::content(
                line,
                format!("'{}' is not a valid timestamp: '{}'", layout.columns[i], raw),
            )
        })
}

fn csv_error(e: csv::Error) -> IngestionError {
    let line = e.position().map(|p| p.line()).unwrap_or(0);
    IngestionError::content(line, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_utils::{flux_csv, flux_csv_header, sample_flux_csv, FluxRowSpec};

    fn content_line(err: IngestionError) -> u64 {
        match err {
            IngestionError::Content { line, .. } => line,
            other => panic!("expected a content error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_valid_file() {
        let rows = parse_bytes(sample_flux_csv(&["426-000001", "426-000002"]).as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);

        let row = &rows[0];
        assert_eq!(row.line, 2);
        assert_eq!(row.object.catalog_id, "426-000001");
        assert_eq!(row.object.catalog, "UCAC4");
        assert_eq!(row.object.ra_text, "83.8221");
        assert_eq!(row.object.dec_deg, -5.3911);
        assert_eq!(
            row.exposure_begin,
            Utc.with_ymd_and_hms(2021, 3, 14, 20, 15, 0).unwrap()
        );
        assert_eq!(row.ap_auto, FluxValue::Value(15234.5));
        assert_eq!(row.apertures.len(), 3);
        assert_eq!(row.ref_apertures.len(), 3);
        assert_eq!(row.ref_apertures[2], FluxValue::Value(19854.0));
    }

    #[test]
    fn test_zero_flux_is_saturated_everywhere() {
        let row = FluxRowSpec::sample("1")
            .with_ap_auto("0")
            .with_apertures(&["0.0", "5.5", "0e0"])
            .with_ref_ap_auto("0.000")
            .with_ref_apertures(&["1.0", "-0.0", "2.0"]);
        let rows = parse_bytes(flux_csv(&[row]).as_bytes()).unwrap();
        let row = &rows[0];

        assert!(row.ap_auto.is_saturated());
        assert!(row.apertures[0].is_saturated());
        assert_eq!(row.apertures[1], FluxValue::Value(5.5));
        assert!(row.apertures[2].is_saturated());
        assert!(row.ref_ap_auto.is_saturated());
        assert!(row.ref_apertures[1].is_saturated());
    }

    #[test]
    fn test_non_numeric_flux_fails_file() {
        let rows = vec![
            FluxRowSpec::sample("1"),
            FluxRowSpec::sample("2").with_apertures(&["12.0", "n/a", "3.0"]),
        ];
        let err = parse_bytes(flux_csv(&rows).as_bytes()).unwrap_err();
        assert_eq!(content_line(err), 3);
    }

    #[test]
    fn test_one_bad_row_discards_whole_file() {
        // A bad row is not skipped: nothing from the file is returned.
        let rows = vec![
            FluxRowSpec::sample("1"),
            FluxRowSpec::sample("2"),
            FluxRowSpec::sample("3").with_ap_auto("bright"),
        ];
        assert!(parse_bytes(flux_csv(&rows).as_bytes()).is_err());
    }

    #[test]
    fn test_wrong_column_count() {
        let mut csv = sample_flux_csv(&["1"]);
        csv.push_str("2,Star,UCAC4,1,1,1.0,1.0,9.0\n");
        let err = parse_bytes(csv.as_bytes()).unwrap_err();
        assert_eq!(content_line(err), 3);
    }

    #[test]
    fn test_aperture_arity_mismatch() {
        let row = FluxRowSpec::sample("1").with_ref_apertures(&["1.0", "2.0"]);
        let csv = flux_csv(&[row]);
        assert!(csv.starts_with(&flux_csv_header(3, 2)));
        let err = parse_bytes(csv.as_bytes()).unwrap_err();
        assert_eq!(content_line(err), 1);
    }

    #[test]
    fn test_header_must_match_layout() {
        let csv = "id,name,catalog,ra,dec,ra_deg,dec_deg,magnitude,exposure_begin,exposure_end,ap_auto,ref_ap_auto\n";
        assert!(parse_bytes(csv.as_bytes()).is_err());

        let csv = "catalog_id,name,catalog,ra,dec,ra_deg,dec_deg,magnitude,exposure_begin,exposure_end,ap_auto,ap_1\n";
        assert!(parse_bytes(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_aperture_columns_must_be_numbered() {
        let fixed = FIXED_COLUMNS.join(",");
        let csv = format!("{},ap_auto,ap_auto,ref_ap_auto,ref_ap_1\n", fixed);
        let err = parse_bytes(csv.as_bytes()).unwrap_err();
        assert_eq!(content_line(err), 1);

        let csv = format!("{},ap_auto,ap_1,ref_ap_auto,ref_ap_x\n", fixed);
        assert!(parse_bytes(csv.as_bytes()).is_err());

        let csv = format!("{},ap_auto,ap_1,ref_ap_auto,ref_ap_1\n", fixed);
        assert!(parse_bytes(csv.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_timestamp() {
        let row = FluxRowSpec::sample("1").with_exposure("14/03/2021 20:15", "2021-03-14T20:16:00Z");
        let err = parse_bytes(flux_csv(&[row]).as_bytes()).unwrap_err();
        assert_eq!(content_line(err), 2);
    }

    #[test]
    fn test_exposure_end_before_begin() {
        let row = FluxRowSpec::sample("1").with_exposure("2021-03-14T20:16:00Z", "2021-03-14T20:15:00Z");
        assert!(parse_bytes(flux_csv(&[row]).as_bytes()).is_err());
    }

    #[test]
    fn test_naive_timestamps_are_utc() {
        let row = FluxRowSpec::sample("1").with_exposure("2021-03-14 20:15:00.5", "2021-03-14T20:16:00");
        let rows = parse_bytes(flux_csv(&[row]).as_bytes()).unwrap();
        assert_eq!(
            rows[0].exposure_end,
            Utc.with_ymd_and_hms(2021, 3, 14, 20, 16, 0).unwrap()
        );
        assert!(rows[0].exposure_begin > Utc.with_ymd_and_hms(2021, 3, 14, 20, 15, 0).unwrap());
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let csv = format!("# exported by the reduction pipeline\n{}\n# trailing note\n", sample_flux_csv(&["1", "2"]));
        let rows = parse_bytes(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_header_only_file_has_no_rows() {
        let csv = flux_csv(&[]);
        assert!(parse_bytes(csv.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_empty_file_is_rejected() {
        assert!(parse_bytes(b"").is_err());
    }

    #[test]
    fn test_not_a_number_values_rejected() {
        let row = FluxRowSpec::sample("1").with_ap_auto("NaN");
        assert!(parse_bytes(flux_csv(&[row]).as_bytes()).is_err());
    }

    #[test]
    fn test_declination_out_of_range() {
        let row = FluxRowSpec::sample("1").with_position(10.0, 95.0);
        assert!(parse_bytes(flux_csv(&[row]).as_bytes()).is_err());
    }

    #[test]
    fn test_into_measurement() {
        let row = parse_bytes(sample_flux_csv(&["1"]).as_bytes()).unwrap().remove(0);
        let m = row.into_measurement(ObjectId(4), UserId::new("observer"));
        assert_eq!(m.object_id, ObjectId(4));
        assert_eq!(m.user_id.as_str(), "observer");
        assert_eq!(m.apertures.len(), 3);
    }
}
