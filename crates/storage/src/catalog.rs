//! Object catalog and measurement store on PostgreSQL.
//!
//! Cone searches rely on the `cube` and `earthdistance` extensions. Sky
//! positions are stored as `ll_to_earth(dec, ra)`, treating the celestial
//! sphere as the earthdistance sphere, so angular radii convert to metres on
//! that sphere.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use flux_common::{
    FileFailure, FluxError, FluxMeasurement, FluxResult, FluxValue, MeasurementId,
    NewFluxMeasurement, NewSpaceObject, NewUploadLog, ObjectFluxCount, ObjectId, Predicate,
    SearchFilters, SpaceObject, UploadErrorMessage, UploadLog, UploadLogEntry, UploadLogId,
    UserId, SEARCH_LIMIT,
};

use crate::store::PhotometryStore;

/// Sphere radius used by `earthdistance`, in metres.
const EARTH_RADIUS_M: f64 = 6_378_168.0;

const OBJECT_COLUMNS: &str = "o.id, o.name, o.catalog, o.catalog_id, o.catalog_rec, \
     o.catalog_dec, o.ra_deg, o.dec_deg, o.catalog_mag";

const FLUX_COLUMNS: &str = "id, object_id, user_id, exposure_begin, exposure_end, \
     ap_auto, apertures, ref_ap_auto, ref_apertures";

/// Database connection pool and catalog operations.
pub struct Catalog {
    pool: PgPool,
}

impl Catalog {
    /// Create a new catalog connection from database URL.
    pub async fn connect(database_url: &str) -> FluxResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| FluxError::DatabaseError(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> FluxResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| FluxError::DatabaseError(format!("Migration failed: {}", e)))?;
            }
        }

        info!("Catalog schema is up to date");
        Ok(())
    }

    async fn find_object_id(&self, catalog: &str, catalog_id: &str) -> FluxResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM space_object WHERE catalog = $1 AND catalog_id = $2",
        )
        .bind(catalog)
        .bind(catalog_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)
    }
}

#[async_trait]
impl PhotometryStore for Catalog {
    async fn resolve_or_create(&self, object: &NewSpaceObject) -> FluxResult<ObjectId> {
        if let Some(id) = self.find_object_id(&object.catalog, &object.catalog_id).await? {
            return Ok(ObjectId(id));
        }

        // A concurrent ingest may insert the same object between the lookup
        // and here; the unique key turns that into an empty RETURNING.
        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO space_object \
             (name, catalog, catalog_id, catalog_rec, catalog_dec, ra_deg, dec_deg, coordinates, catalog_mag) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, ll_to_earth($7, $6), $8) \
             ON CONFLICT (catalog, catalog_id) DO NOTHING \
             RETURNING id",
        )
        .bind(&object.name)
        .bind(&object.catalog)
        .bind(&object.catalog_id)
        .bind(&object.ra_text)
        .bind(&object.dec_text)
        .bind(object.ra_deg)
        .bind(object.dec_deg)
        .bind(object.magnitude)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FluxError::DatabaseError(format!("Insert failed: {}", e)))?;

        if let Some(id) = inserted {
            debug!(id, catalog = %object.catalog, catalog_id = %object.catalog_id, "Created space object");
            return Ok(ObjectId(id));
        }

        self.find_object_id(&object.catalog, &object.catalog_id)
            .await?
            .map(ObjectId)
            .ok_or_else(|| {
                FluxError::DatabaseError(format!(
                    "Space object {}/{} vanished after insert conflict",
                    object.catalog, object.catalog_id
                ))
            })
    }

    async fn search(&self, filters: &SearchFilters) -> FluxResult<Vec<ObjectFluxCount>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT ");
        query.push(OBJECT_COLUMNS);
        query.push(
            ", COUNT(f.id) AS flux_count \
             FROM space_object o LEFT OUTER JOIN flux f ON f.object_id = o.id",
        );

        for (i, predicate) in filters.predicates().iter().enumerate() {
            query.push(if i == 0 { " WHERE " } else { " AND " });
            push_predicate(&mut query, predicate);
        }

        query.push(" GROUP BY o.id LIMIT ");
        query.push_bind(SEARCH_LIMIT as i64);

        let rows = query
            .build_query_as::<ObjectCountRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn catalog_names(&self) -> FluxResult<BTreeSet<String>> {
        let rows = sqlx::query_scalar::<_, String>("SELECT DISTINCT catalog FROM space_object")
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed)?;

        Ok(rows.into_iter().collect())
    }

    async fn estimate_object_count(&self) -> FluxResult<u64> {
        // reltuples is -1 until the table has been vacuumed or analysed.
        let estimate = sqlx::query_scalar::<_, i64>(
            "SELECT reltuples::BIGINT FROM pg_class WHERE relname = 'space_object'",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(estimate.unwrap_or(0).max(0) as u64)
    }

    async fn get_object(&self, id: ObjectId) -> FluxResult<Option<SpaceObject>> {
        let row = sqlx::query_as::<_, ObjectRow>(&format!(
            "SELECT {} FROM space_object o WHERE o.id = $1",
            OBJECT_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(row.map(|r| r.into()))
    }

    async fn insert_measurements(&self, measurements: &[NewFluxMeasurement]) -> FluxResult<usize> {
        let mut tx = self.pool.begin().await.map_err(query_failed)?;

        for m in measurements {
            sqlx::query(
                "INSERT INTO flux \
                 (object_id, user_id, exposure_begin, exposure_end, ap_auto, apertures, ref_ap_auto, ref_apertures) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(m.object_id.0)
            .bind(m.user_id.as_str())
            .bind(m.exposure_begin)
            .bind(m.exposure_end)
            .bind(m.ap_auto.to_stored())
            .bind(to_stored_array(&m.apertures))
            .bind(m.ref_ap_auto.to_stored())
            .bind(to_stored_array(&m.ref_apertures))
            .execute(&mut *tx)
            .await
            .map_err(|e| FluxError::DatabaseError(format!("Insert failed: {}", e)))?;
        }

        tx.commit().await.map_err(query_failed)?;
        Ok(measurements.len())
    }

    async fn measurements_for_object(&self, id: ObjectId) -> FluxResult<Vec<FluxMeasurement>> {
        let rows = sqlx::query_as::<_, FluxRow>(&format!(
            "SELECT {} FROM flux WHERE object_id = $1 ORDER BY exposure_begin, id",
            FLUX_COLUMNS
        ))
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn record_upload(
        &self,
        log: &NewUploadLog,
        failures: &[FileFailure],
    ) -> FluxResult<UploadLogId> {
        let mut tx = self.pool.begin().await.map_err(query_failed)?;

        let log_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO upload_log (user_id, uploaded_at, file_count, failed_count) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(log.user_id.as_str())
        .bind(log.uploaded_at)
        .bind(log.file_count as i32)
        .bind(log.failed_count as i32)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| FluxError::DatabaseError(format!("Insert failed: {}", e)))?;

        for failure in failures {
            sqlx::query(
                "INSERT INTO upload_error_message (upload_log_id, file_name, message) \
                 VALUES ($1, $2, $3)",
            )
            .bind(log_id)
            .bind(&failure.file_name)
            .bind(&failure.message)
            .execute(&mut *tx)
            .await
            .map_err(|e| FluxError::DatabaseError(format!("Insert failed: {}", e)))?;
        }

        tx.commit().await.map_err(query_failed)?;
        Ok(UploadLogId(log_id))
    }

    async fn upload_logs_for_user(&self, user: &UserId) -> FluxResult<Vec<UploadLogEntry>> {
        let logs = sqlx::query_as::<_, UploadLogRow>(
            "SELECT id, user_id, uploaded_at, file_count, failed_count FROM upload_log \
             WHERE user_id = $1 ORDER BY uploaded_at DESC, id DESC",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        let ids: Vec<i64> = logs.iter().map(|l| l.id).collect();
        let errors = sqlx::query_as::<_, UploadErrorRow>(
            "SELECT id, upload_log_id, file_name, message FROM upload_error_message \
             WHERE upload_log_id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        let mut errors_by_log: HashMap<i64, Vec<UploadErrorMessage>> = HashMap::new();
        for row in errors {
            errors_by_log
                .entry(row.upload_log_id)
                .or_default()
                .push(row.into());
        }

        Ok(logs
            .into_iter()
            .map(|row| {
                let errors = errors_by_log.remove(&row.id).unwrap_or_default();
                UploadLogEntry {
                    log: row.into(),
                    errors,
                }
            })
            .collect())
    }
}

fn query_failed(e: sqlx::Error) -> FluxError {
    FluxError::DatabaseError(format!("Query failed: {}", e))
}

/// Append one filter condition with bound parameters.
fn push_predicate(query: &mut QueryBuilder<'_, Postgres>, predicate: &Predicate) {
    match predicate {
        Predicate::Cone { center, radius_deg } => {
            let radius_m = radius_deg.to_radians() * EARTH_RADIUS_M;
            // earth_box is a cheap, index-backed superset; earth_distance trims its corners.
            query.push("earth_box(ll_to_earth(");
            query.push_bind(center.dec_deg);
            query.push(", ");
            query.push_bind(center.ra_deg);
            query.push("), ");
            query.push_bind(radius_m);
            query.push(") @> o.coordinates AND earth_distance(ll_to_earth(");
            query.push_bind(center.dec_deg);
            query.push(", ");
            query.push_bind(center.ra_deg);
            query.push("), o.coordinates) <= ");
            query.push_bind(radius_m);
        }
        Predicate::NameContains(needle) => {
            query.push("o.name LIKE ");
            query.push_bind(contains_pattern(needle));
        }
        Predicate::MagnitudeBetween(range) => {
            query.push("o.catalog_mag BETWEEN ");
            query.push_bind(range.min);
            query.push(" AND ");
            query.push_bind(range.max);
        }
        Predicate::CatalogIs(catalog) => {
            query.push("o.catalog = ");
            query.push_bind(catalog.clone());
        }
        Predicate::CatalogIdContains(needle) => {
            query.push("o.catalog_id LIKE ");
            query.push_bind(contains_pattern(needle));
        }
    }
}

/// LIKE pattern matching `needle` anywhere, with wildcards in it escaped.
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn to_stored_array(values: &[FluxValue]) -> Vec<Option<f64>> {
    values.iter().map(|v| v.to_stored()).collect()
}

fn from_stored_array(values: Vec<Option<f64>>) -> Vec<FluxValue> {
    values.into_iter().map(FluxValue::from_stored).collect()
}

#[derive(FromRow)]
struct ObjectRow {
    id: i64,
    name: String,
    catalog: String,
    catalog_id: String,
    catalog_rec: String,
    catalog_dec: String,
    ra_deg: f64,
    dec_deg: f64,
    catalog_mag: f64,
}

impl From<ObjectRow> for SpaceObject {
    fn from(row: ObjectRow) -> Self {
        SpaceObject {
            id: ObjectId(row.id),
            name: row.name,
            catalog: row.catalog,
            catalog_id: row.catalog_id,
            ra_text: row.catalog_rec,
            dec_text: row.catalog_dec,
            ra_deg: row.ra_deg,
            dec_deg: row.dec_deg,
            magnitude: row.catalog_mag,
        }
    }
}

#[derive(FromRow)]
struct ObjectCountRow {
    #[sqlx(flatten)]
    object: ObjectRow,
    flux_count: i64,
}

impl From<ObjectCountRow> for ObjectFluxCount {
    fn from(row: ObjectCountRow) -> Self {
        ObjectFluxCount {
            object: row.object.into(),
            flux_count: row.flux_count.max(0) as u64,
        }
    }
}

#[derive(FromRow)]
struct FluxRow {
    id: i64,
    object_id: i64,
    user_id: String,
    exposure_begin: DateTime<Utc>,
    exposure_end: DateTime<Utc>,
    ap_auto: Option<f64>,
    apertures: Vec<Option<f64>>,
    ref_ap_auto: Option<f64>,
    ref_apertures: Vec<Option<f64>>,
}

impl From<FluxRow> for FluxMeasurement {
    fn from(row: FluxRow) -> Self {
        FluxMeasurement {
            id: MeasurementId(row.id),
            object_id: ObjectId(row.object_id),
            user_id: UserId::new(row.user_id),
            exposure_begin: row.exposure_begin,
            exposure_end: row.exposure_end,
            ap_auto: FluxValue::from_stored(row.ap_auto),
            apertures: from_stored_array(row.apertures),
            ref_ap_auto: FluxValue::from_stored(row.ref_ap_auto),
            ref_apertures: from_stored_array(row.ref_apertures),
        }
    }
}

#[derive(FromRow)]
struct UploadLogRow {
    id: i64,
    user_id: String,
    uploaded_at: DateTime<Utc>,
    file_count: i32,
    failed_count: i32,
}

impl From<UploadLogRow> for UploadLog {
    fn from(row: UploadLogRow) -> Self {
        UploadLog {
            id: UploadLogId(row.id),
            user_id: UserId::new(row.user_id),
            uploaded_at: row.uploaded_at,
            file_count: row.file_count.max(0) as u32,
            failed_count: row.failed_count.max(0) as u32,
        }
    }
}

#[derive(FromRow)]
struct UploadErrorRow {
    id: i64,
    upload_log_id: i64,
    file_name: String,
    message: String,
}

impl From<UploadErrorRow> for UploadErrorMessage {
    fn from(row: UploadErrorRow) -> Self {
        UploadErrorMessage {
            id: row.id,
            upload_log_id: UploadLogId(row.upload_log_id),
            file_name: row.file_name,
            message: row.message,
        }
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS cube;
CREATE EXTENSION IF NOT EXISTS earthdistance;

CREATE TABLE IF NOT EXISTS space_object (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    catalog TEXT NOT NULL,
    catalog_id TEXT NOT NULL,
    catalog_rec TEXT NOT NULL,
    catalog_dec TEXT NOT NULL,
    ra_deg DOUBLE PRECISION NOT NULL,
    dec_deg DOUBLE PRECISION NOT NULL,
    coordinates EARTH NOT NULL,
    catalog_mag DOUBLE PRECISION NOT NULL,

    UNIQUE(catalog, catalog_id)
);

CREATE INDEX IF NOT EXISTS idx_space_object_coordinates ON space_object USING gist(coordinates);
CREATE INDEX IF NOT EXISTS idx_space_object_catalog ON space_object(catalog);

CREATE TABLE IF NOT EXISTS flux (
    id BIGSERIAL PRIMARY KEY,
    object_id BIGINT NOT NULL REFERENCES space_object(id),
    user_id TEXT NOT NULL,
    exposure_begin TIMESTAMPTZ NOT NULL,
    exposure_end TIMESTAMPTZ NOT NULL,
    ap_auto DOUBLE PRECISION,
    apertures DOUBLE PRECISION[] NOT NULL,
    ref_ap_auto DOUBLE PRECISION,
    ref_apertures DOUBLE PRECISION[] NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_flux_object ON flux(object_id);

CREATE TABLE IF NOT EXISTS upload_log (
    id BIGSERIAL PRIMARY KEY,
    user_id TEXT NOT NULL,
    uploaded_at TIMESTAMPTZ NOT NULL,
    file_count INTEGER NOT NULL,
    failed_count INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_upload_log_user ON upload_log(user_id, uploaded_at DESC);

CREATE TABLE IF NOT EXISTS upload_error_message (
    id BIGSERIAL PRIMARY KEY,
    upload_log_id BIGINT NOT NULL REFERENCES upload_log(id),
    file_name TEXT NOT NULL,
    message TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_upload_error_log ON upload_error_message(upload_log_id)
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use flux_common::{MagnitudeRange, SkyPosition};

    #[test]
    fn test_contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("NGC"), "%NGC%");
        assert_eq!(contains_pattern("10%_a\\b"), "%10\\%\\_a\\\\b%");
    }

    #[test]
    fn test_search_sql_without_filters() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM space_object o");
        for (i, predicate) in SearchFilters::default().predicates().iter().enumerate() {
            query.push(if i == 0 { " WHERE " } else { " AND " });
            push_predicate(&mut query, predicate);
        }
        assert_eq!(query.sql(), "SELECT 1 FROM space_object o");
    }

    #[test]
    fn test_predicate_sql_uses_binds() {
        let mut query = QueryBuilder::<Postgres>::new("");
        push_predicate(&mut query, &Predicate::NameContains("x'; DROP".into()));
        assert_eq!(query.sql(), "o.name LIKE $1");

        let mut query = QueryBuilder::<Postgres>::new("");
        push_predicate(&mut query, &Predicate::MagnitudeBetween(MagnitudeRange::new(1.0, 2.0)));
        assert_eq!(query.sql(), "o.catalog_mag BETWEEN $1 AND $2");

        let mut query = QueryBuilder::<Postgres>::new("");
        push_predicate(
            &mut query,
            &Predicate::Cone {
                center: SkyPosition::new(10.0, 20.0),
                radius_deg: 1.0,
            },
        );
        assert!(query.sql().starts_with("earth_box(ll_to_earth($1, $2), $3) @> o.coordinates"));
        assert!(query.sql().ends_with("o.coordinates) <= $6"));
    }

    #[test]
    fn test_schema_statements_split_cleanly() {
        let statements: Vec<&str> = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(statements.len(), 11);
        assert!(statements[0].starts_with("CREATE EXTENSION"));
    }
}
