//! In-process store.
//!
//! Keeps everything behind a single async mutex, which also serialises
//! concurrent `resolve_or_create` calls for the same object.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use flux_common::{
    FileFailure, FluxError, FluxMeasurement, FluxResult, MeasurementId, NewFluxMeasurement,
    NewSpaceObject, NewUploadLog, ObjectFluxCount, ObjectId, SearchFilters, SpaceObject,
    UploadErrorMessage, UploadLog, UploadLogEntry, UploadLogId, UserId, SEARCH_LIMIT,
};

use crate::store::PhotometryStore;

#[derive(Default)]
struct Tables {
    objects: Vec<SpaceObject>,
    object_keys: HashMap<(String, String), ObjectId>,
    measurements: Vec<FluxMeasurement>,
    logs: Vec<UploadLog>,
    errors: Vec<UploadErrorMessage>,
}

impl Tables {
    fn object(&self, id: ObjectId) -> Option<&SpaceObject> {
        // Ids are assigned sequentially from 1.
        id.0
            .checked_sub(1)
            .and_then(|idx| usize::try_from(idx).ok())
            .and_then(|idx| self.objects.get(idx))
    }
}

/// Store holding all rows in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact number of stored objects.
    pub async fn object_count(&self) -> usize {
        self.tables.lock().await.objects.len()
    }

    /// Exact number of stored measurements.
    pub async fn measurement_count(&self) -> usize {
        self.tables.lock().await.measurements.len()
    }
}

#[async_trait]
impl PhotometryStore for MemoryStore {
    async fn resolve_or_create(&self, object: &NewSpaceObject) -> FluxResult<ObjectId> {
        let mut tables = self.tables.lock().await;

        let key = (object.catalog.clone(), object.catalog_id.clone());
        if let Some(id) = tables.object_keys.get(&key) {
            return Ok(*id);
        }

        let id = ObjectId(tables.objects.len() as i64 + 1);
        tables
            .objects
            .push(SpaceObject::from_new(id, object.clone()));
        tables.object_keys.insert(key, id);
        Ok(id)
    }

    async fn search(&self, filters: &SearchFilters) -> FluxResult<Vec<ObjectFluxCount>> {
        let tables = self.tables.lock().await;
        let predicates = filters.predicates();

        let mut counts: HashMap<ObjectId, u64> = HashMap::new();
        for m in &tables.measurements {
            *counts.entry(m.object_id).or_default() += 1;
        }

        Ok(tables
            .objects
            .iter()
            .filter(|o| predicates.iter().all(|p| p.matches(o)))
            .take(SEARCH_LIMIT)
            .map(|o| ObjectFluxCount {
                object: o.clone(),
                flux_count: counts.get(&o.id).copied().unwrap_or(0),
            })
            .collect())
    }

    async fn catalog_names(&self) -> FluxResult<BTreeSet<String>> {
        let tables = self.tables.lock().await;
        Ok(tables.objects.iter().map(|o| o.catalog.clone()).collect())
    }

    async fn estimate_object_count(&self) -> FluxResult<u64> {
        Ok(self.tables.lock().await.objects.len() as u64)
    }

    async fn get_object(&self, id: ObjectId) -> FluxResult<Option<SpaceObject>> {
        Ok(self.tables.lock().await.object(id).cloned())
    }

    async fn insert_measurements(&self, measurements: &[NewFluxMeasurement]) -> FluxResult<usize> {
        let mut tables = self.tables.lock().await;

        // Check every row first so a bad row stores nothing.
        if let Some(missing) = measurements
            .iter()
            .find(|m| tables.object(m.object_id).is_none())
        {
            return Err(FluxError::ObjectNotFound(missing.object_id.0));
        }

        for m in measurements {
            let id = MeasurementId(tables.measurements.len() as i64 + 1);
            tables
                .measurements
                .push(FluxMeasurement::from_new(id, m.clone()));
        }
        Ok(measurements.len())
    }

    async fn measurements_for_object(&self, id: ObjectId) -> FluxResult<Vec<FluxMeasurement>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<FluxMeasurement> = tables
            .measurements
            .iter()
            .filter(|m| m.object_id == id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| (m.exposure_begin, m.id.0));
        Ok(rows)
    }

    async fn record_upload(
        &self,
        log: &NewUploadLog,
        failures: &[FileFailure],
    ) -> FluxResult<UploadLogId> {
        let mut tables = self.tables.lock().await;

        let log_id = UploadLogId(tables.logs.len() as i64 + 1);
        tables.logs.push(UploadLog {
            id: log_id,
            user_id: log.user_id.clone(),
            uploaded_at: log.uploaded_at,
            file_count: log.file_count,
            failed_count: log.failed_count,
        });

        for failure in failures {
            let id = tables.errors.len() as i64 + 1;
            tables.errors.push(UploadErrorMessage {
                id,
                upload_log_id: log_id,
                file_name: failure.file_name.clone(),
                message: failure.message.clone(),
            });
        }

        Ok(log_id)
    }

    async fn upload_logs_for_user(&self, user: &UserId) -> FluxResult<Vec<UploadLogEntry>> {
        let tables = self.tables.lock().await;

        let mut entries: Vec<UploadLogEntry> = tables
            .logs
            .iter()
            .filter(|l| l.user_id == *user)
            .map(|l| UploadLogEntry {
                log: l.clone(),
                errors: tables
                    .errors
                    .iter()
                    .filter(|e| e.upload_log_id == l.id)
                    .cloned()
                    .collect(),
            })
            .collect();

        entries.sort_by(|a, b| {
            b.log
                .uploaded_at
                .cmp(&a.log.uploaded_at)
                .then(b.log.id.0.cmp(&a.log.id.0))
        });
        Ok(entries)
    }
}
