//! The store abstraction shared by every backend.

use std::collections::BTreeSet;

use async_trait::async_trait;

use flux_common::{
    FileFailure, FluxMeasurement, FluxResult, NewFluxMeasurement, NewSpaceObject, NewUploadLog,
    ObjectFluxCount, ObjectId, SearchFilters, SpaceObject, UploadLogEntry, UploadLogId, UserId,
};

/// Persistence operations for objects, measurements and upload audit logs.
#[async_trait]
pub trait PhotometryStore: Send + Sync {
    /// Return the id of the object with the same `(catalog, catalog_id)`,
    /// creating it from `object` if it does not exist yet.
    ///
    /// The first write wins: attributes of an existing object are never
    /// updated. Concurrent calls with the same key create at most one object
    /// and all return the same id.
    async fn resolve_or_create(&self, object: &NewSpaceObject) -> FluxResult<ObjectId>;

    /// Objects matching every applied filter, with their measurement counts.
    ///
    /// At most [`flux_common::SEARCH_LIMIT`] rows are returned, in no
    /// particular order.
    async fn search(&self, filters: &SearchFilters) -> FluxResult<Vec<ObjectFluxCount>>;

    /// Distinct catalog names present in the store.
    async fn catalog_names(&self) -> FluxResult<BTreeSet<String>>;

    /// Approximate number of stored objects, suitable for display only.
    async fn estimate_object_count(&self) -> FluxResult<u64>;

    async fn get_object(&self, id: ObjectId) -> FluxResult<Option<SpaceObject>>;

    /// Persist all measurements of one file. Either every row is stored or none.
    async fn insert_measurements(&self, measurements: &[NewFluxMeasurement]) -> FluxResult<usize>;

    /// Measurements of one object ordered by exposure start.
    async fn measurements_for_object(&self, id: ObjectId) -> FluxResult<Vec<FluxMeasurement>>;

    /// Write a batch summary and one error message per failed file.
    async fn record_upload(
        &self,
        log: &NewUploadLog,
        failures: &[FileFailure],
    ) -> FluxResult<UploadLogId>;

    /// Upload history of one user, newest first.
    async fn upload_logs_for_user(&self, user: &UserId) -> FluxResult<Vec<UploadLogEntry>>;
}
