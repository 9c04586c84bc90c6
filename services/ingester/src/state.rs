//! Application state shared across handlers.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use ingestion::{BatchRunner, StagingArea};
use storage::PhotometryStore;

use crate::config::IngesterConfig;

/// Shared application state.
pub struct AppState {
    pub store: Arc<dyn PhotometryStore>,
    pub staging: Arc<StagingArea>,
    pub runner: BatchRunner,
    /// Absent when no recorder is installed, e.g. in tests.
    pub prometheus: Option<PrometheusHandle>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        store: Arc<dyn PhotometryStore>,
        config: &IngesterConfig,
        prometheus: Option<PrometheusHandle>,
    ) -> ingestion::Result<Self> {
        let ingestion = config.ingestion();
        let staging = Arc::new(StagingArea::new(&ingestion)?);
        let runner = BatchRunner::new(store.clone(), staging.clone(), &ingestion);

        Ok(Self {
            store,
            staging,
            runner,
            prometheus,
            max_upload_bytes: config.max_upload_bytes,
        })
    }
}
