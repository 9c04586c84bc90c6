//! Common types shared by the photometry ingestion services.

pub mod error;
pub mod flux;
pub mod search;
pub mod sky;
pub mod space_object;
pub mod upload_log;

pub use error::{FluxError, FluxResult};
pub use flux::{FluxMeasurement, FluxValue, MeasurementId, NewFluxMeasurement, UserId};
pub use search::{
    ConeFilter, MagnitudeRange, Predicate, SearchFilters, ALL_CATALOGUES, DEFAULT_MAX_MAGNITUDE,
    DEFAULT_MIN_MAGNITUDE, SEARCH_LIMIT,
};
pub use sky::SkyPosition;
pub use space_object::{NewSpaceObject, ObjectFluxCount, ObjectId, SpaceObject};
pub use upload_log::{
    FileFailure, NewUploadLog, UploadErrorMessage, UploadLog, UploadLogEntry, UploadLogId,
};
