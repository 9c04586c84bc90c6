//! Photometry ingestion library.
//!
//! Provides the upload-and-ingest pipeline used by the `ingester` service.
//!
//! # Architecture
//!
//! - [`StagingArea`] receives uploaded files into per-batch directories under
//!   a single staging root and validates batch paths against that root.
//! - [`parser`] turns one uploaded file into measurement rows.
//! - [`BatchRunner`] walks a staged batch on its own task, resolving each
//!   row's object in the catalog, persisting measurements, streaming one
//!   [`BatchEvent`] per stored file and writing the upload log at the end.

pub mod batch;
pub mod config;
pub mod error;
pub mod parser;
pub mod staging;

// Re-exports
pub use batch::{BatchEvent, BatchHandle, BatchOutcome, BatchRequest, BatchRunner, BatchStage, BatchSummary};
pub use config::{IngestionConfig, NEW_BATCH_TOKEN};
pub use error::{IngestionError, Result};
pub use parser::{parse_bytes, ParsedRow};
pub use staging::StagingArea;
