//! Photometry ingester service.
//!
//! HTTP front end for the upload-and-ingest pipeline and catalog queries.

pub mod auth;
pub mod config;
pub mod error;
pub mod server;
pub mod state;

pub use config::IngesterConfig;
pub use server::build_router;
pub use state::AppState;
