//! Persistence for the photometry services.
//!
//! Provides:
//! - The [`PhotometryStore`] trait used by ingestion and the HTTP layer
//! - PostgreSQL implementation ([`Catalog`]) with earthdistance cone search
//! - In-process implementation ([`MemoryStore`]) for tests and local runs

pub mod catalog;
pub mod memory;
pub mod store;

pub use catalog::Catalog;
pub use memory::MemoryStore;
pub use store::PhotometryStore;
