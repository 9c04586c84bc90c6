//! Shared test utilities for the flux-ingest workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Photometry file builders in the ingest CSV format
//! - Space object fixtures
//! - A temporary staging root with batch directories
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;
pub mod staging;

pub use fixtures::*;
pub use staging::*;
