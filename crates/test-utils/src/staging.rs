//! Temporary staging roots for ingest tests.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary staging root, removed when dropped.
pub struct StagingFixture {
    _dir: TempDir,
    root: PathBuf,
}

impl StagingFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temporary staging root");
        // Canonical so paths built here match the ones the staging area returns.
        let root = fs::canonicalize(dir.path()).expect("canonicalize staging root");
        Self { _dir: dir, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a batch directory directly under the root.
    pub fn batch_dir(&self, name: &str) -> PathBuf {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir).expect("create batch directory");
        dir
    }

    /// Write a file into a directory, creating parents as needed.
    pub fn write_file(&self, dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent directory");
        }
        fs::write(&path, content).expect("write staged file");
        path
    }
}

impl Default for StagingFixture {
    fn default() -> Self {
        Self::new()
    }
}
