//! Staging area for uploaded batch files.
//!
//! Every batch lives in its own directory directly under one staging root.
//! Paths handed back by clients are checked against that root before any
//! file is read or written.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use futures::{pin_mut, Stream, StreamExt};
use metrics::counter;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::IngestionConfig;
use crate::error::{IngestionError, Result};

/// Receives uploaded files into batch directories under a fixed root.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    new_batch_token: String,
    batch_dir_prefix: String,
}

impl StagingArea {
    /// Create the staging root if needed and pin it to its canonical path.
    pub fn new(config: &IngestionConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.staging_root)?;
        let root = std::fs::canonicalize(&config.staging_root)?;

        info!(root = %root.display(), "Staging area ready");

        Ok(Self {
            root,
            new_batch_token: config.new_batch_token.clone(),
            batch_dir_prefix: config.batch_dir_prefix.clone(),
        })
    }

    /// Canonical staging root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_new_batch_token(&self, token: &str) -> bool {
        token == self.new_batch_token
    }

    /// Resolve a client-supplied batch directory to its canonical path.
    ///
    /// Accepts either a bare directory name or a path below the root. The
    /// directory must sit directly under the root, exist, and still sit
    /// directly under the root once symlinks are resolved.
    pub async fn validate_batch_dir(&self, requested: &str) -> Result<PathBuf> {
        let candidate = self.lexical_batch_dir(requested)?;

        let metadata = tokio::fs::metadata(&candidate)
            .await
            .map_err(|e| IngestionError::Validation(format!("{}: {}", requested, e)))?;
        if !metadata.is_dir() {
            return Err(IngestionError::Validation(format!(
                "{} is not a directory",
                requested
            )));
        }

        let canonical = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|e| IngestionError::Validation(format!("{}: {}", requested, e)))?;
        if canonical.parent() != Some(self.root.as_path()) {
            return Err(IngestionError::Validation(format!(
                "{} resolves outside the staging root",
                requested
            )));
        }

        Ok(canonical)
    }

    /// Create a new, uniquely named batch directory.
    pub async fn allocate_batch_dir(&self) -> Result<PathBuf> {
        let name = format!("{}{}", self.batch_dir_prefix, Uuid::new_v4().simple());
        let dir = self.root.join(name);
        tokio::fs::create_dir(&dir).await?;

        debug!(dir = %dir.display(), "Allocated batch directory");
        Ok(dir)
    }

    /// Write one uploaded file into a batch directory.
    ///
    /// `token` is either the new-batch token or a batch directory returned by
    /// an earlier call. Returns the batch directory the file was written to.
    pub async fn store<S>(&self, file_name: &str, token: &str, body: S) -> Result<PathBuf>
    where
        S: Stream<Item = std::io::Result<Bytes>>,
    {
        let name = sanitize_file_name(file_name)?;

        let dir = if self.is_new_batch_token(token) {
            self.allocate_batch_dir().await?
        } else {
            self.validate_batch_dir(token).await?
        };

        let path = dir.join(&name);
        let mut file = tokio::fs::File::create(&path).await?;
        let mut written = 0u64;

        pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        counter!("upload_bytes_total").increment(written);
        info!(file = %name, dir = %dir.display(), bytes = written, "Stored uploaded file");

        Ok(dir)
    }

    fn lexical_batch_dir(&self, requested: &str) -> Result<PathBuf> {
        let requested_path = Path::new(requested);
        let relative = if requested_path.is_absolute() {
            requested_path.strip_prefix(&self.root).map_err(|_| {
                IngestionError::Validation(format!("{} is outside the staging root", requested))
            })?
        } else {
            requested_path
        };

        let mut components = relative.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Ok(self.root.join(name)),
            _ => Err(IngestionError::Validation(format!(
                "{} is not a batch directory under the staging root",
                requested
            ))),
        }
    }
}

/// Keep only the final component of a client-supplied file name.
fn sanitize_file_name(file_name: &str) -> Result<String> {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(IngestionError::Validation(format!(
            "invalid file name '{}'",
            file_name
        )));
    }
    Ok(name.to_string())
}
