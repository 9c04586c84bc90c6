//! Batch ingestion of a staged upload directory.
//!
//! A batch runs on its own tokio task. Files are processed one at a time and
//! progress is reported over a bounded channel that the caller consumes as a
//! [`Stream`]. Per-file failures are recorded and the batch moves on; only
//! path validation, directory enumeration and a vanished consumer end a
//! batch early.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::Stream;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

use flux_common::{FileFailure, NewUploadLog, ObjectId, UploadLogId, UserId};
use storage::PhotometryStore;

use crate::config::IngestionConfig;
use crate::error::{IngestionError, Result};
use crate::parser;
use crate::staging::StagingArea;

/// A request to ingest one staged batch directory.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Batch directory as returned by the staging area.
    pub staging_path: String,
    /// Number of files the client says it uploaded.
    pub declared_file_count: u32,
    /// Captured by the caller before the worker starts.
    pub user: UserId,
}

/// Progress reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// A file was parsed and all of its measurements stored.
    FileStored(String),
    /// All files were processed; carries the number of failed files.
    Completed { failures: u32 },
    /// The batch ended early.
    Aborted(String),
}

impl BatchEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            BatchEvent::FileStored(_) => "FILE_STORED",
            BatchEvent::Completed { .. } => "COMPLETED",
            BatchEvent::Aborted(_) => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchEvent::FileStored(_))
    }
}

/// Stages a batch moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStage {
    Started,
    Enumerating,
    Parsing,
    Resolving,
    Persisting,
    Failed,
    Completed,
    Aborted,
}

impl fmt::Display for BatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStage::Started => "started",
            BatchStage::Enumerating => "enumerating",
            BatchStage::Parsing => "parsing",
            BatchStage::Resolving => "resolving",
            BatchStage::Persisting => "persisting",
            BatchStage::Failed => "failed",
            BatchStage::Completed => "completed",
            BatchStage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every file was attempted.
    Completed,
    /// Stopped after starting; an upload log was still written.
    Aborted,
    /// The batch path failed validation; nothing was read or logged.
    Rejected,
}

impl BatchOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            BatchOutcome::Completed => "completed",
            BatchOutcome::Aborted => "aborted",
            BatchOutcome::Rejected => "rejected",
        }
    }
}

/// Result of a finished batch worker.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub log_id: Option<UploadLogId>,
    /// Files whose measurements were stored.
    pub processed: usize,
    pub failures: Vec<FileFailure>,
    pub outcome: BatchOutcome,
}

/// Starts batch workers against a store and staging area.
#[derive(Clone)]
pub struct BatchRunner {
    store: Arc<dyn PhotometryStore>,
    staging: Arc<StagingArea>,
    channel_capacity: usize,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn PhotometryStore>,
        staging: Arc<StagingArea>,
        config: &IngestionConfig,
    ) -> Self {
        Self {
            store,
            staging,
            channel_capacity: config.event_channel_capacity.max(1),
        }
    }

    /// Spawn a worker for the batch and return its event stream.
    pub fn start(&self, request: BatchRequest) -> BatchHandle {
        let (events, receiver) = mpsc::channel(self.channel_capacity);
        let worker = BatchWorker {
            store: self.store.clone(),
            staging: self.staging.clone(),
            events,
        };

        BatchHandle {
            events: receiver,
            worker: tokio::spawn(worker.run(request)),
        }
    }
}

/// Caller side of a running batch.
///
/// Yields events until the terminal one. Dropping the handle disconnects
/// the consumer, which aborts the batch at its next event.
pub struct BatchHandle {
    events: mpsc::Receiver<BatchEvent>,
    worker: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    /// Drain all remaining events and wait for the worker to finish.
    pub async fn finish(mut self) -> Result<(Vec<BatchEvent>, BatchSummary)> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let summary = self
            .worker
            .await
            .map_err(|e| IngestionError::Worker(e.to_string()))?;
        Ok((events, summary))
    }
}

impl Stream for BatchHandle {
    type Item = BatchEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// Files attempted so far.
#[derive(Default)]
struct Progress {
    processed: usize,
    failures: Vec<FileFailure>,
}

struct BatchWorker {
    store: Arc<dyn PhotometryStore>,
    staging: Arc<StagingArea>,
    events: mpsc::Sender<BatchEvent>,
}

impl BatchWorker {
    #[instrument(
        name = "batch",
        skip(self, request),
        fields(user = %request.user, path = %request.staging_path, declared = request.declared_file_count)
    )]
    async fn run(self, request: BatchRequest) -> BatchSummary {
        let started_at = Utc::now();
        enter(BatchStage::Started);

        let dir = match self.staging.validate_batch_dir(&request.staging_path).await {
            Ok(dir) => dir,
            Err(e) => return self.reject(e).await,
        };

        enter(BatchStage::Enumerating);
        let files = match enumerate_files(dir.clone()).await {
            Ok(files) => files,
            Err(e) => return self.abort(&request, started_at, e, Progress::default()).await,
        };
        info!(files = files.len(), "Enumerated batch directory");

        let mut progress = Progress::default();
        for path in files {
            let file_name = display_name(&dir, &path);

            match self.ingest_file(&path, &request.user).await {
                Ok(stored) => {
                    progress.processed += 1;
                    counter!("ingest_files_total", "outcome" => "stored").increment(1);
                    debug!(file = %file_name, measurements = stored, "File stored");

                    if self.events.send(BatchEvent::FileStored(file_name)).await.is_err() {
                        return self
                            .abort(&request, started_at, IngestionError::ConsumerGone, progress)
                            .await;
                    }
                }
                Err(e) if e.is_file_level() => {
                    enter(BatchStage::Failed);
                    counter!("ingest_files_total", "outcome" => "failed").increment(1);
                    warn!(file = %file_name, error = %e, "File not ingested");
                    progress.failures.push(FileFailure::new(file_name, e.to_string()));
                }
                Err(e) => return self.abort(&request, started_at, e, progress).await,
            }
        }

        let failures = progress.failures.len() as u32;
        let log = NewUploadLog {
            user_id: request.user.clone(),
            uploaded_at: started_at,
            file_count: request.declared_file_count,
            failed_count: failures,
        };

        let log_id = match self.store.record_upload(&log, &progress.failures).await {
            Ok(id) => id,
            Err(e) => {
                let cause = IngestionError::Store(e);
                error!(error = %cause, "Failed to write upload log");
                self.finish(BatchOutcome::Aborted, BatchEvent::Aborted(cause.to_string()))
                    .await;
                return BatchSummary {
                    log_id: None,
                    processed: progress.processed,
                    failures: progress.failures,
                    outcome: BatchOutcome::Aborted,
                };
            }
        };

        info!(
            processed = progress.processed,
            failures, "Batch completed"
        );
        self.finish(BatchOutcome::Completed, BatchEvent::Completed { failures })
            .await;

        BatchSummary {
            log_id: Some(log_id),
            processed: progress.processed,
            failures: progress.failures,
            outcome: BatchOutcome::Completed,
        }
    }

    /// Read, parse, resolve and persist one file.
    async fn ingest_file(&self, path: &Path, user: &UserId) -> Result<usize> {
        enter(BatchStage::Parsing);
        let content = tokio::fs::read(path).await?;
        let rows = parser::parse_bytes(&content)?;

        enter(BatchStage::Resolving);
        let mut resolved: HashMap<(String, String), ObjectId> = HashMap::new();
        let mut measurements = Vec::with_capacity(rows.len());
        for row in rows {
            let key = (row.object.catalog.clone(), row.object.catalog_id.clone());
            let object_id = match resolved.get(&key) {
                Some(id) => *id,
                None => {
                    let id = self.store.resolve_or_create(&row.object).await?;
                    resolved.insert(key, id);
                    id
                }
            };
            measurements.push(row.into_measurement(object_id, user.clone()));
        }

        enter(BatchStage::Persisting);
        let stored = self.store.insert_measurements(&measurements).await?;
        counter!("ingest_measurements_total").increment(stored as u64);

        Ok(stored)
    }

    /// Validation failed: report it and stop without touching files or logs.
    async fn reject(&self, cause: IngestionError) -> BatchSummary {
        warn!(error = %cause, "Batch rejected");
        self.finish(BatchOutcome::Rejected, BatchEvent::Aborted(cause.to_string()))
            .await;

        BatchSummary {
            log_id: None,
            processed: 0,
            failures: Vec::new(),
            outcome: BatchOutcome::Rejected,
        }
    }

    /// Stop a started batch. The log counts every declared file as failed.
    async fn abort(
        &self,
        request: &BatchRequest,
        started_at: DateTime<Utc>,
        cause: IngestionError,
        progress: Progress,
    ) -> BatchSummary {
        error!(error = %cause, processed = progress.processed, "Batch aborted");

        let log = NewUploadLog {
            user_id: request.user.clone(),
            uploaded_at: started_at,
            file_count: request.declared_file_count,
            failed_count: request.declared_file_count,
        };
        let log_id = match self.store.record_upload(&log, &progress.failures).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(error = %e, "Failed to write upload log");
                None
            }
        };

        if matches!(cause, IngestionError::ConsumerGone) {
            enter(BatchStage::Aborted);
            counter!("ingest_batches_total", "outcome" => BatchOutcome::Aborted.as_str())
                .increment(1);
        } else {
            self.finish(BatchOutcome::Aborted, BatchEvent::Aborted(cause.to_string()))
                .await;
        }

        BatchSummary {
            log_id,
            processed: progress.processed,
            failures: progress.failures,
            outcome: BatchOutcome::Aborted,
        }
    }

    /// Send the terminal event. Nothing is sent after it.
    async fn finish(&self, outcome: BatchOutcome, event: BatchEvent) {
        enter(match outcome {
            BatchOutcome::Completed => BatchStage::Completed,
            BatchOutcome::Aborted | BatchOutcome::Rejected => BatchStage::Aborted,
        });
        counter!("ingest_batches_total", "outcome" => outcome.as_str()).increment(1);

        if self.events.send(event).await.is_err() {
            debug!("Consumer gone before the terminal event");
        }
    }
}

fn enter(stage: BatchStage) {
    debug!(stage = %stage, "Batch stage");
}

/// Regular files under `dir`, recursively, in a stable order.
///
/// Symlinks are not followed and never listed.
async fn enumerate_files(dir: PathBuf) -> Result<Vec<PathBuf>> {
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|e| IngestionError::DirectoryIo(e.to_string()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    })
    .await
    .map_err(|e| IngestionError::DirectoryIo(e.to_string()))?
}

/// File name relative to the batch directory.
fn display_name(dir: &Path, path: &Path) -> String {
    path.strip_prefix(dir)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryStore;

    #[test]
    fn test_event_names() {
        assert_eq!(BatchEvent::FileStored("a.csv".into()).name(), "FILE_STORED");
        assert_eq!(BatchEvent::Completed { failures: 2 }.name(), "COMPLETED");
        assert!(BatchEvent::Completed { failures: 0 }.is_terminal());
        assert!(BatchEvent::Aborted("gone".into()).is_terminal());
        assert!(!BatchEvent::FileStored("a.csv".into()).is_terminal());
    }

    #[test]
    fn test_display_name_is_relative() {
        let dir = Path::new("/staging/flux1");
        assert_eq!(display_name(dir, &dir.join("night1.csv")), "night1.csv");
        assert_eq!(display_name(dir, &dir.join("sub").join("b.csv")), "sub/b.csv");
    }

    #[tokio::test]
    async fn test_enumerate_sorted_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), "x").unwrap();
        std::fs::write(dir.path().join("a.csv"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.csv"), "x").unwrap();

        let files = enumerate_files(dir.path().to_path_buf()).await.unwrap();
        let names: Vec<String> = files.iter().map(|f| display_name(dir.path(), f)).collect();
        assert_eq!(names, vec!["a.csv", "b.csv", "nested/c.csv"]);
    }

    #[tokio::test]
    async fn test_walk_failure_aborts_with_declared_counts() {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestionConfig::with_staging_root(dir.path());
        let store = Arc::new(MemoryStore::new());
        let (events, mut receiver) = mpsc::channel(config.event_channel_capacity);
        let worker = BatchWorker {
            store: store.clone(),
            staging: Arc::new(StagingArea::new(&config).unwrap()),
            events,
        };
        let request = BatchRequest {
            staging_path: "flux-vanished".to_string(),
            declared_file_count: 5,
            user: UserId::new("observer"),
        };

        let cause = enumerate_files(dir.path().join("flux-vanished")).await.unwrap_err();
        let summary = worker
            .abort(&request, Utc::now(), cause, Progress::default())
            .await;
        drop(worker);

        let mut events = Vec::new();
        while let Some(event) = receiver.recv().await {
            events.push(event);
        }
        assert!(matches!(events.as_slice(), [BatchEvent::Aborted(msg)] if msg.contains("enumerate")));
        assert_eq!(summary.outcome, BatchOutcome::Aborted);
        assert_eq!(summary.processed, 0);

        let logs = store.upload_logs_for_user(&request.user).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(Some(logs[0].log.id), summary.log_id);
        assert_eq!(logs[0].log.file_count, 5);
        assert_eq!(logs[0].log.failed_count, 5);
        assert!(logs[0].errors.is_empty());
    }

    #[tokio::test]
    async fn test_enumerate_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = enumerate_files(dir.path().join("missing")).await.unwrap_err();
        assert!(matches!(err, IngestionError::DirectoryIo(_)));
    }
}
