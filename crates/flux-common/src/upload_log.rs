//! Upload audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flux::UserId;

/// Store-assigned upload log identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadLogId(pub i64);

/// Summary of one ingest batch, written once the batch ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadLog {
    pub id: UploadLogId,
    pub user_id: UserId,
    pub uploaded_at: DateTime<Utc>,
    pub file_count: u32,
    pub failed_count: u32,
}

/// Insert form of [`UploadLog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUploadLog {
    pub user_id: UserId,
    pub uploaded_at: DateTime<Utc>,
    pub file_count: u32,
    pub failed_count: u32,
}

/// Why one file of a batch could not be ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadErrorMessage {
    pub id: i64,
    pub upload_log_id: UploadLogId,
    pub file_name: String,
    pub message: String,
}

/// A log together with its per-file error messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadLogEntry {
    #[serde(flatten)]
    pub log: UploadLog,
    pub errors: Vec<UploadErrorMessage>,
}

/// A file that failed within a batch, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file_name: String,
    pub message: String,
}

impl FileFailure {
    pub fn new(file_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            message: message.into(),
        }
    }
}
