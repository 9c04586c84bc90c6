//! Error types for the ingestion crate.

use flux_common::FluxError;
use thiserror::Error;

/// Errors that can occur during upload and ingestion.
#[derive(Error, Debug)]
pub enum IngestionError {
    /// The file does not follow the expected layout.
    #[error("Line {line}: {message}")]
    Content { line: u64, message: String },

    #[error("Failed to read staged file: {0}")]
    StagingIo(#[from] std::io::Error),

    #[error("Failed to enumerate staging directory: {0}")]
    DirectoryIo(String),

    #[error("Given path to the directory is not correct: {0}")]
    Validation(String),

    #[error("Failed to store data: {0}")]
    Store(#[from] FluxError),

    #[error("Event consumer disconnected")]
    ConsumerGone,

    #[error("Batch worker failed: {0}")]
    Worker(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IngestionError {
    pub(crate) fn content(line: u64, message: impl Into<String>) -> Self {
        IngestionError::Content {
            line,
            message: message.into(),
        }
    }

    /// Whether the error only concerns one file and the batch can go on.
    pub fn is_file_level(&self) -> bool {
        matches!(
            self,
            IngestionError::Content { .. } | IngestionError::StagingIo(_) | IngestionError::Store(_)
        )
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_level_errors() {
        assert!(IngestionError::content(3, "bad flux").is_file_level());
        assert!(IngestionError::StagingIo(std::io::Error::new(std::io::ErrorKind::NotFound, "unreadable")).is_file_level());
        assert!(IngestionError::Store(FluxError::ObjectNotFound(1)).is_file_level());

        assert!(!IngestionError::DirectoryIo("gone".into()).is_file_level());
        assert!(!IngestionError::Validation("..".into()).is_file_level());
        assert!(!IngestionError::ConsumerGone.is_file_level());
    }
}
