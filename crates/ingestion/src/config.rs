//! Ingestion configuration.

use std::path::PathBuf;

use crate::error::{IngestionError, Result};

/// Destination token asking the staging area for a fresh batch directory.
pub const NEW_BATCH_TOKEN: &str = "create_new";

/// Prefix of generated batch directory names.
pub const DEFAULT_BATCH_PREFIX: &str = "flux";

/// Default capacity of the per-batch event channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 16;

/// Settings shared by the staging area and the batch runner.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Every batch directory must be a direct child of this directory.
    pub staging_root: PathBuf,
    /// Token meaning "allocate a new batch directory".
    pub new_batch_token: String,
    /// Prefix of generated batch directory names.
    pub batch_dir_prefix: String,
    /// Events buffered before the batch worker waits for the consumer.
    pub event_channel_capacity: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            staging_root: std::env::temp_dir(),
            new_batch_token: NEW_BATCH_TOKEN.to_string(),
            batch_dir_prefix: DEFAULT_BATCH_PREFIX.to_string(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl IngestionConfig {
    pub fn with_staging_root(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            ..Self::default()
        }
    }

    /// Check the settings for values that would break the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.event_channel_capacity == 0 {
            return Err(IngestionError::InvalidConfig(
                "event channel capacity must be at least 1".to_string(),
            ));
        }
        if self.new_batch_token.is_empty() {
            return Err(IngestionError::InvalidConfig(
                "new batch token must not be empty".to_string(),
            ));
        }
        if self.batch_dir_prefix.is_empty()
            || self.batch_dir_prefix.contains(['/', '\\'])
            || self.batch_dir_prefix.starts_with('.')
        {
            return Err(IngestionError::InvalidConfig(format!(
                "invalid batch directory prefix '{}'",
                self.batch_dir_prefix
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = IngestionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.new_batch_token, "create_new");
        assert_eq!(config.staging_root, std::env::temp_dir());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = IngestionConfig::default();
        config.event_channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = IngestionConfig::default();
        config.batch_dir_prefix = "../escape".to_string();
        assert!(config.validate().is_err());

        let mut config = IngestionConfig::default();
        config.new_batch_token.clear();
        assert!(config.validate().is_err());
    }
}
