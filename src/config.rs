// Application configuration
// JSON file with defaults for every field

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::audio::TrackerConfig;
use crate::notes::SegmentationConfig;
use crate::state::storage;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where the database, stored vocals and job traces live
    pub data_dir: Option<PathBuf>,

    pub workers: usize,

    pub queue_capacity: usize,

    /// Seconds a finished job stays queryable before eviction
    pub completed_job_ttl_secs: u64,

    /// External separator as `[program, arg, ...]` with `{input}`/`{output}` placeholders.
    /// Without one, inputs are treated as already isolated vocals.
    pub isolation_command: Option<Vec<String>>,

    pub segmentation: SegmentationConfig,

    pub tracker: TrackerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            workers: 2,
            queue_capacity: 16,
            completed_job_ttl_secs: 3600,
            isolation_command: None,
            segmentation: SegmentationConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if matches!(&self.isolation_command, Some(parts) if parts.is_empty()) {
            return Err(ConfigError::Invalid(
                "isolation_command needs a program".to_string(),
            ));
        }
        self.segmentation
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.tracker
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    /// Configured data directory, else the platform default
    pub fn resolve_data_dir(&self) -> Result<PathBuf, storage::StorageError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => storage::default_data_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.completed_job_ttl_secs, 3600);
        assert!(config.isolation_command.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "workers": 4, "segmentation": { "merge_all_until_silence": false } }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 16);
        assert!(!config.segmentation.merge_all_until_silence);
        assert_eq!(config.segmentation.cents_tolerance, 35.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        std::fs::write(&path, r#"{ "workers": 0 }"#).unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, r#"{ "isolation_command": [] }"#).unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_explicit_data_dir() {
        let config = AppConfig {
            data_dir: Some(PathBuf::from("/srv/vocal-notes")),
            ..AppConfig::default()
        };
        assert_eq!(
            config.resolve_data_dir().unwrap(),
            PathBuf::from("/srv/vocal-notes")
        );
    }
}
