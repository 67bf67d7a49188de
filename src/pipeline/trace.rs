// Pipeline progress tracing
// Append-only JSONL trace file recording each stage of an analysis job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use super::jobs::JobStatus;

/// Errors that can occur during trace operations
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// A single line of a job trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub job_id: Uuid,

    pub timestamp: DateTime<Utc>,

    pub stage: JobStatus,

    /// Progress within the stage [0.0, 1.0]
    pub progress: f32,

    pub message: String,

    /// Optional structured data (frame counts, note counts, paths)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TraceEntry {
    pub fn new(job_id: Uuid, stage: JobStatus, progress: f32, message: String) -> Self {
        TraceEntry {
            job_id,
            timestamp: Utc::now(),
            stage,
            progress: progress.clamp(0.0, 1.0),
            message,
            data: None,
        }
    }

    /// Serialize to JSON line (with newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Manages an append-only JSONL trace file
pub struct TraceWriter {
    file_path: PathBuf,
}

impl TraceWriter {
    pub fn new(file_path: PathBuf) -> Self {
        TraceWriter { file_path }
    }

    /// Append a trace entry, creating the file if needed
    pub fn write(&self, entry: &TraceEntry) -> Result<(), TraceError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        let json_line = entry.to_json_line()?;
        file.write_all(json_line.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Helper builder for trace entries of one job stage
pub struct TraceBuilder {
    job_id: Uuid,
    stage: JobStatus,
}

impl TraceBuilder {
    pub fn new(job_id: Uuid, stage: JobStatus) -> Self {
        TraceBuilder { job_id, stage }
    }

    /// Create a start entry (progress = 0.0)
    pub fn start(self, message: impl Into<String>) -> TraceEntry {
        TraceEntry::new(self.job_id, self.stage, 0.0, message.into())
    }

    /// Create a complete entry (progress = 1.0)
    pub fn complete(self, message: impl Into<String>) -> TraceEntry {
        TraceEntry::new(self.job_id, self.stage, 1.0, message.into())
    }

    /// Create a complete entry carrying structured data
    pub fn complete_with_data(
        self,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> TraceEntry {
        let mut entry = TraceEntry::new(self.job_id, self.stage, 1.0, message.into());
        entry.data = Some(data);
        entry
    }
}

/// Read trace entries from a JSONL file
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let entry: TraceEntry = serde_json::from_str(line)?;
        entries.push(entry);
    }

    Ok(entries)
}
