// Data models for stored analyses
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notes::Note;

/// A completed analysis of one source recording for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub user_id: String,
    pub source_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Stored isolated-vocal asset
    pub vocals_path: String,
    pub vocals_sha256: String,
    pub frame_count: i64,
    pub notes: Vec<Note>,
}

/// Fields needed to store a new analysis
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub user_id: String,
    pub source_id: String,
    pub title: String,
    pub vocals_path: String,
    pub vocals_sha256: String,
    pub frame_count: i64,
    pub notes: Vec<Note>,
}

/// Listing row without the note payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub id: Uuid,
    pub source_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub note_count: i64,
}
