// Job registry
// In-memory status tracking for analysis jobs with progress broadcast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::notes::Note;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job queue is full")]
    QueueFull,

    #[error("Worker pool is shut down")]
    ShutDown,

    #[error("Job not found: {0}")]
    NotFound(Uuid),
}

pub type JobResult<T> = Result<T, JobError>;

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle stage of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Separating,
    Analyzing,
    Saving,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Separating => "separating",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Saving => "saving",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "downloading" => Some(JobStatus::Downloading),
            "separating" => Some(JobStatus::Separating),
            "analyzing" => Some(JobStatus::Analyzing),
            "saving" => Some(JobStatus::Saving),
            "done" => Some(JobStatus::Done),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    /// Coarse overall progress when entering this stage
    pub fn progress(&self) -> f32 {
        match self {
            JobStatus::Queued => 0.0,
            JobStatus::Downloading => 0.1,
            JobStatus::Separating => 0.3,
            JobStatus::Analyzing => 0.6,
            JobStatus::Saving => 0.9,
            JobStatus::Done | JobStatus::Error => 1.0,
        }
    }
}

/// Snapshot of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub user_id: String,
    pub source_id: String,
    pub status: JobStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Stored analysis, set once the job is done
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<Note>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Progress event broadcast on every status change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: f32,
    pub message: String,
}

/// Shared registry of jobs, cheap to clone
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, JobRecord>>>,
    progress_tx: broadcast::Sender<JobProgress>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            progress_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, JobRecord>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, record: &JobRecord) {
        // No subscribers is fine
        let _ = self.progress_tx.send(JobProgress {
            job_id: record.id,
            status: record.status,
            progress: record.status.progress(),
            message: record.message.clone(),
        });
    }

    /// Register a new queued job
    pub fn create(&self, user_id: impl Into<String>, source_id: impl Into<String>) -> JobRecord {
        let now = Utc::now();
        let record = JobRecord {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            source_id: source_id.into(),
            status: JobStatus::Queued,
            message: "Queued".to_string(),
            created_at: now,
            updated_at: now,
            analysis_id: None,
            notes: None,
            error: None,
        };

        self.lock().insert(record.id, record.clone());
        self.publish(&record);
        record
    }

    /// Move a job to a non-terminal stage. Finished jobs are left untouched.
    pub fn update(&self, id: &Uuid, status: JobStatus, message: impl Into<String>) -> JobResult<()> {
        self.transition(id, |record| {
            record.status = status;
            record.message = message.into();
        })
    }

    pub fn complete(&self, id: &Uuid, analysis_id: Uuid, notes: Vec<Note>) -> JobResult<()> {
        self.transition(id, |record| {
            record.status = JobStatus::Done;
            record.message = format!("Found {} notes", notes.len());
            record.analysis_id = Some(analysis_id);
            record.notes = Some(notes);
        })
    }

    pub fn fail(&self, id: &Uuid, error: impl Into<String>) -> JobResult<()> {
        let error = error.into();
        self.transition(id, |record| {
            record.status = JobStatus::Error;
            record.message = error.clone();
            record.error = Some(error);
        })
    }

    fn transition(&self, id: &Uuid, apply: impl FnOnce(&mut JobRecord)) -> JobResult<()> {
        let snapshot = {
            let mut jobs = self.lock();
            let record = jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;
            if record.status.is_terminal() {
                log::debug!("Ignoring update for finished job {}", id);
                return Ok(());
            }
            apply(record);
            record.updated_at = Utc::now();
            record.clone()
        };

        self.publish(&snapshot);
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Option<JobRecord> {
        self.lock().get(id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgress> {
        self.progress_tx.subscribe()
    }

    pub fn remove(&self, id: &Uuid) -> Option<JobRecord> {
        self.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop finished jobs older than `ttl`; returns the ids removed
    pub fn evict_finished(&self, ttl: chrono::Duration) -> Vec<Uuid> {
        let cutoff = Utc::now() - ttl;
        let mut jobs = self.lock();
        let expired: Vec<Uuid> = jobs
            .values()
            .filter(|record| record.status.is_terminal() && record.updated_at <= cutoff)
            .map(|record| record.id)
            .collect();
        for id in &expired {
            jobs.remove(id);
        }
        if !expired.is_empty() {
            log::debug!("Evicted {} finished jobs", expired.len());
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        for status in [
            JobStatus::Queued,
            JobStatus::Downloading,
            JobStatus::Separating,
            JobStatus::Analyzing,
            JobStatus::Saving,
            JobStatus::Done,
            JobStatus::Error,
        ] {
            assert_eq!(JobStatus::from_string(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::from_string("bogus"), None);
        assert_eq!(
            serde_json::to_string(&JobStatus::Separating).unwrap(),
            "\"separating\""
        );
    }

    #[test]
    fn test_progress_is_monotonic_along_pipeline() {
        let order = [
            JobStatus::Queued,
            JobStatus::Downloading,
            JobStatus::Separating,
            JobStatus::Analyzing,
            JobStatus::Saving,
            JobStatus::Done,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].progress() < pair[1].progress());
        }
    }

    #[test]
    fn test_create_update_complete() {
        let registry = JobRegistry::new();
        let job = registry.create("alice", "song-1");
        assert_eq!(job.status, JobStatus::Queued);

        registry.update(&job.id, JobStatus::Analyzing, "Tracking pitch").unwrap();
        assert_eq!(registry.get(&job.id).unwrap().status, JobStatus::Analyzing);

        let analysis_id = Uuid::new_v4();
        registry.complete(&job.id, analysis_id, vec![]).unwrap();

        let done = registry.get(&job.id).unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.analysis_id, Some(analysis_id));
        assert_eq!(done.notes, Some(vec![]));
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let registry = JobRegistry::new();
        let job = registry.create("alice", "song-1");

        registry.fail(&job.id, "boom").unwrap();
        registry.update(&job.id, JobStatus::Saving, "late").unwrap();
        registry.complete(&job.id, Uuid::new_v4(), vec![]).unwrap();

        let record = registry.get(&job.id).unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(record.analysis_id.is_none());
    }

    #[test]
    fn test_unknown_job() {
        let registry = JobRegistry::new();
        let missing = Uuid::new_v4();
        assert!(matches!(
            registry.update(&missing, JobStatus::Saving, "x"),
            Err(JobError::NotFound(id)) if id == missing
        ));
        assert!(registry.get(&missing).is_none());
    }

    #[tokio::test]
    async fn test_subscribe_receives_progress() {
        let registry = JobRegistry::new();
        let mut rx = registry.subscribe();

        let job = registry.create("alice", "song-1");
        registry.update(&job.id, JobStatus::Downloading, "Fetching").unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.job_id, job.id);
        assert_eq!(first.status, JobStatus::Queued);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.status, JobStatus::Downloading);
        assert_eq!(second.message, "Fetching");
    }

    #[test]
    fn test_evict_finished_only() {
        let registry = JobRegistry::new();
        let running = registry.create("alice", "a");
        let finished = registry.create("alice", "b");
        registry.fail(&finished.id, "nope").unwrap();

        // Nothing is old enough yet
        assert!(registry.evict_finished(chrono::Duration::hours(1)).is_empty());

        assert_eq!(
            registry.evict_finished(chrono::Duration::zero()),
            vec![finished.id]
        );
        assert!(registry.get(&finished.id).is_none());
        assert!(registry.get(&running.id).is_some());
        assert_eq!(registry.len(), 1);
    }
}
