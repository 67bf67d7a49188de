// Analysis worker pool
// Bounded job queue drained by a fixed set of workers running the
// fetch -> isolate -> analyze -> save pipeline

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::collaborators::{CollaboratorError, SourceFetcher, VocalIsolator};
use super::jobs::{JobError, JobRecord, JobRegistry, JobResult, JobStatus};
use super::trace::{TraceBuilder, TraceWriter};
use crate::audio::{ingest_wav, AudioError, PitchTracker, TrackerError};
use crate::notes::{segment_notes, AnalysisError, Note, SegmentationConfig};
use crate::state::{self, storage, Analysis, DbConnection, DbError, NewAnalysis, StorageError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Pitch tracking error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

const VOCALS_FILE_NAME: &str = "vocals.wav";
const SOURCE_DIR: &str = "source";
const SEPARATED_DIR: &str = "separated";

/// A request to analyze one source for one user
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub user_id: String,
    pub source_id: String,
    pub title: Option<String>,
}

impl JobRequest {
    pub fn new(user_id: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            source_id: source_id.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Explicit title, else the source's file stem
    fn display_title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            Path::new(&self.source_id)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.source_id.clone())
        })
    }
}

/// Everything a worker needs to run a job
pub struct PipelineContext {
    pub db: DbConnection,
    pub registry: JobRegistry,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub isolator: Arc<dyn VocalIsolator>,
    pub tracker: Arc<dyn PitchTracker>,
    pub segmentation: SegmentationConfig,
    pub data_dir: PathBuf,
    /// How long finished jobs stay queryable
    pub completed_job_ttl: Duration,
}

struct QueuedJob {
    id: Uuid,
    request: JobRequest,
}

pub struct WorkerPool {
    sender: mpsc::Sender<QueuedJob>,
    /// Held by the pool as well so the queue stays open with no workers running
    queue: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    workers: Vec<JoinHandle<()>>,
    evictor: JoinHandle<()>,
    registry: JobRegistry,
}

impl WorkerPool {
    /// Spawn `workers` tasks over a queue holding at most `queue_capacity` jobs.
    /// Must be called from within a tokio runtime.
    pub fn start(workers: usize, queue_capacity: usize, ctx: PipelineContext) -> Self {
        let (sender, receiver) = mpsc::channel::<QueuedJob>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let ctx = Arc::new(ctx);

        let handles = (0..workers)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        match next {
                            Some(job) => process_job(Arc::clone(&ctx), job).await,
                            None => break,
                        }
                    }
                    log::debug!("Worker {} stopped", worker_id);
                })
            })
            .collect();

        let evictor = {
            let registry = ctx.registry.clone();
            let data_dir = ctx.data_dir.clone();
            let period = (ctx.completed_job_ttl / 2).max(Duration::from_secs(1));
            let ttl = chrono::Duration::from_std(ctx.completed_job_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(365));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    evict_expired_jobs(&registry, &data_dir, ttl);
                }
            })
        };

        log::info!(
            "Started {} analysis workers (queue capacity {})",
            workers,
            queue_capacity.max(1)
        );

        Self {
            sender,
            queue: receiver,
            workers: handles,
            evictor,
            registry: ctx.registry.clone(),
        }
    }

    /// Register a job and enqueue it without waiting for queue space
    pub fn submit(&self, request: JobRequest) -> JobResult<JobRecord> {
        let record = self
            .registry
            .create(request.user_id.clone(), request.source_id.clone());

        let queued = QueuedJob {
            id: record.id,
            request,
        };

        match self.sender.try_send(queued) {
            Ok(()) => {
                log::info!("Queued job {} for {}", record.id, record.source_id);
                Ok(record)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Rejecting job {}: queue full", record.id);
                self.registry.fail(&record.id, JobError::QueueFull.to_string())?;
                Err(JobError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.registry.fail(&record.id, JobError::ShutDown.to_string())?;
                Err(JobError::ShutDown)
            }
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Stop accepting jobs and wait for queued and in-flight jobs to finish.
    /// Jobs still queued once the workers are gone end in `error`.
    pub async fn shutdown(self) {
        drop(self.sender);
        for handle in self.workers {
            if let Err(e) = handle.await {
                log::error!("Worker task failed: {}", e);
            }
        }
        self.evictor.abort();

        let mut queue = self.queue.lock().await;
        while let Ok(job) = queue.try_recv() {
            if let Err(e) = self.registry.fail(&job.id, JobError::ShutDown.to_string()) {
                log::warn!("Could not fail abandoned job {}: {}", job.id, e);
            }
        }
        log::info!("Worker pool shut down");
    }
}

async fn process_job(ctx: Arc<PipelineContext>, job: QueuedJob) {
    let job_id = job.id;
    let pipeline_ctx = Arc::clone(&ctx);
    let outcome = tokio::task::spawn_blocking(move || run_pipeline(&pipeline_ctx, &job)).await;

    let recorded = match outcome {
        Ok(Ok(analysis)) => {
            log::info!("Job {} done: {} notes", job_id, analysis.notes.len());
            ctx.registry.complete(&job_id, analysis.id, analysis.notes)
        }
        Ok(Err(e)) => {
            log::error!("Job {} failed: {}", job_id, e);
            ctx.registry.fail(&job_id, e.to_string())
        }
        Err(e) => {
            log::error!("Job {} panicked: {}", job_id, e);
            ctx.registry.fail(&job_id, "internal error while analyzing")
        }
    };

    if let Err(e) = recorded {
        log::warn!("Could not record outcome of job {}: {}", job_id, e);
    }
}

/// Per-job stage reporting to the registry and the trace file
struct StageReporter<'a> {
    registry: &'a JobRegistry,
    trace: TraceWriter,
    job_id: Uuid,
}

impl StageReporter<'_> {
    fn enter(&self, stage: JobStatus, message: &str) {
        log::info!("Job {}: {}", self.job_id, message);
        if let Err(e) = self.registry.update(&self.job_id, stage, message) {
            log::warn!("Job {} vanished from registry: {}", self.job_id, e);
        }
        self.record(TraceBuilder::new(self.job_id, stage).start(message));
    }

    fn finish(&self, stage: JobStatus, message: &str, data: serde_json::Value) {
        self.record(TraceBuilder::new(self.job_id, stage).complete_with_data(message, data));
    }

    fn record(&self, entry: super::trace::TraceEntry) {
        if let Err(e) = self.trace.write(&entry) {
            log::warn!("Failed to write trace for job {}: {}", self.job_id, e);
        }
    }
}

/// Drop finished jobs past their ttl along with their job directories
fn evict_expired_jobs(registry: &JobRegistry, data_dir: &Path, ttl: chrono::Duration) -> usize {
    let evicted = registry.evict_finished(ttl);
    for job_id in &evicted {
        if let Err(e) = storage::remove_job_dir(data_dir, job_id) {
            log::warn!("Failed to remove directory of job {}: {}", job_id, e);
        }
    }
    evicted.len()
}

/// Run one job to completion. Blocking; called on the blocking thread pool.
///
/// Scratch audio is removed whatever the outcome; the trace stays until the
/// job is evicted.
fn run_pipeline(ctx: &PipelineContext, job: &QueuedJob) -> PipelineResult<Analysis> {
    let job_dir = storage::job_dir(&ctx.data_dir, &job.id)?;
    let reporter = StageReporter {
        registry: &ctx.registry,
        trace: TraceWriter::new(job_dir.join("trace.jsonl")),
        job_id: job.id,
    };

    let result = run_stages(ctx, &job.request, &job_dir, &reporter);

    for scratch in [SOURCE_DIR, SEPARATED_DIR] {
        let dir = job_dir.join(scratch);
        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                log::warn!("Failed to clean {}: {}", dir.display(), e);
            }
        }
    }

    result
}

fn run_stages(
    ctx: &PipelineContext,
    request: &JobRequest,
    job_dir: &Path,
    reporter: &StageReporter<'_>,
) -> PipelineResult<Analysis> {
    if let Some(cached) = state::find_analysis(&ctx.db, &request.user_id, &request.source_id)? {
        reporter.finish(
            JobStatus::Done,
            "Reused stored analysis",
            json!({ "analysis_id": cached.id, "notes": cached.notes.len() }),
        );
        return Ok(cached);
    }

    reporter.enter(JobStatus::Downloading, "Fetching source");
    let fetched = ctx
        .fetcher
        .fetch(&request.source_id, &job_dir.join(SOURCE_DIR))?;
    reporter.finish(
        JobStatus::Downloading,
        "Fetched source",
        json!({ "path": fetched.display().to_string() }),
    );

    reporter.enter(JobStatus::Separating, "Isolating vocals");
    let vocals_path = ctx
        .isolator
        .isolate(&fetched, &job_dir.join(SEPARATED_DIR))?;
    reporter.finish(
        JobStatus::Separating,
        "Isolated vocals",
        json!({ "path": vocals_path.display().to_string() }),
    );

    reporter.enter(JobStatus::Analyzing, "Tracking pitch and segmenting notes");
    let vocals = std::fs::read(&vocals_path)?;
    let audio = ingest_wav(&vocals)?;
    let track = ctx.tracker.track(&audio.to_mono(), audio.sample_rate)?;
    let notes = segment_notes(&track, &ctx.segmentation)?;
    reporter.finish(
        JobStatus::Analyzing,
        "Segmented notes",
        json!({ "frames": track.len(), "notes": notes.len() }),
    );

    reporter.enter(JobStatus::Saving, "Storing analysis");
    let analysis = persist_analysis(ctx, request, track.len() as i64, notes, &vocals)?;
    reporter.finish(
        JobStatus::Saving,
        "Stored analysis",
        json!({ "analysis_id": analysis.id }),
    );

    Ok(analysis)
}

/// Store the vocal asset and its analysis row. A failed write leaves no asset
/// behind, and a replaced analysis takes its asset with it.
fn persist_analysis(
    ctx: &PipelineContext,
    request: &JobRequest,
    frame_count: i64,
    notes: Vec<Note>,
    vocals: &[u8],
) -> PipelineResult<Analysis> {
    let analysis_id = Uuid::new_v4();

    let stored = storage::store_file(&ctx.data_dir, &analysis_id, VOCALS_FILE_NAME, vocals)
        .map_err(PipelineError::from)
        .and_then(|(stored_path, sha256)| {
            state::save_analysis(
                &ctx.db,
                analysis_id,
                NewAnalysis {
                    user_id: request.user_id.clone(),
                    source_id: request.source_id.clone(),
                    title: request.display_title(),
                    vocals_path: stored_path.display().to_string(),
                    vocals_sha256: sha256,
                    frame_count,
                    notes,
                },
            )
            .map_err(PipelineError::from)
        });

    match stored {
        Ok((analysis, replaced)) => {
            if let Some(old_id) = replaced {
                log::info!("Analysis {} replaced {}", analysis.id, old_id);
                discard_analysis_files(&ctx.data_dir, &old_id);
            }
            Ok(analysis)
        }
        Err(e) => {
            discard_analysis_files(&ctx.data_dir, &analysis_id);
            Err(e)
        }
    }
}

fn discard_analysis_files(data_dir: &Path, analysis_id: &Uuid) {
    if let Err(e) = storage::remove_analysis_files(data_dir, analysis_id) {
        log::warn!("Failed to remove files of analysis {}: {}", analysis_id, e);
    }
}
