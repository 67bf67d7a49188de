// In-process API
// Request/response commands over the segmentation core, the job pool and stored analyses
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::audio::{self, PitchTracker, TrackerConfig, YinTracker};
use crate::config::AppConfig;
use crate::notes::{self, FrameTrack, Note, SegmentationConfig};
use crate::pipeline::{
    CommandIsolator, JobError, JobRecord, JobRequest, LocalFileFetcher, PassthroughIsolator,
    PipelineContext, VocalIsolator, WorkerPool,
};
use crate::state::{self, Analysis, AnalysisSummary, DbConnection};

#[derive(Debug, Serialize)]
pub struct CommandError {
    message: String,
}

impl CommandError {
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl<E: std::fmt::Display> From<E> for CommandError {
    fn from(error: E) -> Self {
        CommandError {
            message: error.to_string(),
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Shared state behind the job-backed commands
pub struct AppState {
    pub db: DbConnection,
    pub pool: WorkerPool,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open storage and start the worker pool. Needs a tokio runtime.
    pub fn start(config: &AppConfig) -> CommandResult<Self> {
        config.validate()?;
        let data_dir = config.resolve_data_dir()?;
        let db = state::init_db(&data_dir)?;

        let isolator: Arc<dyn VocalIsolator> = match config
            .isolation_command
            .as_deref()
            .and_then(CommandIsolator::from_command_line)
        {
            Some(command) => Arc::new(command),
            None => Arc::new(PassthroughIsolator),
        };

        let ctx = PipelineContext {
            db: db.clone(),
            registry: Default::default(),
            fetcher: Arc::new(LocalFileFetcher),
            isolator,
            tracker: Arc::new(YinTracker::new(config.tracker.clone())),
            segmentation: config.segmentation.clone(),
            data_dir: data_dir.clone(),
            completed_job_ttl: Duration::from_secs(config.completed_job_ttl_secs),
        };
        let pool = WorkerPool::start(config.workers, config.queue_capacity, ctx);

        Ok(Self { db, pool, data_dir })
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}

// ==================== SEGMENTATION COMMANDS ====================

#[derive(Debug, Deserialize)]
pub struct SegmentFramesInput {
    #[serde(flatten)]
    pub track: FrameTrack,
    #[serde(default)]
    pub config: Option<SegmentationConfig>,
}

/// Segment caller-provided per-frame sequences
pub fn segment_frames(input: SegmentFramesInput) -> CommandResult<Vec<Note>> {
    let config = input.config.unwrap_or_default();
    let notes = notes::segment_notes(&input.track, &config)?;
    Ok(notes)
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeWavInput {
    pub data: Vec<u8>,
    #[serde(default)]
    pub segmentation: Option<SegmentationConfig>,
    #[serde(default)]
    pub tracker: Option<TrackerConfig>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeWavOutput {
    pub notes: Vec<Note>,
    pub frame_count: usize,
    pub frame_duration: f64,
    pub duration_secs: f64,
}

/// Decode, track and segment a WAV recording synchronously
pub fn analyze_wav(input: AnalyzeWavInput) -> CommandResult<AnalyzeWavOutput> {
    let audio_data = audio::ingest_wav(&input.data)?;
    log::info!(
        "Analyzing {:.2}s of audio: {} Hz, {} channels, {} bit",
        audio_data.duration_secs(),
        audio_data.sample_rate,
        audio_data.channels,
        audio_data.bit_depth
    );

    let tracker = YinTracker::new(input.tracker.unwrap_or_default());
    let track = tracker.track(&audio_data.to_mono(), audio_data.sample_rate)?;
    let notes = notes::segment_notes(&track, &input.segmentation.unwrap_or_default())?;

    Ok(AnalyzeWavOutput {
        notes,
        frame_count: track.len(),
        frame_duration: track.frame_duration,
        duration_secs: audio_data.duration_secs(),
    })
}

// ==================== JOB COMMANDS ====================

#[derive(Debug, Deserialize)]
pub struct SubmitAnalysisInput {
    pub user_id: String,
    pub source_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

pub fn submit_analysis(app: &AppState, input: SubmitAnalysisInput) -> CommandResult<JobRecord> {
    let mut request = JobRequest::new(input.user_id, input.source_id);
    if let Some(title) = input.title {
        request = request.with_title(title);
    }
    Ok(app.pool.submit(request)?)
}

pub fn get_job(app: &AppState, job_id: Uuid) -> CommandResult<JobRecord> {
    app.pool
        .registry()
        .get(&job_id)
        .ok_or_else(|| JobError::NotFound(job_id).into())
}

/// Wait until a job reaches `done` or `error`
pub async fn wait_for_job(app: &AppState, job_id: Uuid) -> CommandResult<JobRecord> {
    let registry = app.pool.registry();
    let mut progress = registry.subscribe();

    loop {
        let record = registry.get(&job_id).ok_or(JobError::NotFound(job_id))?;
        if record.status.is_terminal() {
            return Ok(record);
        }

        match progress.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return Err(JobError::ShutDown.into()),
        }
    }
}

// ==================== ANALYSIS COMMANDS ====================

/// Fetch one of the user's stored analyses
pub fn get_analysis(app: &AppState, user_id: &str, analysis_id: Uuid) -> CommandResult<Analysis> {
    match state::get_analysis(&app.db, &analysis_id)? {
        Some(analysis) if analysis.user_id == user_id => Ok(analysis),
        _ => Err(CommandError::from(format!(
            "Analysis not found: {}",
            analysis_id
        ))),
    }
}

pub fn list_analyses(app: &AppState, user_id: &str) -> CommandResult<Vec<AnalysisSummary>> {
    Ok(state::list_analyses_for_user(&app.db, user_id)?)
}

/// Delete a stored analysis and its vocal asset; returns whether it existed
pub fn delete_analysis(app: &AppState, user_id: &str, analysis_id: Uuid) -> CommandResult<bool> {
    match state::get_analysis(&app.db, &analysis_id)? {
        Some(analysis) if analysis.user_id == user_id => {
            let deleted = state::delete_analysis(&app.db, &analysis_id)?;
            state::storage::remove_analysis_files(&app.data_dir, &analysis_id)?;
            log::info!("Deleted analysis {}", analysis_id);
            Ok(deleted)
        }
        _ => Ok(false),
    }
}
