// Vocal Notes - segments isolated vocal recordings into note events
// Module declarations and CLI entry point

use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod audio;
pub mod commands;
pub mod config;
pub mod notes;
pub mod pipeline;
pub mod state;

use commands::{AppState, CommandError, SubmitAnalysisInput};
use config::{AppConfig, ConfigError};
use pipeline::JobStatus;

const CONFIG_ENV: &str = "VOCAL_NOTES_CONFIG";
const USER_ENV: &str = "VOCAL_NOTES_USER";
const DEFAULT_USER: &str = "local";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Usage: vocal-notes <recording.wav>...")]
    Usage,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Command(String),

    #[error("{0} of {1} recordings failed")]
    JobsFailed(usize, usize),

    #[error("Failed to write output: {0}")]
    Output(#[from] serde_json::Error),
}

impl From<CommandError> for AppError {
    fn from(error: CommandError) -> Self {
        AppError::Command(error.message().to_string())
    }
}

/// Analyze every WAV path in `args` through the worker pool and print the
/// results as JSON on stdout.
pub async fn run(args: Vec<String>) -> Result<(), AppError> {
    if args.is_empty() {
        return Err(AppError::Usage);
    }

    let config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => AppConfig::load(Path::new(&path))?,
        None => AppConfig::default(),
    };
    let user_id = std::env::var(USER_ENV).unwrap_or_else(|_| DEFAULT_USER.to_string());

    let app = AppState::start(&config)?;
    log::info!("Vocal Notes initialized (data in {})", app.data_dir.display());

    let mut submitted = Vec::with_capacity(args.len());
    for arg in &args {
        // Canonical paths keep the (user, source) cache key stable
        let source = std::fs::canonicalize(arg).unwrap_or_else(|_| PathBuf::from(arg));
        let job = commands::submit_analysis(
            &app,
            SubmitAnalysisInput {
                user_id: user_id.clone(),
                source_id: source.to_string_lossy().into_owned(),
                title: None,
            },
        );
        submitted.push((arg.clone(), job));
    }

    let mut results = Vec::with_capacity(submitted.len());
    let mut failures = 0;
    for (source, job) in submitted {
        let outcome = match job {
            Ok(job) => commands::wait_for_job(&app, job.id).await,
            Err(e) => Err(e),
        };

        let result = match outcome {
            Ok(record) if record.status == JobStatus::Done => serde_json::json!({
                "source": source,
                "status": record.status,
                "analysis_id": record.analysis_id,
                "notes": record.notes.unwrap_or_default(),
            }),
            Ok(record) => {
                failures += 1;
                serde_json::json!({
                    "source": source,
                    "status": record.status,
                    "error": record.error,
                })
            }
            Err(e) => {
                failures += 1;
                serde_json::json!({
                    "source": source,
                    "status": JobStatus::Error,
                    "error": e.message(),
                })
            }
        };
        results.push(result);
    }

    app.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&results)?);

    if failures > 0 {
        return Err(AppError::JobsFailed(failures, results.len()));
    }
    Ok(())
}
