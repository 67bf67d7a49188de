// Analysis pipeline module
// Job tracking, worker pool, external collaborators and progress traces

pub mod collaborators;
pub mod jobs;
pub mod trace;
pub mod worker;

pub use collaborators::{
    CollaboratorError, CommandIsolator, LocalFileFetcher, PassthroughIsolator, SourceFetcher,
    VocalIsolator,
};
pub use jobs::{JobError, JobProgress, JobRecord, JobRegistry, JobResult, JobStatus};
pub use trace::{read_trace_file, TraceBuilder, TraceEntry, TraceError, TraceWriter};
pub use worker::{JobRequest, PipelineContext, PipelineError, WorkerPool};
