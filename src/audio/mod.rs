// Audio processing module
// WAV ingestion and per-frame pitch/energy extraction

pub mod features;
pub mod ingest;

pub use features::{PitchTracker, TrackerConfig, TrackerError, YinTracker};
pub use ingest::{encode_wav_mono, ingest_wav, ingest_wav_file, AudioData, AudioError};
