// Note segmentation module
// Envelope estimation, frame classification, segmentation, and note finalization

pub mod cents;
pub mod classifier;
pub mod envelope;
pub mod finalizer;
pub mod segmenter;
pub mod types;

pub use cents::{cents_distance, Cents};
pub use classifier::{FrameClassifier, FrameDecision};
pub use envelope::{estimate_envelope, Envelope};
pub use finalizer::{note_name, NoteFinalizer};
pub use segmenter::{segment_notes, Segmenter, Transition};
pub use types::{AnalysisError, FrameTrack, Note, SegmentationConfig, SilenceBreakEdge};
