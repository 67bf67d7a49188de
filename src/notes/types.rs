// Note segmentation types
// Frame-level input sequences, segmentation configuration, and finalized notes

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input shape problems, rejected before any frame reaches the segmenter
#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("Sequence length mismatch: {name} has {actual} frames, expected {expected}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Frame duration must be positive and finite, got {0}")]
    InvalidFrameDuration(f64),

    #[error("Sample rate must be positive")]
    InvalidSampleRate,

    #[error("Invalid segmentation config: {0}")]
    InvalidConfig(String),
}

/// Per-frame measurements produced by the pitch and energy extraction stage.
///
/// All four sequences are indexed by frame and must have the same length.
/// Frame `i` covers `[i * frame_duration, (i + 1) * frame_duration)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameTrack {
    /// Smoothed fundamental frequency in Hz, `None` when unvoiced
    pub frequencies: Vec<Option<f64>>,

    /// Raw voiced flag from the pitch tracker
    pub voiced: Vec<bool>,

    /// Voicing confidence [0.0, 1.0]
    pub voiced_probability: Vec<f64>,

    /// Frame energy magnitude (RMS)
    pub energy: Vec<f64>,

    /// Seconds per frame (hop length / sample rate)
    pub frame_duration: f64,
}

impl FrameTrack {
    /// Number of frames in the track
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Start time of frame `index` in seconds
    pub fn frame_start(&self, index: usize) -> f64 {
        index as f64 * self.frame_duration
    }

    /// End time of frame `index` in seconds
    pub fn frame_end(&self, index: usize) -> f64 {
        (index + 1) as f64 * self.frame_duration
    }

    /// Total covered duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 * self.frame_duration
    }

    /// Check that every sequence has one entry per frame and the frame duration is usable
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.frame_duration.is_finite() && self.frame_duration > 0.0) {
            return Err(AnalysisError::InvalidFrameDuration(self.frame_duration));
        }

        let expected = self.frequencies.len();
        let lengths = [
            ("voiced", self.voiced.len()),
            ("voiced_probability", self.voiced_probability.len()),
            ("energy", self.energy.len()),
        ];

        for (name, actual) in lengths {
            if actual != expected {
                return Err(AnalysisError::LengthMismatch {
                    name,
                    expected,
                    actual,
                });
            }
        }

        Ok(())
    }
}

/// Where a note ends when loudness drops below the silence threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilenceBreakEdge {
    /// Start of the first sub-threshold frame
    GapStart,

    /// End of the last frame that contributed a pitch sample,
    /// trailing bridged frames are excluded
    LastVoicedFrameEnd,
}

impl Default for SilenceBreakEdge {
    fn default() -> Self {
        SilenceBreakEdge::GapStart
    }
}

/// Configuration for the envelope, frame classifier and segmenter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Notes shorter than this (seconds) are dropped
    pub min_duration_sec: f64,

    /// Pitch distance from the running mean that splits a note, in cents
    /// Only consulted when `merge_all_until_silence` is false
    pub cents_tolerance: f64,

    /// Fraction of the phrase baseline below which a frame is silent
    pub silence_threshold_factor: f64,

    /// Ignore pitch changes and break only on silence
    pub merge_all_until_silence: bool,

    /// Minimum voiced probability (exclusive) for a frame to count as pitched
    pub confidence_threshold: f64,

    /// Sliding median window for the phrase baseline, in seconds
    pub phrase_window_sec: f64,

    /// Percentile [0, 100] of all frame energies used as the noise floor
    pub noise_floor_percentile: f64,

    /// Multiplier applied to the noise floor in the silence threshold
    pub noise_floor_margin: f64,

    /// Note end convention on a silence break
    pub silence_break_edge: SilenceBreakEdge,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        SegmentationConfig {
            min_duration_sec: 0.08,
            cents_tolerance: 35.0,
            silence_threshold_factor: 0.25,
            merge_all_until_silence: true,
            confidence_threshold: 0.55,
            phrase_window_sec: 1.5,
            noise_floor_percentile: 10.0,
            noise_floor_margin: 1.5,
            silence_break_edge: SilenceBreakEdge::GapStart,
        }
    }
}

impl SegmentationConfig {
    /// Finer-grained preset that splits notes on pitch changes
    pub fn melodic() -> Self {
        SegmentationConfig {
            merge_all_until_silence: false,
            ..SegmentationConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        let non_negative = [
            ("min_duration_sec", self.min_duration_sec),
            ("cents_tolerance", self.cents_tolerance),
            ("silence_threshold_factor", self.silence_threshold_factor),
            ("phrase_window_sec", self.phrase_window_sec),
            ("noise_floor_margin", self.noise_floor_margin),
        ];

        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(AnalysisError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if !(0.0..=100.0).contains(&self.noise_floor_percentile) {
            return Err(AnalysisError::InvalidConfig(format!(
                "noise_floor_percentile must be within [0, 100], got {}",
                self.noise_floor_percentile
            )));
        }

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(AnalysisError::InvalidConfig(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }

        Ok(())
    }
}

/// A finalized note event.
///
/// `frequency` is rounded to 2 decimals, times to 3 decimals,
/// and `duration == round(end - start, 3)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Onset in seconds
    pub start: f64,

    /// Offset in seconds
    pub end: f64,

    /// `end - start` in seconds
    pub duration: f64,

    /// Mean of the pitch samples collected while the note was open (Hz)
    pub frequency: f64,

    /// Nearest equal-tempered note, e.g. "A4"
    pub note_name: String,
}
