// Segmentation state machine
// Walks classified frames once, keeps at most one open segment, emits finalized notes

use crate::notes::cents::{cents_distance, Cents};
use crate::notes::classifier::{FrameClassifier, FrameDecision};
use crate::notes::envelope::estimate_envelope;
use crate::notes::finalizer::NoteFinalizer;
use crate::notes::types::{AnalysisError, FrameTrack, Note, SegmentationConfig, SilenceBreakEdge};

/// An open note candidate
#[derive(Debug, Clone)]
struct Segment {
    start: f64,
    end: f64,
    /// End of the last frame that contributed a pitch sample
    last_sample_end: f64,
    samples: Vec<f64>,
}

impl Segment {
    fn open(start: f64, end: f64, frequency: f64) -> Self {
        Segment {
            start,
            end,
            last_sample_end: end,
            samples: vec![frequency],
        }
    }

    fn mean_frequency(&self) -> f64 {
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

#[derive(Debug, Clone)]
enum State {
    Idle,
    Active(Segment),
}

/// What a single frame did to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No open segment and nothing to open
    Idle,
    /// Opened a segment
    Open,
    /// Extended the open segment with a pitch sample
    Extend,
    /// Closed the open segment on a pitch change and opened a new one
    Split,
    /// Extended the open segment's end without a pitch sample
    Bridge,
    /// Closed the open segment because the frame dropped below the silence threshold
    SilenceBreak,
}

/// Single-pass note segmenter
pub struct Segmenter {
    config: SegmentationConfig,
    frame_duration: f64,
    finalizer: NoteFinalizer,
    state: State,
    notes: Vec<Note>,
}

impl Segmenter {
    pub fn new(config: SegmentationConfig, frame_duration: f64) -> Self {
        let finalizer = NoteFinalizer::new(config.min_duration_sec);
        Segmenter {
            config,
            frame_duration,
            finalizer,
            state: State::Idle,
            notes: Vec::new(),
        }
    }

    /// Whether a segment is currently open
    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active(_))
    }

    /// Notes finalized so far
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Feed the next frame. Frames must arrive in index order.
    pub fn step(&mut self, frame: &FrameDecision) -> Transition {
        let frame_start = frame.index as f64 * self.frame_duration;
        let frame_end = (frame.index + 1) as f64 * self.frame_duration;

        let state = std::mem::replace(&mut self.state, State::Idle);

        let (next, transition) = match state {
            State::Idle => match frame.frequency {
                Some(frequency) if frame.is_active() && frame.is_loud => (
                    State::Active(Segment::open(frame_start, frame_end, frequency)),
                    Transition::Open,
                ),
                _ => (State::Idle, Transition::Idle),
            },
            State::Active(mut segment) => {
                if !frame.is_loud {
                    let end = match self.config.silence_break_edge {
                        SilenceBreakEdge::GapStart => frame_start,
                        SilenceBreakEdge::LastVoicedFrameEnd => segment.last_sample_end,
                    };
                    log::debug!("Silence break at frame {} ({:.3}s)", frame.index, frame_start);
                    self.close(segment.start, end, &segment.samples);
                    (State::Idle, Transition::SilenceBreak)
                } else {
                    match frame.frequency {
                        Some(frequency) if frame.is_active() => {
                            if self.breaks_on_pitch(&segment, frequency) {
                                log::debug!(
                                    "Pitch split at frame {}: {:.2} Hz -> {:.2} Hz",
                                    frame.index,
                                    segment.mean_frequency(),
                                    frequency
                                );
                                self.close(segment.start, segment.end, &segment.samples);
                                (
                                    State::Active(Segment::open(frame_start, frame_end, frequency)),
                                    Transition::Split,
                                )
                            } else {
                                segment.end = frame_end;
                                // Only usable estimates feed the note's frequency
                                if frequency.is_finite() && frequency > 0.0 {
                                    segment.last_sample_end = frame_end;
                                    segment.samples.push(frequency);
                                }
                                (State::Active(segment), Transition::Extend)
                            }
                        }
                        _ => {
                            segment.end = frame_end;
                            (State::Active(segment), Transition::Bridge)
                        }
                    }
                }
            }
        };

        self.state = next;
        transition
    }

    /// Close any open segment and return all notes in time order
    pub fn finish(mut self) -> Vec<Note> {
        if let State::Active(segment) = std::mem::replace(&mut self.state, State::Idle) {
            self.close(segment.start, segment.end, &segment.samples);
        }
        self.notes
    }

    fn breaks_on_pitch(&self, segment: &Segment, frequency: f64) -> bool {
        if self.config.merge_all_until_silence {
            return false;
        }

        match cents_distance(segment.mean_frequency(), frequency) {
            Cents::Defined(cents) => cents.abs() > self.config.cents_tolerance,
            // Cannot compare, keep the segment together
            Cents::Undefined => false,
        }
    }

    fn close(&mut self, start: f64, end: f64, samples: &[f64]) {
        if let Some(note) = self.finalizer.finalize(start, end, samples) {
            log::debug!(
                "Note {} {:.2} Hz {:.3}-{:.3}s",
                note.note_name,
                note.frequency,
                note.start,
                note.end
            );
            self.notes.push(note);
        }
    }
}

/// Segment a frame track into notes.
///
/// Rejects mismatched sequence lengths, a bad frame duration, or an invalid
/// config. Any well-shaped track succeeds; an empty or silent one yields no notes.
pub fn segment_notes(
    track: &FrameTrack,
    config: &SegmentationConfig,
) -> Result<Vec<Note>, AnalysisError> {
    track.validate()?;
    config.validate()?;

    let envelope = estimate_envelope(&track.energy, track.frame_duration, config);
    let classifier = FrameClassifier::new(track, &envelope, config);
    let mut segmenter = Segmenter::new(config.clone(), track.frame_duration);

    for decision in classifier.decisions() {
        segmenter.step(&decision);
    }

    let notes = segmenter.finish();
    log::debug!(
        "Segmented {} frames into {} notes (noise floor {:.5})",
        track.len(),
        notes.len(),
        envelope.noise_floor
    );

    Ok(notes)
}
