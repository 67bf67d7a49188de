// Frame classifier
// Decides per frame whether it is loud, pitched, and confidently pitched

use crate::notes::envelope::Envelope;
use crate::notes::types::{FrameTrack, SegmentationConfig};

/// Classification of a single frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameDecision {
    /// Frame index in the track
    pub index: usize,

    /// Usable frequency (finite and positive), `None` when unvoiced
    pub frequency: Option<f64>,

    /// Energy at or above the local silence threshold
    pub is_loud: bool,

    /// A usable frequency estimate exists
    pub is_pitched: bool,

    /// Voiced probability strictly above the confidence threshold
    pub is_confident: bool,
}

impl FrameDecision {
    /// Pitched and confident. Loudness is kept separate: a loud but
    /// unpitched frame bridges a note instead of ending it.
    pub fn is_active(&self) -> bool {
        self.is_pitched && self.is_confident
    }
}

/// Classifies frames of one track against its envelope
pub struct FrameClassifier<'a> {
    track: &'a FrameTrack,
    envelope: &'a Envelope,
    config: &'a SegmentationConfig,
}

impl<'a> FrameClassifier<'a> {
    pub fn new(
        track: &'a FrameTrack,
        envelope: &'a Envelope,
        config: &'a SegmentationConfig,
    ) -> Self {
        FrameClassifier {
            track,
            envelope,
            config,
        }
    }

    /// Classify frame `index`. Entries missing from a short sequence read as
    /// silent, unvoiced and unconfident.
    pub fn classify(&self, index: usize) -> FrameDecision {
        let energy = self.track.energy.get(index).copied().unwrap_or(0.0);
        let threshold = self.envelope.local_threshold(index, self.config);

        // Digital silence never counts as loud, even when the threshold collapses to zero
        let is_loud = energy.is_finite() && energy > 0.0 && energy >= threshold;

        let frequency = self
            .track
            .frequencies
            .get(index)
            .copied()
            .flatten()
            .filter(|f| f.is_finite() && *f > 0.0);
        let is_confident = self
            .track
            .voiced_probability
            .get(index)
            .is_some_and(|p| *p > self.config.confidence_threshold);

        FrameDecision {
            index,
            frequency,
            is_loud,
            is_pitched: frequency.is_some(),
            is_confident,
        }
    }

    /// Decisions for every frame, in order
    pub fn decisions(&self) -> impl Iterator<Item = FrameDecision> + '_ {
        (0..self.track.len()).map(move |i| self.classify(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (FrameTrack, Envelope, SegmentationConfig) {
        let track = FrameTrack {
            frequencies: vec![Some(440.0), None, Some(440.0), Some(-5.0), Some(440.0)],
            voiced: vec![true, false, true, true, true],
            voiced_probability: vec![0.9, 0.1, 0.55, 0.9, 0.9],
            energy: vec![1.0, 1.0, 1.0, 1.0, 0.0],
            frame_duration: 0.01,
        };
        let envelope = Envelope {
            baseline: vec![1.0; 5],
            noise_floor: 0.0,
        };
        (track, envelope, SegmentationConfig::default())
    }

    #[test]
    fn test_active_frame() {
        let (track, envelope, config) = setup();
        let classifier = FrameClassifier::new(&track, &envelope, &config);

        let d = classifier.classify(0);
        assert!(d.is_loud);
        assert!(d.is_active());
        assert_eq!(d.frequency, Some(440.0));
    }

    #[test]
    fn test_unvoiced_but_loud() {
        let (track, envelope, config) = setup();
        let classifier = FrameClassifier::new(&track, &envelope, &config);

        let d = classifier.classify(1);
        assert!(d.is_loud);
        assert!(!d.is_pitched);
        assert!(!d.is_active());
    }

    #[test]
    fn test_confidence_is_strict() {
        let (track, envelope, config) = setup();
        let classifier = FrameClassifier::new(&track, &envelope, &config);

        // 0.55 is not above the 0.55 threshold
        let d = classifier.classify(2);
        assert!(d.is_pitched);
        assert!(!d.is_confident);
        assert!(!d.is_active());
    }

    #[test]
    fn test_negative_frequency_is_unpitched() {
        let (track, envelope, config) = setup();
        let classifier = FrameClassifier::new(&track, &envelope, &config);

        let d = classifier.classify(3);
        assert_eq!(d.frequency, None);
        assert!(!d.is_pitched);
    }

    #[test]
    fn test_zero_energy_is_never_loud() {
        let (track, _, config) = setup();
        let envelope = Envelope {
            baseline: vec![0.0; 5],
            noise_floor: 0.0,
        };
        let classifier = FrameClassifier::new(&track, &envelope, &config);

        assert!(!classifier.classify(4).is_loud);
        assert!(classifier.classify(0).is_loud);
    }

    #[test]
    fn test_ragged_track_does_not_panic() {
        let (mut track, envelope, config) = setup();
        track.energy.truncate(2);
        track.voiced_probability.truncate(3);
        let classifier = FrameClassifier::new(&track, &envelope, &config);

        let d = classifier.classify(4);
        assert!(!d.is_loud);
        assert!(!d.is_confident);
        assert_eq!(d.frequency, Some(440.0));

        let past_end = classifier.classify(10);
        assert!(!past_end.is_pitched);
        assert!(!past_end.is_active());
    }

    #[test]
    fn test_decisions_cover_track() {
        let (track, envelope, config) = setup();
        let classifier = FrameClassifier::new(&track, &envelope, &config);

        let decisions: Vec<_> = classifier.decisions().collect();
        assert_eq!(decisions.len(), 5);
        assert!(decisions.iter().enumerate().all(|(i, d)| d.index == i));
    }
}
