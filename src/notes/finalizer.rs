// Note finalizer
// Turns a closed segment into a rounded, named note or drops it as too short

use crate::notes::types::Note;

/// Pitch class names, C-based, sharps only
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Reference pitch for 12-TET naming
const A4_HZ: f64 = 440.0;
const A4_MIDI: f64 = 69.0;

/// Nearest MIDI note number for a frequency, `None` for unusable input
pub fn midi_from_frequency(frequency: f64) -> Option<i32> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }

    Some((A4_MIDI + 12.0 * (frequency / A4_HZ).log2()).round() as i32)
}

/// Note name with octave for a MIDI number, e.g. 69 -> "A4", 60 -> "C4"
pub fn midi_to_name(midi: i32) -> String {
    let pitch_class = midi.rem_euclid(12) as usize;
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", NOTE_NAMES[pitch_class], octave)
}

/// Nearest equal-tempered note name for a frequency
pub fn note_name(frequency: f64) -> Option<String> {
    midi_from_frequency(frequency).map(midi_to_name)
}

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Converts closed segments into notes
#[derive(Debug, Clone)]
pub struct NoteFinalizer {
    min_duration_sec: f64,
}

impl NoteFinalizer {
    pub fn new(min_duration_sec: f64) -> Self {
        NoteFinalizer { min_duration_sec }
    }

    /// Build a note from a segment's span and pitch samples.
    ///
    /// Returns `None` when the rounded duration is below the minimum, the span
    /// is empty after rounding, or there is no usable pitch sample.
    pub fn finalize(&self, start: f64, end: f64, samples: &[f64]) -> Option<Note> {
        if samples.is_empty() {
            return None;
        }

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let note_name = note_name(mean)?;

        let start = round_to(start, 3);
        let end = round_to(end, 3);
        let duration = round_to(end - start, 3);

        if end <= start || duration < self.min_duration_sec {
            log::debug!(
                "Dropping segment {:.3}-{:.3}s ({:.3}s < {:.3}s)",
                start,
                end,
                duration,
                self.min_duration_sec
            );
            return None;
        }

        Some(Note {
            start,
            end,
            duration,
            frequency: round_to(mean, 2),
            note_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_names() {
        assert_eq!(note_name(440.0).as_deref(), Some("A4"));
        assert_eq!(note_name(261.63).as_deref(), Some("C4"));
        assert_eq!(note_name(220.0).as_deref(), Some("A3"));
        assert_eq!(note_name(466.16).as_deref(), Some("A#4"));
        // Slightly flat still rounds to the nearest semitone
        assert_eq!(note_name(435.0).as_deref(), Some("A4"));
        assert_eq!(note_name(0.0), None);
    }

    #[test]
    fn test_midi_to_name_low_octaves() {
        assert_eq!(midi_to_name(0), "C-1");
        assert_eq!(midi_to_name(-1), "B-2");
        assert_eq!(midi_to_name(127), "G9");
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(440.12345, 2), 440.12);
        assert_eq!(round_to(0.12345, 3), 0.123);
    }

    #[test]
    fn test_finalize_mean_and_rounding() {
        let finalizer = NoteFinalizer::new(0.08);
        let note = finalizer
            .finalize(0.10001, 0.3004, &[440.0, 442.0, 444.0])
            .unwrap();

        assert_eq!(note.start, 0.1);
        assert_eq!(note.end, 0.3);
        assert_eq!(note.duration, 0.2);
        assert_eq!(note.frequency, 442.0);
        assert_eq!(note.note_name, "A4");
    }

    #[test]
    fn test_finalize_drops_short_segment() {
        let finalizer = NoteFinalizer::new(0.08);
        assert!(finalizer.finalize(0.0, 0.05, &[440.0]).is_none());
        assert!(finalizer.finalize(0.0, 0.08, &[440.0]).is_some());
    }

    #[test]
    fn test_finalize_without_samples() {
        let finalizer = NoteFinalizer::new(0.0);
        assert!(finalizer.finalize(0.0, 1.0, &[]).is_none());
    }

    #[test]
    fn test_finalize_zero_span_dropped_even_without_minimum() {
        let finalizer = NoteFinalizer::new(0.0);
        assert!(finalizer.finalize(0.5, 0.5002, &[440.0]).is_none());
    }
}
