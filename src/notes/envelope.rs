// Loudness envelope estimation
// Slow phrase baseline (sliding median) plus a global noise floor (low percentile)

use crate::notes::types::SegmentationConfig;

/// Phrase baseline per frame and one noise floor for the whole recording
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Sliding median of frame energy, same length as the input
    pub baseline: Vec<f64>,

    /// Percentile of all frame energies
    pub noise_floor: f64,
}

impl Envelope {
    /// Energy level below which frame `index` counts as silence:
    /// `max(baseline * silence_factor, noise_floor * margin)`
    pub fn local_threshold(&self, index: usize, config: &SegmentationConfig) -> f64 {
        let phrase = self.baseline.get(index).copied().unwrap_or(0.0);
        let phrase_term = phrase * config.silence_threshold_factor;
        let floor_term = self.noise_floor * config.noise_floor_margin;
        phrase_term.max(floor_term)
    }
}

/// Median kernel length in frames for a window in seconds, always odd and at least 1
pub fn median_kernel_frames(window_sec: f64, frame_duration: f64) -> usize {
    if frame_duration <= 0.0 || !frame_duration.is_finite() || !window_sec.is_finite() {
        return 1;
    }

    let frames = (window_sec / frame_duration).round().max(1.0) as usize;
    frames | 1
}

/// Sliding median with zero padding at both edges.
///
/// Frames near the start and end of the recording see the padding, so short
/// recordings get a low baseline and fall back on the noise floor.
pub fn median_filter(values: &[f64], kernel: usize) -> Vec<f64> {
    let kernel = kernel.max(1) | 1;
    let half = kernel / 2;

    // Every window covers the whole input and padding fills more than half of it
    if half >= values.len() {
        return vec![0.0; values.len()];
    }

    let mut window = Vec::with_capacity(kernel);

    (0..values.len())
        .map(|center| {
            window.clear();
            for offset in 0..kernel {
                let value = (center + offset)
                    .checked_sub(half)
                    .and_then(|idx| values.get(idx))
                    .copied()
                    .unwrap_or(0.0);
                window.push(value);
            }
            window.sort_by(|a, b| a.total_cmp(b));
            window[half]
        })
        .collect()
}

/// Percentile with linear interpolation between closest ranks.
/// Returns 0.0 for an empty input.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Derive the envelope from frame energies
pub fn estimate_envelope(
    energy: &[f64],
    frame_duration: f64,
    config: &SegmentationConfig,
) -> Envelope {
    let kernel = median_kernel_frames(config.phrase_window_sec, frame_duration);

    Envelope {
        baseline: median_filter(energy, kernel),
        noise_floor: percentile(energy, config.noise_floor_percentile),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_is_odd() {
        assert_eq!(median_kernel_frames(1.5, 0.01), 151);
        assert_eq!(median_kernel_frames(0.05, 0.01), 5);
        assert_eq!(median_kernel_frames(0.0, 0.01), 1);
        assert_eq!(median_kernel_frames(1.5, 0.0), 1);
    }

    #[test]
    fn test_median_filter_removes_transient() {
        let energy = vec![1.0, 1.0, 0.0, 1.0, 1.0];
        let smoothed = median_filter(&energy, 3);
        assert_eq!(smoothed, vec![1.0; 5]);
    }

    #[test]
    fn test_median_filter_zero_padding() {
        let energy = vec![4.0, 4.0, 4.0];
        // Edge windows hold two padded zeros, still a minority
        let smoothed = median_filter(&energy, 5);
        assert_eq!(smoothed, vec![4.0, 4.0, 4.0]);

        let smoothed = median_filter(&[4.0], 5);
        assert_eq!(smoothed, vec![0.0]);
    }

    #[test]
    fn test_median_filter_kernel_wider_than_input() {
        assert_eq!(median_filter(&[4.0, -1.0, 9.0], usize::MAX), vec![0.0; 3]);
        assert_eq!(median_filter(&[4.0, 4.0, 4.0], 7), vec![0.0; 3]);
        assert_eq!(median_kernel_frames(1e300, 0.01) % 2, 1);
    }

    #[test]
    fn test_median_filter_empty() {
        assert!(median_filter(&[], 151).is_empty());
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert!((percentile(&values, 10.0) - 1.4).abs() < 1e-12);
        assert_eq!(percentile(&[], 10.0), 0.0);
    }

    #[test]
    fn test_local_threshold_takes_max() {
        let config = SegmentationConfig::default();
        let envelope = Envelope {
            baseline: vec![1.0, 0.0],
            noise_floor: 0.1,
        };

        // Phrase term binds while singing
        assert!((envelope.local_threshold(0, &config) - 0.25).abs() < 1e-12);
        // Floor term binds once the baseline decays
        assert!((envelope.local_threshold(1, &config) - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_envelope_lengths() {
        let energy = vec![0.5; 400];
        let envelope = estimate_envelope(&energy, 0.01, &SegmentationConfig::default());
        assert_eq!(envelope.baseline.len(), 400);
        assert_eq!(envelope.baseline[200], 0.5);
        assert_eq!(envelope.noise_floor, 0.5);
    }
}
