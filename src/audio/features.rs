// Pitch and energy extraction
// Frame-wise RMS energy and a YIN fundamental frequency tracker (FFT autocorrelation)
// producing the per-frame sequences the note segmenter consumes

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::notes::FrameTrack;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Invalid tracker config: {0}")]
    InvalidConfig(String),

    #[error("Sample rate must be positive")]
    InvalidSampleRate,

    #[error("FFT failed: {0}")]
    Fft(String),
}

/// Turns mono samples into per-frame pitch, voicing and energy sequences
pub trait PitchTracker: Send + Sync {
    fn track(&self, samples: &[f32], sample_rate: u32) -> Result<FrameTrack, TrackerError>;
}

/// Configuration for the YIN tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Analysis window in samples
    pub window_size: usize,

    /// Hop between frames in samples
    pub hop_size: usize,

    /// Lowest reportable fundamental (Hz), roughly C2
    pub fmin: f64,

    /// Highest reportable fundamental (Hz), roughly C6
    pub fmax: f64,

    /// YIN absolute threshold on the cumulative mean normalized difference
    pub yin_threshold: f64,

    /// Median smoothing over voiced runs, in frames (1 disables)
    pub smoothing_frames: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            window_size: 2048,
            hop_size: 512,
            fmin: 65.0,
            fmax: 1047.0,
            yin_threshold: 0.15,
            smoothing_frames: 5,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.hop_size == 0 {
            return Err(TrackerError::InvalidConfig("hop_size must be positive".to_string()));
        }
        if self.window_size < 4 {
            return Err(TrackerError::InvalidConfig(format!(
                "window_size too small: {}",
                self.window_size
            )));
        }
        if !(self.fmin > 0.0 && self.fmin < self.fmax) {
            return Err(TrackerError::InvalidConfig(format!(
                "need 0 < fmin < fmax, got {} and {}",
                self.fmin, self.fmax
            )));
        }
        Ok(())
    }
}

/// Pitch estimate for one frame
#[derive(Debug, Clone, Copy)]
struct YinEstimate {
    frequency: Option<f64>,
    probability: f64,
}

/// YIN fundamental frequency tracker.
///
/// The difference function is computed from an FFT cross-correlation, then
/// cumulative-mean normalized; the first dip below the absolute threshold is
/// refined with parabolic interpolation.
pub struct YinTracker {
    config: TrackerConfig,
}

impl YinTracker {
    pub fn new(config: TrackerConfig) -> Self {
        YinTracker { config }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

impl Default for YinTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl PitchTracker for YinTracker {
    fn track(&self, samples: &[f32], sample_rate: u32) -> Result<FrameTrack, TrackerError> {
        self.config.validate()?;
        if sample_rate == 0 {
            return Err(TrackerError::InvalidSampleRate);
        }

        let hop = self.config.hop_size;
        let window = self.config.window_size;
        let frame_duration = hop as f64 / sample_rate as f64;

        if samples.is_empty() {
            return Ok(FrameTrack {
                frame_duration,
                ..FrameTrack::default()
            });
        }

        let frame_count = 1 + samples.len() / hop;
        let mut yin = YinState::new(window);

        let mut frequencies = Vec::with_capacity(frame_count);
        let mut voiced = Vec::with_capacity(frame_count);
        let mut voiced_probability = Vec::with_capacity(frame_count);
        let mut energy = Vec::with_capacity(frame_count);
        let mut frame = vec![0.0f64; window];

        for index in 0..frame_count {
            fill_centered_frame(samples, index * hop, &mut frame);
            energy.push(frame_rms(&frame));

            let estimate = yin.estimate(&frame, sample_rate, &self.config)?;
            voiced.push(estimate.frequency.is_some());
            voiced_probability.push(estimate.probability);
            frequencies.push(estimate.frequency);
        }

        let frequencies = smooth_voiced_runs(&frequencies, self.config.smoothing_frames);

        log::debug!(
            "Tracked {} frames ({} voiced) at {:.4}s per frame",
            frame_count,
            voiced.iter().filter(|v| **v).count(),
            frame_duration
        );

        Ok(FrameTrack {
            frequencies,
            voiced,
            voiced_probability,
            energy,
            frame_duration,
        })
    }
}

/// Copy the window centred on `center` into `frame`, zero-padding past either end
fn fill_centered_frame(samples: &[f32], center: usize, frame: &mut [f64]) {
    let half = frame.len() / 2;
    for (offset, slot) in frame.iter_mut().enumerate() {
        *slot = (center + offset)
            .checked_sub(half)
            .and_then(|idx| samples.get(idx))
            .map(|&s| s as f64)
            .unwrap_or(0.0);
    }
}

/// Root mean square of a frame
pub fn frame_rms(frame: &[f64]) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|s| s * s).sum::<f64>() / frame.len() as f64).sqrt()
}

/// Reusable FFT plans and buffers for one window size
struct YinState {
    window: usize,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
    lag_input: Vec<f64>,
    full_input: Vec<f64>,
    lag_spectrum: Vec<Complex<f64>>,
    full_spectrum: Vec<Complex<f64>>,
    correlation: Vec<f64>,
    difference: Vec<f64>,
}

impl YinState {
    fn new(window: usize) -> Self {
        // Linear (not circular) correlation needs at least window + window / 2 points
        let fft_len = (2 * window).next_power_of_two();
        let mut planner = RealFftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(fft_len);
        let inverse = planner.plan_fft_inverse(fft_len);

        YinState {
            window,
            lag_input: forward.make_input_vec(),
            full_input: forward.make_input_vec(),
            lag_spectrum: forward.make_output_vec(),
            full_spectrum: forward.make_output_vec(),
            correlation: inverse.make_output_vec(),
            difference: vec![0.0; window / 2],
            forward,
            inverse,
        }
    }

    fn estimate(
        &mut self,
        frame: &[f64],
        sample_rate: u32,
        config: &TrackerConfig,
    ) -> Result<YinEstimate, TrackerError> {
        let half = self.window / 2;

        self.difference_function(frame)?;
        let cmnd = cumulative_mean_normalize(&self.difference);

        let sr = sample_rate as f64;
        let tau_min = ((sr / config.fmax).floor() as usize).max(2);
        let tau_max = ((sr / config.fmin).ceil() as usize).min(half.saturating_sub(2));

        if tau_min >= tau_max {
            return Ok(YinEstimate {
                frequency: None,
                probability: 0.0,
            });
        }

        let below = (tau_min..=tau_max).find(|&tau| cmnd[tau] < config.yin_threshold);

        let (tau, accepted) = match below {
            Some(mut tau) => {
                while tau < tau_max && cmnd[tau + 1] < cmnd[tau] {
                    tau += 1;
                }
                (tau, true)
            }
            None => {
                let tau = (tau_min..=tau_max)
                    .min_by(|a, b| cmnd[*a].total_cmp(&cmnd[*b]))
                    .unwrap_or(tau_min);
                (tau, false)
            }
        };

        let probability = (1.0 - cmnd[tau]).clamp(0.0, 1.0);
        if !accepted {
            return Ok(YinEstimate {
                frequency: None,
                probability,
            });
        }

        let refined = parabolic_interpolation(&cmnd, tau);
        let frequency = sr / refined;
        let in_range = frequency.is_finite() && frequency >= config.fmin && frequency <= config.fmax;

        Ok(YinEstimate {
            frequency: in_range.then_some(frequency),
            probability,
        })
    }

    /// d(tau) = sum_j (x_j - x_{j+tau})^2 over the first half window,
    /// expanded as energy terms minus twice the cross-correlation
    fn difference_function(&mut self, frame: &[f64]) -> Result<(), TrackerError> {
        let half = self.window / 2;
        let fft_len = self.lag_input.len() as f64;

        self.lag_input.iter_mut().for_each(|v| *v = 0.0);
        self.full_input.iter_mut().for_each(|v| *v = 0.0);
        self.lag_input[..half].copy_from_slice(&frame[..half]);
        self.full_input[..frame.len()].copy_from_slice(frame);

        self.forward
            .process(&mut self.lag_input, &mut self.lag_spectrum)
            .map_err(|e| TrackerError::Fft(e.to_string()))?;
        self.forward
            .process(&mut self.full_input, &mut self.full_spectrum)
            .map_err(|e| TrackerError::Fft(e.to_string()))?;

        for (lag, full) in self.lag_spectrum.iter_mut().zip(self.full_spectrum.iter()) {
            *lag = lag.conj() * full;
        }
        if let Some(first) = self.lag_spectrum.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = self.lag_spectrum.last_mut() {
            last.im = 0.0;
        }

        self.inverse
            .process(&mut self.lag_spectrum, &mut self.correlation)
            .map_err(|e| TrackerError::Fft(e.to_string()))?;

        // Energy of the sliding half-window starting at tau, via prefix sums
        let mut prefix = Vec::with_capacity(frame.len() + 1);
        prefix.push(0.0);
        for &x in frame {
            let last = prefix[prefix.len() - 1];
            prefix.push(last + x * x);
        }
        let energy_at = |tau: usize| prefix[tau + half] - prefix[tau];

        let e0 = energy_at(0);
        for tau in 0..half {
            let r = self.correlation[tau] / fft_len;
            self.difference[tau] = (e0 + energy_at(tau) - 2.0 * r).max(0.0);
        }

        Ok(())
    }
}

/// d'(0) = 1, d'(tau) = d(tau) * tau / sum_{j=1..tau} d(j)
fn cumulative_mean_normalize(difference: &[f64]) -> Vec<f64> {
    let mut cmnd = vec![1.0; difference.len()];
    let mut running = 0.0;

    for tau in 1..difference.len() {
        running += difference[tau];
        cmnd[tau] = if running > 0.0 {
            difference[tau] * tau as f64 / running
        } else {
            1.0
        };
    }

    cmnd
}

/// Sub-sample minimum position around `tau`
fn parabolic_interpolation(values: &[f64], tau: usize) -> f64 {
    if tau == 0 || tau + 1 >= values.len() {
        return tau as f64;
    }

    let (a, b, c) = (values[tau - 1], values[tau], values[tau + 1]);
    let denominator = a - 2.0 * b + c;
    if denominator.abs() < f64::EPSILON {
        return tau as f64;
    }

    tau as f64 + 0.5 * (a - c) / denominator
}

/// Median filter applied within each run of voiced frames; unvoiced frames stay unvoiced
pub fn smooth_voiced_runs(frequencies: &[Option<f64>], kernel: usize) -> Vec<Option<f64>> {
    if kernel <= 1 {
        return frequencies.to_vec();
    }

    let half = kernel / 2;
    let mut smoothed = frequencies.to_vec();
    let mut index = 0;

    while index < frequencies.len() {
        if frequencies[index].is_none() {
            index += 1;
            continue;
        }

        let run_start = index;
        while index < frequencies.len() && frequencies[index].is_some() {
            index += 1;
        }
        let run: Vec<f64> = frequencies[run_start..index].iter().flatten().copied().collect();

        for (offset, slot) in smoothed[run_start..index].iter_mut().enumerate() {
            let lo = offset.saturating_sub(half);
            let hi = (offset + half + 1).min(run.len());
            let mut window = run[lo..hi].to_vec();
            window.sort_by(|a, b| a.total_cmp(b));
            *slot = Some(window[window.len() / 2]);
        }
    }

    smoothed
}
