// Audio ingestion module
// Decodes WAV recordings into normalized f32 samples and writes mono WAV back out

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to read WAV file: {0}")]
    WavReadError(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid audio data: {0}")]
    InvalidData(String),
}

#[derive(Debug, Clone)]
pub struct AudioData {
    /// Interleaved samples normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of interleaved channels
    pub channels: u16,

    /// Bit depth of the source file
    pub bit_depth: u16,

    /// Samples per channel
    pub frame_count: usize,
}

impl AudioData {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count as f64 / self.sample_rate as f64
    }

    /// Average all channels down to one
    pub fn to_mono(&self) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        if channels == 1 {
            return self.samples.clone();
        }

        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Decode a WAV file held in memory
pub fn ingest_wav(data: &[u8]) -> Result<AudioData, AudioError> {
    let mut reader = WavReader::new(Cursor::new(data))?;

    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(AudioError::InvalidData("sample rate is zero".to_string()));
    }
    if spec.channels == 0 {
        return Err(AudioError::InvalidData("no channels".to_string()));
    }

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect::<Result<_, _>>()?,
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<_, _>>()?,
        (format, bits) => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} {}-bit audio",
                format, bits
            )));
        }
    };

    let frame_count = samples.len() / spec.channels as usize;

    Ok(AudioData {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bit_depth: spec.bits_per_sample,
        frame_count,
    })
}

/// Decode a WAV file from disk
pub fn ingest_wav_file(path: &Path) -> Result<AudioData, AudioError> {
    let data = std::fs::read(path)?;
    ingest_wav(&data)
}

/// Encode mono f32 samples as 16-bit PCM WAV bytes
pub fn encode_wav_mono(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_mono_averages_channels() {
        let audio = AudioData {
            samples: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
            sample_rate: 44100,
            channels: 2,
            bit_depth: 16,
            frame_count: 3,
        };

        let mono = audio.to_mono();
        assert_eq!(mono.len(), 3);
        assert!((mono[0] - 0.15).abs() < 1e-6);
        assert!((mono[2] - 0.55).abs() < 1e-6);
    }

    #[test]
    fn test_wav_round_trip_preserves_shape() {
        let samples: Vec<f32> = (0..1600).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let bytes = encode_wav_mono(&samples, 16000).unwrap();

        let audio = ingest_wav(&bytes).unwrap();
        assert_eq!(audio.sample_rate, 16000);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.frame_count, 1600);
        assert!((audio.duration_secs() - 0.1).abs() < 1e-9);
        assert!((audio.samples[100] - samples[100]).abs() < 1e-3);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            ingest_wav(b"definitely not a wav file"),
            Err(AudioError::WavReadError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = ingest_wav_file(Path::new("/nonexistent/vocals.wav"));
        assert!(matches!(result, Err(AudioError::Io(_))));
    }
}
