//! Raw mono PCM passed between capture, resampling, and VAD.

/// A contiguous block of mono PCM samples at a known sample rate.
///
/// Distinct from [`crate::buffering::AudioChunk`], which is the encoded WAV
/// unit handed to a transcription provider — `SampleBlock` is the
/// unencoded, pre-buffering representation used inside the capture pipeline.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    /// Mono f32 samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
}

impl SampleBlock {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this block in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Returns true if the block contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
