//! Bounded audio accumulation for a single in-progress utterance.
//!
//! `AudioBuffer` is the session-scoped counterpart to the process-wide SPSC
//! ring (`ringbuf::HeapRb`, still used upstream in `recorder` for the raw
//! capture callback). Once samples have crossed the resampler they land
//! here one [`Frame`] at a time, and `AudioBuffer` accounts for how much of
//! what it's holding was classified as speech so the session layer can make
//! flush/cap decisions without re-scanning raw samples.

pub mod chunk;

pub use chunk::AudioChunk;

use crate::error::{EngineError, Result};

/// A single span of mono PCM pushed into an [`AudioBuffer`], tagged with
/// whatever VAD decision the caller already made for it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub is_speech: bool,
}

impl Frame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, is_speech: bool) -> Self {
        Self {
            samples,
            sample_rate,
            is_speech,
        }
    }

    fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Accumulates frames for one in-progress utterance, bounded to
/// `max_duration_seconds` of audio.
///
/// Exclusive access: exactly one writer (`push`) and one reader
/// (`drain`/`take_chunk`) are expected to touch a given instance — there is
/// no internal locking, matching the session controller's single-owner
/// usage pattern.
pub struct AudioBuffer {
    sample_rate: u32,
    max_samples: usize,
    samples: Vec<f32>,
    speech_samples: usize,
    /// Running speech-ratio estimate for sessions where the VAD never
    /// produced an explicit score (see `DESIGN.md` OQ2) — recomputed from
    /// whichever frames *were* tagged, so it degrades to "all frames
    /// untagged => 0.0" rather than panicking.
    any_frame_tagged: bool,
}

impl AudioBuffer {
    /// `max_duration_seconds` bounds memory use; once full, `push` keeps the
    /// earliest-buffered audio and drops the tail of the incoming frame
    /// (see `DESIGN.md` OQ1).
    pub fn new(sample_rate: u32, max_duration_seconds: f32) -> Self {
        let max_samples = (sample_rate as f32 * max_duration_seconds).round() as usize;
        Self {
            sample_rate,
            max_samples,
            samples: Vec::with_capacity(max_samples.min(1 << 20)),
            speech_samples: 0,
            any_frame_tagged: false,
        }
    }

    /// Push a frame, returning `Err(EngineError::BufferFull)` if the buffer
    /// was already at capacity before this call (the incoming frame is
    /// still partially admitted up to the remaining headroom).
    pub fn push(&mut self, frame: Frame) -> Result<()> {
        if frame.sample_rate != self.sample_rate {
            return Err(EngineError::AudioStream(format!(
                "frame sample rate {} does not match buffer rate {}",
                frame.sample_rate, self.sample_rate
            )));
        }

        self.any_frame_tagged = true;
        let remaining = self.max_samples.saturating_sub(self.samples.len());
        if remaining == 0 {
            return Err(EngineError::BufferFull);
        }

        let take = frame.samples.len().min(remaining);
        if frame.is_speech {
            self.speech_samples += take;
        }
        self.samples.extend_from_slice(&frame.samples[..take]);

        if take < frame.samples.len() {
            return Err(EngineError::BufferFull);
        }
        Ok(())
    }

    pub fn len_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn duration_seconds(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.max_samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fraction of buffered samples tagged as speech by the VAD. `0.0` if no
    /// frame was ever pushed.
    pub fn speech_ratio(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.speech_samples as f32 / self.samples.len() as f32
    }

    pub fn has_speech_score(&self) -> bool {
        self.any_frame_tagged
    }

    /// Fraction of buffered samples whose amplitude clears a fixed energy
    /// floor. A fallback speech estimate for sessions where the VAD never
    /// tagged a single frame (see `has_speech_score`).
    pub fn energy_speech_ratio(&self) -> f32 {
        const ENERGY_THRESHOLD: f32 = 0.02;
        if self.samples.is_empty() {
            return 0.0;
        }
        let above = self.samples.iter().filter(|s| s.abs() > ENERGY_THRESHOLD).count();
        above as f32 / self.samples.len() as f32
    }

    /// Zero the speech-ratio accounting without discarding buffered
    /// samples. Used when a chunk boundary is reached but the recorder
    /// decides to keep accumulating rather than emit.
    pub fn reset_speech_accounting(&mut self) {
        self.speech_samples = 0;
        self.any_frame_tagged = false;
    }

    /// Remove and return all buffered samples, resetting the buffer to
    /// empty. Used by the session layer when it flushes a chunk.
    pub fn drain(&mut self) -> Vec<f32> {
        self.speech_samples = 0;
        self.any_frame_tagged = false;
        std::mem::take(&mut self.samples)
    }

    /// Drain and package as a WAV-encoded [`AudioChunk`] ready for upload.
    pub fn take_chunk(&mut self) -> AudioChunk {
        let speech_probability = self.speech_ratio();
        self.take_chunk_tagged(speech_probability)
    }

    /// Drain and package as a WAV-encoded [`AudioChunk`], tagging it with an
    /// explicitly supplied speech probability rather than recomputing one
    /// from the buffer's own accounting (used for the energy-ratio fallback
    /// on the final chunk of a stop).
    pub fn take_chunk_tagged(&mut self, speech_probability: f32) -> AudioChunk {
        let duration_seconds = self.duration_seconds();
        let samples = self.drain();
        AudioChunk::from_samples(samples, self.sample_rate, duration_seconds, speech_probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_accumulates_and_tracks_speech_ratio() {
        let mut buf = AudioBuffer::new(16_000, 1.0);
        buf.push(Frame::new(vec![0.1; 4_000], 16_000, true)).unwrap();
        buf.push(Frame::new(vec![0.0; 4_000], 16_000, false)).unwrap();
        assert_eq!(buf.len_samples(), 8_000);
        assert!((buf.speech_ratio() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn push_beyond_capacity_keeps_earliest_and_errors() {
        let mut buf = AudioBuffer::new(16_000, 0.5); // 8_000 samples max
        buf.push(Frame::new(vec![1.0; 6_000], 16_000, true)).unwrap();
        let err = buf.push(Frame::new(vec![2.0; 4_000], 16_000, true));
        assert!(matches!(err, Err(EngineError::BufferFull)));
        // Only 2_000 of the second frame's samples were admitted, and they
        // are the *earliest* 2_000 samples of that frame, appended after
        // the first frame's data — the incoming tail was dropped.
        assert_eq!(buf.len_samples(), 8_000);
        assert_eq!(buf.samples[6_000], 2.0);
        assert_eq!(buf.samples[7_999], 2.0);
    }

    #[test]
    fn drain_resets_speech_accounting() {
        let mut buf = AudioBuffer::new(16_000, 1.0);
        buf.push(Frame::new(vec![0.1; 1_000], 16_000, true)).unwrap();
        let samples = buf.drain();
        assert_eq!(samples.len(), 1_000);
        assert!(buf.is_empty());
        assert_eq!(buf.speech_ratio(), 0.0);
        assert!(!buf.has_speech_score());
    }

    #[test]
    fn take_chunk_packages_wav_bytes() {
        let mut buf = AudioBuffer::new(16_000, 1.0);
        buf.push(Frame::new(vec![0.25; 1_600], 16_000, true)).unwrap();
        let chunk = buf.take_chunk();
        assert!((chunk.speech_probability - 1.0).abs() < 1e-6);
        assert!((chunk.duration_seconds - 0.1).abs() < 1e-6);
        assert!(chunk.wav_bytes.len() > 44); // header + payload
    }
}
