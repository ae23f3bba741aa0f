//! The WAV-encoded unit handed from `AudioBuffer`/`StreamingRecorder` to a
//! transcription provider.

use std::io::Cursor;

/// A finished span of audio ready for transcription: WAV-encoded PCM16
/// bytes plus the metadata the queue and provider need.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// A complete little-endian PCM16 WAV file, header included.
    pub wav_bytes: Vec<u8>,
    pub duration_seconds: f32,
    /// Fraction of this chunk's samples the VAD classified as speech.
    pub speech_probability: f32,
}

impl AudioChunk {
    pub fn from_samples(
        samples: Vec<f32>,
        sample_rate: u32,
        duration_seconds: f32,
        speech_probability: f32,
    ) -> Self {
        Self {
            wav_bytes: encode_wav_pcm16(&samples, sample_rate),
            duration_seconds,
            speech_probability,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.wav_bytes.len() <= 44
    }
}

/// Encode mono f32 samples as a 16-bit PCM WAV file in memory.
fn encode_wav_pcm16(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).expect("in-memory wav writer never fails");
        for &s in samples {
            let clamped = s.clamp(-1.0, 1.0);
            let pcm = (clamped * i16::MAX as f32) as i16;
            writer
                .write_sample(pcm)
                .expect("in-memory wav write never fails");
        }
        writer.finalize().expect("in-memory wav finalize never fails");
    }
    cursor.into_inner()
}
