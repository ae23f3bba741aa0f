//! `StreamingRecorder` — owns capture, resampling, VAD classification, and
//! the periodic chunk-ready timer.
//!
//! Capture runs through `audio/mod.rs` (cpal into an SPSC ring) and
//! `audio/resample.rs` (`RateConverter`), restructured around an injectable
//! [`AudioSource`] so the chunking state machine itself is testable with a
//! scripted source rather than a live device.
//!
//! The resampler is driven by repeatedly calling `RateConverter::process`
//! with whatever new samples the source produced since the last tick —
//! never by re-feeding the same slice twice, which would double-count
//! frames and desync the chunk-duration accounting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::audio::resample::RateConverter;
use crate::audio::SampleBlock;
use crate::buffering::{AudioBuffer, AudioChunk, Frame};
use crate::error::Result;
use crate::session::SessionController;
use crate::vad::VADProcessor;

/// Minimum tick rate the recorder's timer is allowed to run at, so
/// silence/auto-end decisions don't lag audibly.
pub const MIN_TICK_HZ: u32 = 10;

/// Below this average speech probability, a chunk with no recorded speech
/// anywhere in the session is skipped rather than drained.
pub const DEFAULT_SKIP_THRESHOLD: f32 = 0.30;

/// `stop()` discards an otherwise-final chunk shorter than this.
pub const MIN_RECORDING_DURATION: Duration = Duration::from_millis(250);

/// A source of raw mono samples at a fixed capture rate. The real
/// implementation drains cpal's ring buffer consumer; tests supply a
/// scripted source.
pub trait AudioSource: Send {
    /// Sample rate this source produces, in Hz.
    fn sample_rate(&self) -> u32;

    /// Drain whatever samples have accumulated since the last call.
    /// Must never block — called from the recorder's async tick loop.
    fn pull(&mut self) -> Vec<f32>;
}

/// Outcome of one recorder tick, surfaced to callers that want visibility
/// beyond just "a chunk arrived".
#[derive(Debug, Clone, Copy)]
pub struct TickActivity {
    pub samples_pulled: usize,
    pub is_speech: bool,
}

/// What a chunk-boundary evaluation decided to do with the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkDecision {
    /// The buffer hasn't crossed the relevant duration floor yet.
    NotReady,
    /// Below the skip threshold with no speech recorded anywhere in the
    /// session: drop this pass, reset the VAD accounting, keep recording.
    SkipAndReset,
    /// Drain and emit.
    Emit,
}

/// `sendChunkIfReady` steps 1-3: decide whether a mid-session chunk
/// boundary should actually drain the buffer, without mutating anything.
/// Step 1's floor is `max(maxChunkDuration * 0.1, 0.25s)`; step 2 skips a
/// low-probability chunk unless the session has ever recorded speech
/// (step 3, the "speech-in-session bypass"). The probability consulted is
/// `VADProcessor::speech_ratio()` (`averageSpeechProbability`), not the
/// buffer's own per-chunk ratio — the buffer's ratio is a tagging detail
/// for the emitted `AudioChunk`, not the skip signal.
fn decide_mid_session_chunk(
    buffer: &AudioBuffer,
    vad: &VADProcessor,
    session: &SessionController,
    skip_threshold: f32,
) -> ChunkDecision {
    let floor = (session.max_chunk_duration().as_secs() * 0.1).max(0.25);
    if buffer.duration_seconds() < floor {
        return ChunkDecision::NotReady;
    }
    if vad.has_scored() && vad.speech_ratio() < skip_threshold && !session.has_spoken() {
        return ChunkDecision::SkipAndReset;
    }
    ChunkDecision::Emit
}

/// Same skip/bypass logic applied to the chunk `stop()` considers flushing,
/// gated by `MIN_RECORDING_DURATION` instead of the mid-session floor, and
/// falling back to the buffer's energy-based ratio when the VAD never
/// scored a single block this session. Returns the decision plus the
/// probability the chunk should be tagged with if emitted.
fn decide_final_chunk(
    buffer: &AudioBuffer,
    vad: &VADProcessor,
    session: &SessionController,
    skip_threshold: f32,
) -> (ChunkDecision, f32) {
    if buffer.duration_seconds() < MIN_RECORDING_DURATION.as_secs_f32() {
        return (ChunkDecision::NotReady, 0.0);
    }
    let probability = if vad.has_scored() {
        vad.speech_ratio()
    } else {
        buffer.energy_speech_ratio()
    };
    if probability < skip_threshold && !session.has_spoken() {
        return (ChunkDecision::SkipAndReset, probability);
    }
    (ChunkDecision::Emit, probability)
}

enum StopMode {
    /// Flush any buffered audio as a final chunk before stopping.
    Graceful,
    /// Discard buffered audio, stop immediately.
    Cancel,
}

/// Commands sent to a running recorder task.
enum Command {
    Stop(StopMode),
}

/// Control handle to a spawned recorder task. Kept separate from the
/// chunk/activity receivers (returned alongside it by [`start`]) so a caller
/// can move those receivers into their own consumer task while still
/// holding this handle to issue `stop`/`cancel` later.
pub struct RecorderHandle {
    cmd_tx: mpsc::Sender<Command>,
    running: Arc<AtomicBool>,
}

impl RecorderHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop after flushing any buffered audio as a final chunk.
    pub async fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop(StopMode::Graceful)).await;
    }

    /// Stop immediately, discarding any buffered audio.
    pub async fn cancel(&self) {
        let _ = self.cmd_tx.send(Command::Stop(StopMode::Cancel)).await;
    }
}

/// Spawn the recorder loop against `source`, `vad`, and `session`, emitting
/// ready chunks on a bounded channel.
///
/// `target_sample_rate` is the rate the provider expects (e.g. 16kHz);
/// resampling from `source.sample_rate()` happens transparently. `skip_threshold`
/// is the average-speech-probability floor below which a chunk with no
/// recorded session speech is dropped rather than drained.
#[allow(clippy::too_many_arguments)]
pub fn start(
    mut source: Box<dyn AudioSource>,
    mut vad: VADProcessor,
    mut session: SessionController,
    target_sample_rate: u32,
    max_buffer_seconds: f32,
    tick_hz: u32,
    skip_threshold: f32,
) -> Result<(
    RecorderHandle,
    mpsc::Receiver<AudioChunk>,
    mpsc::Receiver<TickActivity>,
    oneshot::Receiver<()>,
)> {
    let tick_hz = tick_hz.max(MIN_TICK_HZ);
    let capture_rate = source.sample_rate();
    let mut resampler = RateConverter::new(capture_rate, target_sample_rate, 960)?;

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(4);
    let (chunk_tx, chunk_rx) = mpsc::channel::<AudioChunk>(16);
    let (activity_tx, activity_rx) = mpsc::channel::<TickActivity>(64);
    let (auto_end_tx, auto_end_rx) = oneshot::channel::<()>();
    let running = Arc::new(AtomicBool::new(true));
    let running_task = Arc::clone(&running);

    tokio::spawn(async move {
        let mut buffer = AudioBuffer::new(target_sample_rate, max_buffer_seconds);
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / tick_hz as f64));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut was_speech = false;
        let mut auto_ended = false;

        let stop_mode = loop {
            tokio::select! {
                _ = interval.tick() => {
                    let raw = source.pull();
                    if !raw.is_empty() {
                        let resampled = resampler.process(&raw);
                        if !resampled.is_empty() {
                            let block = SampleBlock::new(resampled.clone(), target_sample_rate);
                            let decision = vad.classify(&block);
                            let is_speech = decision.is_speech();
                            // Edges only: a level decision fires every tick, so
                            // calling speech_ended() on every silent tick would
                            // re-anchor speech_end and the silence-duration
                            // gates in `should_send_chunk`/`should_auto_end_session`
                            // would never see it age.
                            if is_speech && !was_speech {
                                session.speech_started();
                            } else if !is_speech && was_speech {
                                session.speech_ended();
                            }
                            was_speech = is_speech;
                            if let Err(e) = buffer.push(Frame::new(resampled, target_sample_rate, is_speech)) {
                                warn!("recorder buffer push failed: {e}");
                            }
                            let _ = activity_tx.try_send(TickActivity {
                                samples_pulled: raw.len(),
                                is_speech,
                            });
                        }
                    }

                    if session.should_send_chunk() && !buffer.is_empty() {
                        match decide_mid_session_chunk(&buffer, &vad, &session, skip_threshold) {
                            ChunkDecision::NotReady => {}
                            ChunkDecision::SkipAndReset => {
                                debug!("recorder skipping low-probability chunk, no speech recorded yet");
                                buffer.reset_speech_accounting();
                                vad.reset_chunk_accumulator();
                            }
                            ChunkDecision::Emit => {
                                session.chunk_sent();
                                let chunk = buffer.take_chunk();
                                debug!(duration = chunk.duration_seconds, "recorder emitting chunk");
                                if chunk_tx.send(chunk).await.is_err() {
                                    break StopMode::Cancel;
                                }
                            }
                        }
                    }

                    if session.should_auto_end_session() {
                        info!("recorder auto-ending session (silence/idle timeout)");
                        auto_ended = true;
                        break StopMode::Graceful;
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Stop(mode)) => break mode,
                        None => break StopMode::Cancel,
                    }
                }
            }
        };

        running_task.store(false, Ordering::Release);

        if matches!(stop_mode, StopMode::Graceful) {
            let (decision, probability) = decide_final_chunk(&buffer, &vad, &session, skip_threshold);
            if decision == ChunkDecision::Emit {
                let chunk = buffer.take_chunk_tagged(probability);
                let _ = chunk_tx.send(chunk).await;
            }
        }

        if auto_ended {
            let _ = auto_end_tx.send(());
        }
        info!("recorder task stopped");
    });

    Ok((RecorderHandle { cmd_tx, running }, chunk_rx, activity_rx, auto_end_rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::session::SessionConfig;
    use crate::vad::processor::VadProfile;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A scripted source that hands out pre-recorded sample slices one tick
    /// at a time, in the same test-double style as `ScriptedVad`.
    struct ScriptedSource {
        sample_rate: u32,
        script: Mutex<VecDeque<Vec<f32>>>,
    }

    impl ScriptedSource {
        fn new(sample_rate: u32, script: Vec<Vec<f32>>) -> Self {
            Self {
                sample_rate,
                script: Mutex::new(script.into()),
            }
        }
    }

    impl AudioSource for ScriptedSource {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn pull(&mut self) -> Vec<f32> {
            self.script.lock().unwrap().pop_front().unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn stop_flushes_buffered_audio_as_final_chunk() {
        let source = Box::new(ScriptedSource::new(16_000, vec![vec![0.3; 1_600]]));
        let vad = VADProcessor::from_cache(VadProfile::default()).await;
        let session = SessionController::new(Arc::new(SystemClock), SessionConfig::default());

        let (handle, mut chunks, _activity, _auto_end) =
            start(source, vad, session, 16_000, 30.0, 20, DEFAULT_SKIP_THRESHOLD).unwrap();
        // Give the task one tick to ingest the scripted sample.
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;

        let chunk = tokio::time::timeout(Duration::from_secs(1), chunks.recv())
            .await
            .expect("final chunk should arrive")
            .expect("channel open");
        assert!(chunk.duration_seconds > 0.0);
    }

    #[tokio::test]
    async fn cancel_discards_buffered_audio() {
        let source = Box::new(ScriptedSource::new(16_000, vec![vec![0.3; 1_600]]));
        let vad = VADProcessor::from_cache(VadProfile::default()).await;
        let session = SessionController::new(Arc::new(SystemClock), SessionConfig::default());

        let (handle, mut chunks, _activity, _auto_end) =
            start(source, vad, session, 16_000, 30.0, 20, DEFAULT_SKIP_THRESHOLD).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel().await;

        let result = tokio::time::timeout(Duration::from_millis(300), chunks.recv()).await;
        assert!(result.is_err() || result.unwrap().is_none(), "no chunk expected after cancel");
    }

    #[tokio::test]
    async fn stop_preserves_diluted_speech_via_session_bypass() {
        // 2s of loud "speech" followed by 5s of near-silence in one pull: the
        // buffered-average speech probability ends up well under the skip
        // threshold, but the session did record speech, so the bypass keeps
        // the final chunk instead of discarding it as noise.
        let mut script = vec![0.6_f32; 16_000 * 2];
        script.extend(vec![0.0_f32; 16_000 * 5]);
        let source = Box::new(ScriptedSource::new(16_000, vec![script]));
        let vad = VADProcessor::from_cache(VadProfile::default()).await;
        let session = SessionController::new(Arc::new(SystemClock), SessionConfig::default());

        let (handle, mut chunks, _activity, _auto_end) =
            start(source, vad, session, 16_000, 30.0, 20, DEFAULT_SKIP_THRESHOLD).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop().await;

        let chunk = tokio::time::timeout(Duration::from_secs(1), chunks.recv())
            .await
            .expect("bypass should still emit the diluted-speech final chunk")
            .expect("channel open");
        assert!(chunk.duration_seconds >= 6.5);
    }

    #[tokio::test]
    async fn mid_session_decision_requires_the_duration_floor() {
        let mut buffer = AudioBuffer::new(16_000, 30.0);
        buffer.push(Frame::new(vec![0.5; 100], 16_000, true)).unwrap();
        let vad = VADProcessor::from_cache(VadProfile::default()).await;
        let session = SessionController::new(
            Arc::new(SystemClock),
            SessionConfig {
                max_chunk_duration: crate::session::MaxChunkDuration::Secs15,
                ..Default::default()
            },
        );
        assert_eq!(
            decide_mid_session_chunk(&buffer, &vad, &session, DEFAULT_SKIP_THRESHOLD),
            ChunkDecision::NotReady
        );
    }

    #[tokio::test]
    async fn mid_session_decision_skips_low_probability_with_no_prior_speech() {
        let mut buffer = AudioBuffer::new(16_000, 30.0);
        buffer.push(Frame::new(vec![0.01; 16_000 * 2], 16_000, false)).unwrap();
        let mut vad = VADProcessor::from_cache(VadProfile::default()).await;
        vad.classify(&SampleBlock::new(vec![0.0; 160], 16_000));
        let session = SessionController::new(
            Arc::new(SystemClock),
            SessionConfig {
                max_chunk_duration: crate::session::MaxChunkDuration::Secs15,
                ..Default::default()
            },
        );
        assert_eq!(
            decide_mid_session_chunk(&buffer, &vad, &session, DEFAULT_SKIP_THRESHOLD),
            ChunkDecision::SkipAndReset
        );
    }

    #[tokio::test]
    async fn mid_session_decision_emits_when_session_has_spoken() {
        let mut buffer = AudioBuffer::new(16_000, 30.0);
        buffer.push(Frame::new(vec![0.01; 16_000 * 2], 16_000, false)).unwrap();
        let vad = VADProcessor::from_cache(VadProfile::default()).await;
        let mut session = SessionController::new(
            Arc::new(SystemClock),
            SessionConfig {
                max_chunk_duration: crate::session::MaxChunkDuration::Secs15,
                ..Default::default()
            },
        );
        session.speech_started();
        session.speech_ended();
        assert_eq!(
            decide_mid_session_chunk(&buffer, &vad, &session, DEFAULT_SKIP_THRESHOLD),
            ChunkDecision::Emit
        );
    }

    #[tokio::test]
    async fn final_chunk_falls_back_to_energy_ratio_when_vad_never_scored() {
        let mut buffer = AudioBuffer::new(16_000, 30.0);
        buffer.push(Frame::new(vec![0.9; 16_000], 16_000, false)).unwrap();
        let energy_ratio = buffer.energy_speech_ratio();
        assert!(energy_ratio > 0.9);

        // Never classified — `has_scored()` is false, so the decision must
        // fall back to the buffer's energy ratio instead of `speech_ratio()`.
        let vad = VADProcessor::from_cache(VadProfile::default()).await;
        assert!(!vad.has_scored());

        let session = SessionController::new(Arc::new(SystemClock), SessionConfig::default());
        let (decision, probability) = decide_final_chunk(&buffer, &vad, &session, DEFAULT_SKIP_THRESHOLD);
        assert_eq!(decision, ChunkDecision::Emit);
        assert!(probability > 0.9);
    }
}
