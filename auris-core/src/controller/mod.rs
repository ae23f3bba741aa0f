//! `RecordingController` — the top-level `Idle -> Recording ->
//! ProcessingFinal -> Idle` lifecycle state machine, wiring together
//! [`crate::recorder`], [`crate::queue`], a [`BatchTranscriptionProvider`],
//! a [`TextSink`], and the status/transcript broadcast channels the rest of
//! the application subscribes to.
//!
//! A single owning struct holding `Arc<AtomicBool>`/`Arc<Mutex<Status>>`
//! state plus `broadcast::Sender` fan-out for status and transcript events
//! consumed by the rest of the application.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, info_span, warn};

use crate::error::{EngineError, Result};
use crate::ipc::events::{RecordingState, RecordingStatusEvent, SegmentKind, TranscriptEvent, TranscriptSegment};
use crate::queue::TranscriptionQueue;
use crate::recorder::{self, AudioSource, RecorderHandle};
use crate::session::{SessionConfig, SessionController};
use crate::sink::TextSink;
use crate::transcription::BatchTranscriptionProvider;
use crate::vad::processor::VadProfile;
use crate::vad::VADProcessor;

/// How long `finishIfDone` polls the queue's pending count after a stop
/// before giving up waiting and returning to `Idle` anyway.
const FINISH_POLL_INTERVAL: Duration = Duration::from_millis(50);
const FINISH_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll `queue`'s pending count down to zero before declaring the session
/// finished. Shared between the explicit `stop_and_finalize` path and the
/// auto-end watch task, bounded by `FINISH_POLL_TIMEOUT` so a stuck upload
/// can't wedge either caller forever.
async fn drain_queue_to_completion(queue: &TranscriptionQueue) {
    let deadline = tokio::time::Instant::now() + FINISH_POLL_TIMEOUT;
    loop {
        if queue.get_pending_count() == 0 {
            queue.finish_stream();
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!("finish_if_done timed out waiting for pending transcriptions");
            queue.finish_stream();
            return;
        }
        tokio::time::sleep(FINISH_POLL_INTERVAL).await;
    }
}

/// Runtime configuration for a `RecordingController`.
#[derive(Debug, Clone, Copy)]
pub struct RecordingConfig {
    pub target_sample_rate: u32,
    pub max_buffer_seconds: f32,
    pub tick_hz: u32,
    pub vad_profile: VadProfile,
    pub session: SessionConfig,
    pub skip_threshold: f32,
    /// Minimum time to wait for the captured focus target to regain focus
    /// before giving up on text insertion. Spec floor: 10s.
    pub focus_wait_timeout: Duration,
    /// Whether a successful stop presses Enter after the final insertion.
    pub press_enter_on_finish: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            max_buffer_seconds: 30.0,
            tick_hz: 20,
            vad_profile: VadProfile::default(),
            session: SessionConfig::default(),
            skip_threshold: crate::recorder::DEFAULT_SKIP_THRESHOLD,
            focus_wait_timeout: Duration::from_secs(10),
            press_enter_on_finish: false,
        }
    }
}

/// Tracks the OS-level permissions the dictation-readiness guard needs,
/// separate from whether a provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionState {
    pub accessibility_granted: bool,
    pub microphone_granted: bool,
}

/// `RecordingController`'s lifecycle state.
pub struct RecordingController {
    clock: Arc<dyn crate::clock::Clock>,
    queue: Arc<TranscriptionQueue>,
    provider: Arc<dyn BatchTranscriptionProvider>,
    text_sink: Arc<dyn TextSink>,
    config: RecordingConfig,
    permissions: SyncMutex<PermissionState>,
    state: Arc<SyncMutex<RecordingState>>,
    session_counter: AtomicU64,
    status_tx: broadcast::Sender<RecordingStatusEvent>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    transcript_seq: Arc<AtomicU64>,
    active_recorder: Arc<SyncMutex<Option<RecorderHandle>>>,
    /// Set on `cancel()` so the final-chunk path skips queue submission for
    /// whatever is still in flight from the just-cancelled session.
    suppress_final: Arc<AtomicBool>,
}

impl RecordingController {
    pub fn new(
        clock: Arc<dyn crate::clock::Clock>,
        queue: Arc<TranscriptionQueue>,
        provider: Arc<dyn BatchTranscriptionProvider>,
        text_sink: Arc<dyn TextSink>,
        config: RecordingConfig,
    ) -> Self {
        let (status_tx, _rx) = broadcast::channel(16);
        let (transcript_tx, _rx2) = broadcast::channel(64);
        Self {
            clock,
            queue,
            provider,
            text_sink,
            config,
            permissions: SyncMutex::new(PermissionState::default()),
            state: Arc::new(SyncMutex::new(RecordingState::Idle)),
            session_counter: AtomicU64::new(0),
            status_tx,
            transcript_tx,
            transcript_seq: Arc::new(AtomicU64::new(0)),
            active_recorder: Arc::new(SyncMutex::new(None)),
            suppress_final: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<RecordingStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_transcript(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.transcript_tx.subscribe()
    }

    pub fn state(&self) -> RecordingState {
        *self.state.lock()
    }

    pub fn set_permissions(&self, permissions: PermissionState) {
        *self.permissions.lock() = permissions;
    }

    /// `canStartDictation = accessibilityGranted ∧ microphoneGranted ∧
    /// provider.isConfigured`.
    pub fn can_start_dictation(&self) -> bool {
        let perms = *self.permissions.lock();
        perms.accessibility_granted && perms.microphone_granted && self.provider.is_configured()
    }

    fn set_state(&self, state: RecordingState) {
        *self.state.lock() = state;
        let _ = self.status_tx.send(RecordingStatusEvent { state, detail: None });
    }

    /// `Idle -> Recording`: begin a new push-to-talk session.
    ///
    /// `queue.reset()` runs to completion before the recorder is spawned —
    /// this ordering is what keeps a still-finalizing prior session's stale
    /// tickets from bleeding into the new one.
    pub async fn start(&self, source: Box<dyn AudioSource>) -> Result<()> {
        if self.state() != RecordingState::Idle {
            return Err(EngineError::AlreadyRunning);
        }
        if !self.can_start_dictation() {
            return Err(EngineError::NotRunning);
        }

        let generation = self.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let span = info_span!("dictation_session", session = generation);
        let _enter = span.enter();

        self.queue.reset();
        self.suppress_final.store(false, Ordering::SeqCst);

        self.text_sink.capture_target().await;

        let vad = VADProcessor::from_cache(self.config.vad_profile).await;
        let session = SessionController::new(Arc::clone(&self.clock), self.config.session);

        let (handle, chunks, _activity, auto_end_rx) = recorder::start(
            source,
            vad,
            session,
            self.config.target_sample_rate,
            self.config.max_buffer_seconds,
            self.config.tick_hz,
            self.config.skip_threshold,
        )?;

        self.spawn_chunk_ingest(chunks);
        self.spawn_text_delivery();
        self.spawn_auto_end_watch(auto_end_rx);

        *self.active_recorder.lock() = Some(handle);
        self.set_state(RecordingState::Recording);
        info!("recording session started");
        Ok(())
    }

    /// Drains chunks off the recorder and uploads each one independently;
    /// the queue reorders results regardless of upload completion order.
    fn spawn_chunk_ingest(&self, mut chunks: tokio::sync::mpsc::Receiver<crate::buffering::AudioChunk>) {
        let queue = Arc::clone(&self.queue);
        let provider = Arc::clone(&self.provider);
        let suppress_final = Arc::clone(&self.suppress_final);
        let expected_generation = queue.current_session_generation();

        tokio::spawn(async move {
            while let Some(chunk) = chunks.recv().await {
                if suppress_final.load(Ordering::SeqCst) && queue.current_session_generation() == expected_generation {
                    continue;
                }
                let ticket = queue.next_sequence();
                let queue = Arc::clone(&queue);
                let provider = Arc::clone(&provider);
                tokio::spawn(async move {
                    match provider.transcribe(&chunk).await {
                        Ok(result) => queue.submit_result(ticket, result.transcript),
                        Err(e) => {
                            warn!(error = %e, "chunk transcription failed");
                            queue.mark_failed(ticket);
                        }
                    }
                });
            }
        });
    }

    /// Drains the queue's ordered text stream, inserting each piece through
    /// the text sink and broadcasting it as a `TranscriptEvent`.
    fn spawn_text_delivery(&self) {
        let queue = Arc::clone(&self.queue);
        let text_sink = Arc::clone(&self.text_sink);
        let transcript_tx = self.transcript_tx.clone();
        let seq_counter = Arc::clone(&self.transcript_seq);
        let stream = queue.text_stream();

        tokio::spawn(async move {
            while let Some(text) = stream.recv().await {
                if let Err(e) = text_sink.insert(&text).await {
                    warn!(error = %e, "text sink insertion failed");
                    continue;
                }
                let seq = seq_counter.fetch_add(1, Ordering::SeqCst);
                let event = TranscriptEvent {
                    seq,
                    segments: vec![TranscriptSegment {
                        id: format!("batch-{seq}"),
                        text,
                        kind: SegmentKind::Final,
                        confidence: None,
                    }],
                };
                let _ = transcript_tx.send(event);
            }
        });
    }

    /// `Recording -> ProcessingFinal -> Idle`: stop capturing, flush any
    /// buffered audio as a final chunk, wait for every chunk already in
    /// flight to resolve through the queue, then signal completion.
    pub async fn stop_and_finalize(&self) -> Result<()> {
        if self.state() != RecordingState::Recording {
            return Err(EngineError::NotRunning);
        }

        self.set_state(RecordingState::ProcessingFinal);

        let handle = self
            .active_recorder
            .lock()
            .take()
            .ok_or(EngineError::NotRunning)?;
        handle.stop().await;

        self.finish_if_done().await;

        let focused = self
            .text_sink
            .ensure_target_focused(self.config.focus_wait_timeout)
            .await;
        if focused && self.config.press_enter_on_finish {
            if let Err(e) = self.text_sink.press_enter().await {
                debug!(error = %e, "press_enter failed after finalize");
            }
        }

        self.set_state(RecordingState::Idle);
        info!("recording session finalized");
        Ok(())
    }

    /// Poll the queue's pending count down to zero before declaring the
    /// session finished. Bounded by `FINISH_POLL_TIMEOUT` so a stuck
    /// upload can't wedge the controller in `ProcessingFinal` forever.
    async fn finish_if_done(&self) {
        drain_queue_to_completion(&self.queue).await;
    }

    /// Spawned alongside every recorder: awaits the oneshot the recorder's
    /// tick loop fires when `SessionController::should_auto_end_session`
    /// trips (silence/idle timeout ending the turn on its own), and replays
    /// `stop_and_finalize`'s finalize sequence without a caller having to
    /// invoke it.
    ///
    /// Guarded on `RecordingState::Recording` still holding at signal time:
    /// an explicit `stop()`/`cancel()` that already moved the controller out
    /// of `Recording` has already torn down `active_recorder`, so this task
    /// has nothing left to finalize and just returns.
    fn spawn_auto_end_watch(&self, auto_end_rx: oneshot::Receiver<()>) {
        let queue = Arc::clone(&self.queue);
        let text_sink = Arc::clone(&self.text_sink);
        let state = Arc::clone(&self.state);
        let active_recorder = Arc::clone(&self.active_recorder);
        let status_tx = self.status_tx.clone();
        let focus_wait_timeout = self.config.focus_wait_timeout;
        let press_enter_on_finish = self.config.press_enter_on_finish;

        tokio::spawn(async move {
            if auto_end_rx.await.is_err() {
                return;
            }

            if *state.lock() != RecordingState::Recording {
                return;
            }
            *state.lock() = RecordingState::ProcessingFinal;
            let _ = status_tx.send(RecordingStatusEvent {
                state: RecordingState::ProcessingFinal,
                detail: None,
            });

            // The recorder task already stopped itself after sending its
            // final chunk; just drop the now-dead handle.
            active_recorder.lock().take();

            drain_queue_to_completion(&queue).await;

            let focused = text_sink.ensure_target_focused(focus_wait_timeout).await;
            if focused && press_enter_on_finish {
                if let Err(e) = text_sink.press_enter().await {
                    debug!(error = %e, "press_enter failed after auto-end finalize");
                }
            }

            *state.lock() = RecordingState::Idle;
            let _ = status_tx.send(RecordingStatusEvent {
                state: RecordingState::Idle,
                detail: None,
            });
            info!("recording session auto-ended");
        });
    }

    /// `Recording -> Idle` immediately. Suppresses the final chunk, clears
    /// processing flags, bumps the session generation (via `queue.reset`),
    /// and resets the text sink instead of inserting anything more.
    pub async fn cancel(&self) -> Result<()> {
        if self.state() != RecordingState::Recording {
            return Err(EngineError::NotRunning);
        }

        self.suppress_final.store(true, Ordering::SeqCst);

        if let Some(handle) = self.active_recorder.lock().take() {
            handle.cancel().await;
        } else {
            warn!("cancel called with no active recorder handle");
        }

        self.queue.reset();
        self.text_sink.cancel_and_reset().await;

        self.set_state(RecordingState::Idle);
        Ok(())
    }
}
