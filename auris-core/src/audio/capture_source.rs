//! Concrete [`crate::recorder::AudioSource`] backed by cpal capture into an
//! SPSC ring buffer — the production audio path. Test code instead uses a
//! scripted source (see `recorder::tests::ScriptedSource`).
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (it wraps COM/CoreAudio
//! handles), so `AudioCapture` is created, kept alive, and dropped entirely
//! on one dedicated OS thread. Only the ring buffer's `Send` consumer half
//! crosses into the async recorder task that calls [`AudioSource::pull`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Split};
use ringbuf::HeapRb;
use tokio::sync::oneshot;
use tracing::error;

use super::AudioCapture;
use crate::error::{EngineError, Result};
use crate::recorder::AudioSource;

/// Ring capacity: 2^20 f32 samples (~65s at 16kHz) — generous headroom for
/// the resampler/VAD tick loop to keep draining the producer side.
const RING_CAPACITY: usize = 1 << 20;

pub struct CpalAudioSource {
    consumer: ringbuf::HeapCons<f32>,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    _capture_thread: std::thread::JoinHandle<()>,
}

impl CpalAudioSource {
    /// Open `preferred_device_name` (falling back per
    /// `AudioCapture::open_with_preference`'s device-selection heuristics)
    /// on a dedicated capture thread, and start draining it.
    ///
    /// Blocks the calling thread briefly waiting for the capture thread to
    /// report readiness. Callers on a tokio runtime must invoke this inside
    /// `tokio::task::spawn_blocking` since opening a `!Send` cpal stream
    /// cannot happen directly on an async task.
    pub fn open(preferred_device_name: Option<&str>) -> Result<Self> {
        let (producer, consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = Arc::clone(&running);
        let preferred = preferred_device_name.map(str::to_owned);

        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32>>();

        let capture_thread = std::thread::spawn(move || {
            let capture = AudioCapture::open_with_preference(
                producer,
                Arc::clone(&running_thread),
                preferred.as_deref(),
            );
            match capture {
                Ok(capture) => {
                    let sample_rate = capture.sample_rate;
                    let _ = ready_tx.send(Ok(sample_rate));
                    // Park this thread for the stream's lifetime: the
                    // `Stream` inside `capture` must not be dropped until
                    // `running` is cleared.
                    while running_thread.load(Ordering::Acquire) {
                        std::thread::sleep(std::time::Duration::from_millis(50));
                    }
                    drop(capture);
                }
                Err(e) => {
                    error!("failed to open audio capture: {e}");
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        let sample_rate = ready_rx
            .blocking_recv()
            .map_err(|_| EngineError::AudioStream("capture thread exited before reporting readiness".into()))??;

        Ok(Self {
            consumer,
            sample_rate,
            running,
            _capture_thread: capture_thread,
        })
    }
}

impl Drop for CpalAudioSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl AudioSource for CpalAudioSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn pull(&mut self) -> Vec<f32> {
        let available = self.consumer.occupied_len();
        if available == 0 {
            return Vec::new();
        }
        let mut out = vec![0.0f32; available];
        let popped = self.consumer.pop_slice(&mut out);
        out.truncate(popped);
        out
    }
}
