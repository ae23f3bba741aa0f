//! `VADProcessor` and the process-wide `VADModelCache`.
//!
//! Building a VAD backend is treated as a "model load" even though the
//! default `EnergyVad` backend has no weights to read — the cache exists so
//! that switching profiles at runtime (different RMS threshold/hangover
//! tuning) doesn't require every session to pay a fresh warm-up, and so
//! concurrent session starts that want the *same* configuration coalesce
//! onto a single warm-up instead of racing.

use std::sync::OnceLock;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use super::energy::EnergyVad;
use super::{VadDecision, VoiceActivityDetector};
use crate::audio::SampleBlock;

/// Tuning for the energy-ratio VAD backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadProfile {
    pub threshold: f32,
    pub hangover_frames: u32,
}

impl Default for VadProfile {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            hangover_frames: 8,
        }
    }
}

struct CachedEntry {
    profile: VadProfile,
    template: EnergyVad,
}

/// Process-wide singleton cache of warmed-up VAD backends, keyed by
/// [`VadProfile`]. A session asks for a backend via
/// [`VADModelCache::acquire`]; if the cached entry's profile doesn't match
/// the request, the cache is invalidated and rebuilt.
///
/// Concurrent `acquire` calls for the same uncached profile coalesce onto a
/// single rebuild: the async mutex is held for the duration of the (here,
/// trivial) warm-up, so the second caller simply waits for the first to
/// finish instead of duplicating the work.
pub struct VADModelCache {
    entry: AsyncMutex<Option<CachedEntry>>,
}

impl VADModelCache {
    fn new() -> Self {
        Self {
            entry: AsyncMutex::new(None),
        }
    }

    /// The process-wide instance. All sessions share this cache.
    pub fn global() -> &'static VADModelCache {
        static CACHE: OnceLock<VADModelCache> = OnceLock::new();
        CACHE.get_or_init(VADModelCache::new)
    }

    /// Acquire a warmed-up detector for `profile`, rebuilding the cache if
    /// the profile changed since the last acquisition.
    pub async fn acquire(&self, profile: VadProfile) -> EnergyVad {
        let mut guard = self.entry.lock().await;
        match guard.as_ref() {
            Some(cached) if cached.profile == profile => {
                debug!(?profile, "vad model cache hit");
            }
            _ => {
                info!(?profile, "vad model cache miss, warming up backend");
                *guard = Some(CachedEntry {
                    profile,
                    template: EnergyVad::new(profile.threshold, profile.hangover_frames),
                });
            }
        }
        // EnergyVad is cheap to clone (two floats and a counter) — each
        // session gets its own mutable instance seeded from the warmed
        // template so sessions don't share hangover state.
        guard.as_ref().expect("just inserted").template.clone()
    }
}

/// Diagnostics counters mirroring the shape of a pipeline diagnostics
/// struct: cheap atomics a caller can snapshot for observability without
/// changing the VAD contract itself.
#[derive(Debug, Default)]
pub struct VadDiagnostics {
    pub blocks_seen: u64,
    pub speech_blocks: u64,
}

/// Wraps a [`VoiceActivityDetector`] with bookkeeping the session layer
/// needs: a running count of classified blocks/speech blocks (used as the
/// energy-ratio fallback described in `DESIGN.md`), and an explicit
/// `reset_accumulator` hook a new utterance calls between chunks.
pub struct VADProcessor {
    detector: EnergyVad,
    diagnostics: VadDiagnostics,
}

impl VADProcessor {
    pub async fn from_cache(profile: VadProfile) -> Self {
        let detector = VADModelCache::global().acquire(profile).await;
        Self {
            detector,
            diagnostics: VadDiagnostics::default(),
        }
    }

    pub fn classify(&mut self, block: &SampleBlock) -> VadDecision {
        let decision = self.detector.classify(block);
        self.diagnostics.blocks_seen += 1;
        if decision.is_speech() {
            self.diagnostics.speech_blocks += 1;
        }
        decision
    }

    /// Clears hangover state between utterances without discarding the
    /// running speech-ratio counters used for the OQ2 fallback.
    pub fn reset_chunk_accumulator(&mut self) {
        self.detector.reset();
    }

    /// Fraction of classified blocks that were speech, for sessions that
    /// want a coarse summary instead of re-deriving it from raw samples.
    /// This is the `averageSpeechProbability` the recorder's
    /// skip/speech-in-session-bypass decision consults.
    pub fn speech_ratio(&self) -> f32 {
        if self.diagnostics.blocks_seen == 0 {
            return 0.0;
        }
        self.diagnostics.speech_blocks as f32 / self.diagnostics.blocks_seen as f32
    }

    /// Whether at least one block has ever been classified — `false` means
    /// `speech_ratio()` has no real signal behind it yet (VAD inactive or
    /// not yet run this session).
    pub fn has_scored(&self) -> bool {
        self.diagnostics.blocks_seen > 0
    }

    pub fn diagnostics(&self) -> &VadDiagnostics {
        &self.diagnostics
    }
}
