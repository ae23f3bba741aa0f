//! `SessionController` — a pure decision engine for when the recorder
//! should ship a chunk and when a session should auto-end.
//!
//! Every method here is a deterministic function of injected [`Clock`] time
//! and explicit inputs; nothing here touches audio, channels, or I/O, so it
//! is unit-testable without a scripted VAD/model double.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;

/// Ceiling on how long a single chunk is allowed to accumulate before it is
/// forced out, independent of silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxChunkDuration {
    Secs15,
    Secs30,
    Secs45,
    Min1,
    Min2,
    Min5,
    Min10,
    Min15,
    /// Full-recording mode: the controller never cuts mid-session on
    /// pauses. Chunk emission comes only from an explicit stop.
    Unlimited,
}

impl MaxChunkDuration {
    pub fn as_secs(self) -> f32 {
        match self {
            MaxChunkDuration::Secs15 => 15.0,
            MaxChunkDuration::Secs30 => 30.0,
            MaxChunkDuration::Secs45 => 45.0,
            MaxChunkDuration::Min1 => 60.0,
            MaxChunkDuration::Min2 => 120.0,
            MaxChunkDuration::Min5 => 300.0,
            MaxChunkDuration::Min10 => 600.0,
            MaxChunkDuration::Min15 => 900.0,
            // "maxFullRecordingDuration" ceiling from §3 — used as the
            // buffer cap, not as a mid-session chunk boundary.
            MaxChunkDuration::Unlimited => 3_600.0,
        }
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs_f32(self.as_secs())
    }

    pub fn is_unlimited(self) -> bool {
        matches!(self, MaxChunkDuration::Unlimited)
    }
}

/// Controls whether/when a session auto-ends after a silence gap.
#[derive(Debug, Clone, Copy)]
pub struct AutoEndConfig {
    pub enabled: bool,
    /// The "long silence" that ends the whole turn. Clamped to >= 3.0s.
    pub silence_duration: Duration,
    /// A turn can't auto-end before this much wall-clock time has passed,
    /// even if silence alone would otherwise qualify.
    pub min_session_duration: Duration,
    /// If true, the silence-duration path requires at least one speech
    /// event to have fired before it can trigger.
    pub require_speech_first: bool,
    /// If no speech has occurred at all by this long into the session, end
    /// it anyway. `Duration::ZERO` disables this idle-timeout path.
    pub no_speech_timeout: Duration,
}

impl AutoEndConfig {
    /// Constructs a config, clamping `silence_duration` to a 3.0s floor so a
    /// misconfigured caller can't produce a hair-trigger auto-end.
    pub fn new(
        enabled: bool,
        silence_duration: Duration,
        min_session_duration: Duration,
        require_speech_first: bool,
        no_speech_timeout: Duration,
    ) -> Self {
        Self {
            enabled,
            silence_duration: silence_duration.max(Duration::from_secs_f32(3.0)),
            min_session_duration,
            require_speech_first,
            no_speech_timeout,
        }
    }
}

impl Default for AutoEndConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            silence_duration: Duration::from_secs_f32(5.0),
            min_session_duration: Duration::from_secs_f32(2.0),
            require_speech_first: true,
            no_speech_timeout: Duration::from_secs_f32(10.0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub max_chunk_duration: MaxChunkDuration,
    /// The "short silence" that closes a chunk past the chunk-duration
    /// boundary. Default 1.0s.
    pub min_silence_after_speech: Duration,
    pub auto_end: AutoEndConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_chunk_duration: MaxChunkDuration::Secs15,
            min_silence_after_speech: Duration::from_secs_f32(1.0),
            auto_end: AutoEndConfig::default(),
        }
    }
}

/// Pure decision engine: tracks the last time a chunk was sent, the last
/// observed speech-end, and whether speech has ever been observed, then
/// answers "should I flush now?" / "should this session end now?" without
/// ever reading a clock itself.
pub struct SessionController {
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    session_start: Instant,
    last_chunk_emitted: Instant,
    speech_start: Option<Instant>,
    speech_end: Option<Instant>,
    has_spoken: bool,
    is_speaking: bool,
}

impl SessionController {
    pub fn new(clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        let now = clock.now();
        Self {
            clock,
            config,
            session_start: now,
            last_chunk_emitted: now,
            speech_start: None,
            speech_end: None,
            has_spoken: false,
            is_speaking: false,
        }
    }

    /// Speech was detected starting now: marks the session as having
    /// spoken, clears any pending silence anchor, and flags "currently
    /// speaking" so boundary checks don't fire mid-utterance.
    pub fn speech_started(&mut self) {
        self.speech_start = Some(self.clock.now());
        self.speech_end = None;
        self.has_spoken = true;
        self.is_speaking = true;
    }

    /// Speech stopped now: anchors the silence timers used by both the
    /// chunk boundary and the auto-end check.
    pub fn speech_ended(&mut self) {
        self.speech_end = Some(self.clock.now());
        self.is_speaking = false;
    }

    pub fn has_spoken(&self) -> bool {
        self.has_spoken
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    pub fn max_chunk_duration(&self) -> MaxChunkDuration {
        self.config.max_chunk_duration
    }

    fn current_chunk_duration(&self) -> Duration {
        self.clock.now().duration_since(self.last_chunk_emitted)
    }

    pub fn current_session_duration(&self) -> Duration {
        self.clock.now().duration_since(self.session_start)
    }

    /// Whether the recorder should cut a chunk right now: the chunk-duration
    /// boundary must be reached, nothing must currently be speaking, and
    /// either the short silence window has elapsed since the last
    /// speech-end, or the VAD never fired at all (a silent session still
    /// has to emit on the boundary). Unlimited mode never cuts mid-session;
    /// only an explicit stop flushes it.
    pub fn should_send_chunk(&self) -> bool {
        if self.config.max_chunk_duration.is_unlimited() {
            return false;
        }
        if self.current_chunk_duration() < self.config.max_chunk_duration.as_duration() {
            return false;
        }
        if self.is_speaking {
            return false;
        }
        match self.speech_end {
            Some(end) => self.clock.now().duration_since(end) >= self.config.min_silence_after_speech,
            None => true,
        }
    }

    /// Record that a chunk was just sent: advances the chunk clock and
    /// clears `speech_end` so the next boundary measures from the next
    /// silence, not a stale one.
    pub fn chunk_sent(&mut self) {
        self.last_chunk_emitted = self.clock.now();
        self.speech_end = None;
    }

    /// Whether the session as a whole should auto-end. Independent of
    /// `should_send_chunk` — auto-end may fire before any chunk boundary.
    pub fn should_auto_end_session(&self) -> bool {
        let cfg = &self.config.auto_end;
        if !cfg.enabled {
            return false;
        }
        if self.current_session_duration() < cfg.min_session_duration {
            return false;
        }

        let speech_gate_open = !cfg.require_speech_first || self.has_spoken;
        if speech_gate_open {
            if let Some(end) = self.speech_end {
                if self.clock.now().duration_since(end) >= cfg.silence_duration {
                    return true;
                }
            }
        }

        if cfg.no_speech_timeout > Duration::ZERO
            && !self.has_spoken
            && self.current_session_duration() >= cfg.no_speech_timeout
        {
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn controller(config: SessionConfig) -> (Arc<MockClock>, SessionController) {
        let clock = Arc::new(MockClock::new());
        let controller = SessionController::new(clock.clone(), config);
        (clock, controller)
    }

    #[test]
    fn should_send_chunk_requires_boundary_and_silence() {
        let (clock, mut ctrl) = controller(SessionConfig {
            max_chunk_duration: MaxChunkDuration::Secs15,
            min_silence_after_speech: Duration::from_secs_f32(1.0),
            ..Default::default()
        });
        ctrl.speech_started();
        clock.advance(Duration::from_secs(10));
        ctrl.speech_ended();
        clock.advance(Duration::from_secs(5)); // chunk duration now 15s
        // 5s since speech_end >= 1s min_silence, boundary reached.
        assert!(ctrl.should_send_chunk());
    }

    #[test]
    fn should_send_chunk_waits_out_short_silence_past_boundary() {
        let (clock, mut ctrl) = controller(SessionConfig {
            max_chunk_duration: MaxChunkDuration::Secs15,
            min_silence_after_speech: Duration::from_secs_f32(1.0),
            ..Default::default()
        });
        ctrl.speech_started();
        clock.advance(Duration::from_secs(15));
        ctrl.speech_ended();
        // Boundary reached but silence window not yet elapsed.
        clock.advance(Duration::from_millis(500));
        assert!(!ctrl.should_send_chunk());
        clock.advance(Duration::from_millis(600));
        assert!(ctrl.should_send_chunk());
    }

    #[test]
    fn should_send_chunk_falls_back_when_vad_never_fired() {
        let (clock, ctrl) = controller(SessionConfig {
            max_chunk_duration: MaxChunkDuration::Secs15,
            ..Default::default()
        });
        clock.advance(Duration::from_secs(15));
        // No speech_started/ended ever called: VAD never fired, but the
        // boundary is reached, so a silent session still emits.
        assert!(ctrl.should_send_chunk());
    }

    #[test]
    fn should_send_chunk_never_fires_while_speaking() {
        let (clock, mut ctrl) = controller(SessionConfig {
            max_chunk_duration: MaxChunkDuration::Secs15,
            ..Default::default()
        });
        ctrl.speech_started();
        clock.advance(Duration::from_secs(20));
        assert!(!ctrl.should_send_chunk(), "still speaking, never cut mid-utterance");
    }

    #[test]
    fn unlimited_mode_never_cuts_mid_session() {
        let (clock, mut ctrl) = controller(SessionConfig {
            max_chunk_duration: MaxChunkDuration::Unlimited,
            ..Default::default()
        });
        ctrl.speech_started();
        ctrl.speech_ended();
        clock.advance(Duration::from_secs(4_000));
        assert!(!ctrl.should_send_chunk());
    }

    /// Speech starts, ends after 2s, and the default 5.0s silence window
    /// must not fire early — only once the full window has elapsed.
    #[test]
    fn auto_end_silence_boundary_below_threshold_does_not_fire() {
        let (clock, mut ctrl) = controller(SessionConfig::default());
        ctrl.speech_started();
        clock.advance(Duration::from_secs(2));
        ctrl.speech_ended();
        clock.advance(Duration::from_millis(4_900));
        assert!(!ctrl.should_auto_end_session());
        clock.advance(Duration::from_millis(200));
        assert!(ctrl.should_auto_end_session());
    }

    #[test]
    fn auto_end_requires_min_session_duration() {
        let (clock, mut ctrl) = controller(SessionConfig {
            auto_end: AutoEndConfig::new(
                true,
                Duration::from_secs_f32(3.0),
                Duration::from_secs_f32(5.0),
                true,
                Duration::ZERO,
            ),
            ..Default::default()
        });
        ctrl.speech_started();
        clock.advance(Duration::from_millis(500));
        ctrl.speech_ended();
        clock.advance(Duration::from_secs(4)); // silence satisfied, but session too young
        assert!(!ctrl.should_auto_end_session());
        clock.advance(Duration::from_secs(2));
        assert!(ctrl.should_auto_end_session());
    }

    #[test]
    fn auto_end_silence_clamped_to_minimum_three_seconds() {
        let cfg = AutoEndConfig::new(true, Duration::from_millis(500), Duration::ZERO, true, Duration::ZERO);
        assert_eq!(cfg.silence_duration, Duration::from_secs_f32(3.0));
    }

    #[test]
    fn auto_end_disabled_never_fires() {
        let (clock, mut ctrl) = controller(SessionConfig {
            auto_end: AutoEndConfig {
                enabled: false,
                ..AutoEndConfig::default()
            },
            ..Default::default()
        });
        ctrl.speech_started();
        ctrl.speech_ended();
        clock.advance(Duration::from_secs(60));
        assert!(!ctrl.should_auto_end_session());
    }

    #[test]
    fn no_speech_timeout_ends_idle_session() {
        let (clock, ctrl) = controller(SessionConfig {
            auto_end: AutoEndConfig::new(
                true,
                Duration::from_secs_f32(5.0),
                Duration::from_secs_f32(2.0),
                true,
                Duration::from_secs_f32(10.0),
            ),
            ..Default::default()
        });
        clock.advance(Duration::from_millis(9_999));
        assert!(!ctrl.should_auto_end_session());
        clock.advance(Duration::from_millis(2));
        assert!(ctrl.should_auto_end_session());
    }

    #[test]
    fn no_speech_timeout_disabled_when_zero() {
        let (clock, ctrl) = controller(SessionConfig {
            auto_end: AutoEndConfig::new(
                true,
                Duration::from_secs_f32(5.0),
                Duration::from_secs_f32(2.0),
                true,
                Duration::ZERO,
            ),
            ..Default::default()
        });
        clock.advance(Duration::from_secs(3_600));
        assert!(!ctrl.should_auto_end_session(), "no_speech_timeout of 0 disables idle end");
    }

    #[test]
    fn chunk_sent_clears_speech_end_and_resets_boundary_clock() {
        let (clock, mut ctrl) = controller(SessionConfig {
            max_chunk_duration: MaxChunkDuration::Secs15,
            ..Default::default()
        });
        ctrl.speech_started();
        clock.advance(Duration::from_secs(15));
        ctrl.speech_ended();
        clock.advance(Duration::from_secs(2));
        assert!(ctrl.should_send_chunk());
        ctrl.chunk_sent();
        assert!(!ctrl.should_send_chunk(), "chunk clock just reset");
    }

    #[test]
    fn resumed_speech_resets_the_silence_anchor() {
        let (clock, mut ctrl) = controller(SessionConfig::default());
        ctrl.speech_started();
        clock.advance(Duration::from_secs(1));
        ctrl.speech_ended();
        clock.advance(Duration::from_millis(4_000));
        // Speech resumes before the 5s window elapses: the silence timer
        // must restart from the *new* speech_end, not the old one.
        ctrl.speech_started();
        clock.advance(Duration::from_millis(100));
        ctrl.speech_ended();
        clock.advance(Duration::from_millis(4_900));
        assert!(!ctrl.should_auto_end_session());
        clock.advance(Duration::from_millis(200));
        assert!(ctrl.should_auto_end_session());
    }
}
