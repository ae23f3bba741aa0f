//! Cross-component scenarios exercised end-to-end through public entry
//! points rather than a single module's internals — the equivalent of the
//! `pipeline_latency.rs` style, generalized to this crate's surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auris_core::clock::{MockClock, SystemClock};
use auris_core::queue::TranscriptionQueue;
use auris_core::session::{SessionConfig, SessionController};
use auris_core::streaming::{self, LiveStreamingController, StreamingUpdate};
use auris_core::transcription::provider::{ProviderEvent, StreamingSession, TranscriptionResult, Word};
use auris_core::{OAuthCallbackServer, OAuthCredentials, TokenRefreshCoordinator};
use tokio::sync::mpsc;

fn result(transcript: &str, speech_final: bool) -> TranscriptionResult {
    TranscriptionResult {
        transcript: transcript.to_string(),
        confidence: None,
        speech_final,
        words: Vec::<Word>::new(),
    }
}

/// A session that replays a fixed script of events, then closes.
struct ScriptedSession {
    events: std::collections::VecDeque<ProviderEvent>,
}

#[async_trait]
impl StreamingSession for ScriptedSession {
    async fn next_event(&mut self) -> Option<ProviderEvent> {
        match self.events.pop_front() {
            Some(event) => Some(event),
            None => None,
        }
    }

    async fn send_audio(&mut self, _pcm16: &[u8]) -> auris_core::error::Result<()> {
        Ok(())
    }

    async fn finalize(&mut self) -> auris_core::error::Result<()> {
        Ok(())
    }

    async fn close(&mut self) {}
}

/// S1: progressive interim then an identical final appends a trailing
/// space, driven through `streaming::run` (not `handle_event` directly).
#[tokio::test]
async fn s1_progressive_interim_then_identical_final() {
    let session = ScriptedSession {
        events: std::collections::VecDeque::from(vec![
            ProviderEvent::Interim(result("hel", false)),
            ProviderEvent::Interim(result("hello", false)),
            ProviderEvent::Interim(result("hello world", false)),
            ProviderEvent::FinalResult(result("hello world", false)),
            ProviderEvent::Closed,
        ]),
    };
    let controller = LiveStreamingController::new(Duration::ZERO);
    let (tx, mut rx) = mpsc::channel(16);
    streaming::run(controller, Box::new(session), tx).await;

    let mut typed = String::new();
    while let Some(update) = rx.recv().await {
        if let StreamingUpdate::Text(t) = update {
            for _ in 0..t.delete_graphemes {
                typed.pop();
            }
            typed.push_str(&t.text_to_insert);
        }
    }
    assert_eq!(typed, "hello world ");
}

/// S2: "recognise" -> "recognize" deletes 2 graphemes and retypes "ze".
#[tokio::test]
async fn s2_interim_correction_retypes_only_the_tail() {
    let session = ScriptedSession {
        events: std::collections::VecDeque::from(vec![
            ProviderEvent::Interim(result("recognise", false)),
            ProviderEvent::Interim(result("recognize", false)),
            ProviderEvent::Closed,
        ]),
    };
    let controller = LiveStreamingController::new(Duration::ZERO);
    let (tx, mut rx) = mpsc::channel(16);
    streaming::run(controller, Box::new(session), tx).await;

    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        if let StreamingUpdate::Text(t) = update {
            updates.push(t);
        }
    }
    assert_eq!(updates[1].delete_graphemes, 2);
    assert_eq!(updates[1].text_to_insert, "ze");
}

/// S3: at 4.9s of silence auto-end must not fire; at 5.1s it must.
#[test]
fn s3_silence_boundary_below_threshold_does_not_auto_end() {
    let clock = Arc::new(MockClock::new());
    let mut controller = SessionController::new(clock.clone(), SessionConfig::default());

    controller.speech_started();
    clock.advance(Duration::from_secs(2));
    controller.speech_ended();

    clock.advance(Duration::from_millis(4_900));
    assert!(!controller.should_auto_end_session());

    clock.advance(Duration::from_millis(200));
    assert!(controller.should_auto_end_session());
}

/// S4: a ticket from a session `reset()` has invalidated must be dropped
/// even when its (stale) sequence collides with a fresh one.
#[tokio::test]
async fn s4_session_bleed_is_blocked() {
    let queue = TranscriptionQueue::new();
    let stale = queue.next_sequence();
    queue.reset();
    let fresh = queue.next_sequence();

    queue.submit_result(stale, "STALE");
    queue.submit_result(fresh, "FRESH");

    let stream = queue.text_stream();
    let first = tokio::time::timeout(Duration::from_millis(200), stream.recv())
        .await
        .expect("should not block")
        .unwrap();
    assert_eq!(first, "FRESH");
}

/// S5: out-of-order submission plus one failure still yields ascending,
/// gap-free delivery order.
#[tokio::test]
async fn s5_queue_ordering_survives_a_failure() {
    let queue = TranscriptionQueue::new();
    let t0 = queue.next_sequence();
    let t1 = queue.next_sequence();
    let t2 = queue.next_sequence();

    queue.submit_result(t2, "c");
    queue.mark_failed(t0);
    queue.submit_result(t1, "b");

    let stream = queue.text_stream();
    let mut texts = Vec::new();
    for _ in 0..2 {
        texts.push(
            tokio::time::timeout(Duration::from_millis(200), stream.recv())
                .await
                .expect("should not block")
                .unwrap(),
        );
    }
    assert_eq!(texts, vec!["b", "c"]);
}

/// S6: a session that recorded speech but whose overall speech ratio is
/// below the skip threshold must still flush the final chunk on `stop()`
/// rather than have it silently skipped.
#[tokio::test]
async fn s6_stop_preserves_diluted_speech() {
    use auris_core::recorder::{self, AudioSource, DEFAULT_SKIP_THRESHOLD};
    use auris_core::session::SessionConfig;
    use auris_core::vad::processor::VadProfile;
    use auris_core::vad::VADProcessor;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct ScriptedSource {
        sample_rate: u32,
        script: StdMutex<VecDeque<Vec<f32>>>,
    }

    impl AudioSource for ScriptedSource {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
        fn pull(&mut self) -> Vec<f32> {
            self.script.lock().unwrap().pop_front().unwrap_or_default()
        }
    }

    // 2s of loud "speech" followed by 5s of near-silence in one pull: the
    // buffered-average speech probability ends up well under the skip
    // threshold, but the session did record speech, so the bypass keeps
    // the final chunk instead of discarding it as noise.
    let mut script = vec![0.6_f32; 16_000 * 2];
    script.extend(vec![0.0_f32; 16_000 * 5]);
    let source = Box::new(ScriptedSource {
        sample_rate: 16_000,
        script: StdMutex::new(std::collections::VecDeque::from(vec![script])),
    });
    let vad = VADProcessor::from_cache(VadProfile::default()).await;
    let session = SessionController::new(Arc::new(SystemClock), SessionConfig::default());

    let (handle, mut chunks, _activity, _auto_end) =
        recorder::start(source, vad, session, 16_000, 30.0, 20, DEFAULT_SKIP_THRESHOLD).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.stop().await;

    let chunk = tokio::time::timeout(Duration::from_secs(1), chunks.recv())
        .await
        .expect("stop() must still flush the diluted-speech chunk")
        .expect("channel should not be closed without a chunk");
    assert!(chunk.duration_seconds >= 6.5);
}

/// S7: a callback whose `state` doesn't match what was requested is
/// rejected with HTTP 400 and never surfaces a code to the waiter.
#[tokio::test]
async fn s7_oauth_state_mismatch_is_rejected() {
    let server = OAuthCallbackServer::start("legit").await.unwrap();
    let uri = server.redirect_uri();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{uri}?code=stolen&state=attacker"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let result = server.wait_for_code(Duration::from_millis(200)).await;
    assert!(result.is_err(), "a state mismatch must never hand back a code");
}

/// S8: single-flight refresh that fails once, then succeeds on retry —
/// exactly two upstream calls total, never more.
#[tokio::test]
async fn s8_single_flight_refresh_recovers_after_a_transient_failure() {
    use axum::extract::State as AxumState;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;

    struct Endpoint {
        calls: AtomicU32,
    }

    async fn handler(
        AxumState(endpoint): AxumState<Arc<Endpoint>>,
        _body: String,
    ) -> (axum::http::StatusCode, Json<serde_json::Value>) {
        let call = endpoint.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "transient"})),
            )
        } else {
            (
                axum::http::StatusCode::OK,
                Json(serde_json::json!({"access_token": "recovered", "account_id": "acct-1"})),
            )
        }
    }

    let state = Arc::new(Endpoint { calls: AtomicU32::new(0) });
    let app = Router::new().route("/token", post(handler)).with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let coordinator = TokenRefreshCoordinator::new(format!("http://{addr}/token"), "client-1").unwrap();
    let stale = OAuthCredentials {
        access_token: "stale".into(),
        refresh_token: "rt".into(),
        id_token: None,
        account_id: "acct-1".into(),
        last_refresh: chrono::Utc::now() - chrono::Duration::hours(25),
    };

    let first = coordinator.refresh(&stale).await;
    assert!(first.is_err(), "first call observes the transient failure");

    let second = coordinator.refresh(&stale).await.unwrap();
    assert_eq!(second.access_token, "recovered");
    assert_eq!(state.calls.load(Ordering::SeqCst), 2);
}
