//! `LiveStreamingController` — consumes [`ProviderEvent`]s from a
//! [`crate::transcription::provider::StreamingSession`] and turns them into
//! minimal, append-only text deltas for the text sink, plus a
//! silence-driven auto-end timer.
//!
//! Diffing is done on grapheme clusters via `unicode-segmentation`, not
//! `char`s or UTF-16 code units — a naive code-unit diff would split a
//! multi-codepoint emoji or combining-mark sequence mid-cluster and send a
//! sink invalid partial text.
//!
//! Unlike a per-utterance-id map, there is exactly one "uncommitted
//! interim" in flight at a time: every `Interim`/`FinalResult` diffs
//! against it, and a `FinalResult` clears it so the next utterance's first
//! interim starts from an empty baseline.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

use crate::transcription::provider::{ProviderEvent, StreamingSession, TranscriptionResult};

/// A minimal text delta to apply to whatever the sink currently has typed:
/// delete `delete_graphemes` grapheme clusters from the end, then append
/// `text_to_insert`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUpdate {
    pub delete_graphemes: usize,
    pub text_to_insert: String,
    pub is_final: bool,
    pub full_text: String,
}

/// Everything the controller can report to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamingUpdate {
    Text(TextUpdate),
    UtteranceEnd,
    SessionClosed,
    Error(String),
    AutoEnd,
}

/// Compute the minimal suffix edit turning `previous` into `next`, measured
/// in grapheme clusters. Returns `(graphemes_to_delete, text_to_insert)`.
pub fn diff_from_end(previous: &str, next: &str) -> (usize, String) {
    let prev_graphemes: Vec<&str> = previous.graphemes(true).collect();
    let next_graphemes: Vec<&str> = next.graphemes(true).collect();

    let mut common = 0;
    while common < prev_graphemes.len()
        && common < next_graphemes.len()
        && prev_graphemes[common] == next_graphemes[common]
    {
        common += 1;
    }

    let graphemes_to_delete = prev_graphemes.len() - common;
    let text_to_insert = next_graphemes[common..].concat();
    (graphemes_to_delete, text_to_insert)
}

#[derive(Default)]
enum TimerAction {
    #[default]
    None,
    Start,
    Cancel,
}

/// Consumes provider events for a session and produces [`StreamingUpdate`]s
/// plus a silence-driven "should auto-end" timer action for the caller's
/// event loop to honor.
pub struct LiveStreamingController {
    auto_end_silence_duration: Duration,
    uncommitted_interim: String,
    has_speech_occurred: bool,
    is_active: bool,
}

impl LiveStreamingController {
    /// `auto_end_silence_duration == Duration::ZERO` disables the silence
    /// auto-end timer entirely.
    pub fn new(auto_end_silence_duration: Duration) -> Self {
        Self {
            auto_end_silence_duration,
            uncommitted_interim: String::new(),
            has_speech_occurred: false,
            is_active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    fn utterance_end_timer_action(&self) -> TimerAction {
        if self.has_speech_occurred && self.auto_end_silence_duration > Duration::ZERO {
            TimerAction::Start
        } else {
            TimerAction::None
        }
    }

    fn diff_against_interim(&mut self, result: &TranscriptionResult, is_final: bool) -> TextUpdate {
        let (delete_graphemes, mut text_to_insert) =
            diff_from_end(&self.uncommitted_interim, &result.transcript);
        if is_final && !result.transcript.is_empty() {
            text_to_insert.push(' ');
        }
        if is_final {
            self.uncommitted_interim.clear();
        } else {
            self.uncommitted_interim = result.transcript.clone();
        }
        TextUpdate {
            delete_graphemes,
            text_to_insert,
            is_final,
            full_text: result.transcript.clone(),
        }
    }

    /// Process one provider event, returning the updates it produced (zero,
    /// one, or two — a final speech-final result yields both a text update
    /// and an utterance-end) and what the caller's timer should do.
    fn handle_event(&mut self, event: ProviderEvent) -> (Vec<StreamingUpdate>, TimerAction) {
        match event {
            ProviderEvent::Interim(result) => {
                let update = self.diff_against_interim(&result, false);
                (vec![StreamingUpdate::Text(update)], TimerAction::Cancel)
            }
            ProviderEvent::FinalResult(result) => {
                let speech_final = result.speech_final;
                let update = self.diff_against_interim(&result, true);
                let mut updates = vec![StreamingUpdate::Text(update)];
                let mut timer_action = TimerAction::None;
                if speech_final {
                    updates.push(StreamingUpdate::UtteranceEnd);
                    timer_action = self.utterance_end_timer_action();
                }
                (updates, timer_action)
            }
            ProviderEvent::UtteranceEnd(_last_word_end) => {
                let timer_action = self.utterance_end_timer_action();
                (vec![StreamingUpdate::UtteranceEnd], timer_action)
            }
            ProviderEvent::SpeechStarted(_timestamp) => {
                self.has_speech_occurred = true;
                (Vec::new(), TimerAction::Cancel)
            }
            ProviderEvent::Closed => {
                self.is_active = false;
                (vec![StreamingUpdate::SessionClosed], TimerAction::Cancel)
            }
            ProviderEvent::Error(message) => {
                warn!(message, "streaming provider reported an error");
                (vec![StreamingUpdate::Error(message)], TimerAction::None)
            }
            ProviderEvent::Metadata(_request_id) => (Vec::new(), TimerAction::None),
        }
    }
}

/// Drive a [`LiveStreamingController`] against a live session's event
/// stream until the session closes, forwarding every [`StreamingUpdate`]
/// onto `updates_tx` and firing `AutoEnd` when the silence timer (only
/// ever armed while `is_active`) expires.
pub async fn run(
    mut controller: LiveStreamingController,
    mut session: Box<dyn StreamingSession>,
    updates_tx: mpsc::Sender<StreamingUpdate>,
) {
    let mut timer: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;

    while controller.is_active() {
        tokio::select! {
            event = session.next_event() => {
                let Some(event) = event else { break };
                let (updates, timer_action) = controller.handle_event(event);
                match timer_action {
                    TimerAction::Start => {
                        timer = Some(Box::pin(tokio::time::sleep(controller.auto_end_silence_duration)));
                    }
                    TimerAction::Cancel => timer = None,
                    TimerAction::None => {}
                }
                for update in updates {
                    if updates_tx.send(update).await.is_err() {
                        return;
                    }
                }
            }
            _ = async {
                match timer.as_mut() {
                    Some(t) => t.as_mut().await,
                    None => std::future::pending().await,
                }
            } => {
                timer = None;
                if updates_tx.send(StreamingUpdate::AutoEnd).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::provider::Word;

    fn result(transcript: &str, speech_final: bool) -> TranscriptionResult {
        TranscriptionResult {
            transcript: transcript.to_string(),
            confidence: None,
            speech_final,
            words: Vec::<Word>::new(),
        }
    }

    #[test]
    fn diff_from_end_handles_pure_append() {
        let (del, ins) = diff_from_end("hello", "hello world");
        assert_eq!(del, 0);
        assert_eq!(ins, " world");
    }

    #[test]
    fn diff_from_end_is_grapheme_cluster_correct() {
        let family = "\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F466}";
        let (del, ins) = diff_from_end(family, &format!("{family}{family}"));
        assert_eq!(del, 0);
        assert_eq!(ins, family);
    }

    /// Progressive interim, identical final: `insert("hel")`,
    /// `insert("lo")`, `insert(" world")`, then a final with
    /// `delete=0, typed=""` plus a trailing space — screen text ends up
    /// `"hello world "`.
    #[test]
    fn progressive_interim_then_identical_final_appends_trailing_space() {
        let mut ctrl = LiveStreamingController::new(Duration::ZERO);

        let (updates, _) = ctrl.handle_event(ProviderEvent::Interim(result("hel", false)));
        let StreamingUpdate::Text(u) = &updates[0] else { panic!() };
        assert_eq!((u.delete_graphemes, u.text_to_insert.as_str()), (0, "hel"));

        let (updates, _) = ctrl.handle_event(ProviderEvent::Interim(result("hello", false)));
        let StreamingUpdate::Text(u) = &updates[0] else { panic!() };
        assert_eq!((u.delete_graphemes, u.text_to_insert.as_str()), (0, "lo"));

        let (updates, _) = ctrl.handle_event(ProviderEvent::Interim(result("hello world", false)));
        let StreamingUpdate::Text(u) = &updates[0] else { panic!() };
        assert_eq!((u.delete_graphemes, u.text_to_insert.as_str()), (0, " world"));

        let (updates, _) = ctrl.handle_event(ProviderEvent::FinalResult(result("hello world", false)));
        let StreamingUpdate::Text(u) = &updates[0] else { panic!() };
        assert_eq!(u.delete_graphemes, 0);
        assert_eq!(u.text_to_insert, " ");
        assert!(u.is_final);
    }

    /// Interim correction: `recognise` -> `recognize` deletes 2, types "ze".
    #[test]
    fn interim_correction_deletes_and_retypes_the_tail() {
        let mut ctrl = LiveStreamingController::new(Duration::ZERO);
        ctrl.handle_event(ProviderEvent::Interim(result("recognise", false)));
        let (updates, _) = ctrl.handle_event(ProviderEvent::Interim(result("recognize", false)));
        let StreamingUpdate::Text(u) = &updates[0] else { panic!() };
        assert_eq!(u.delete_graphemes, 2);
        assert_eq!(u.text_to_insert, "ze");
    }

    #[test]
    fn empty_final_erases_the_preceding_interim() {
        let mut ctrl = LiveStreamingController::new(Duration::ZERO);
        ctrl.handle_event(ProviderEvent::Interim(result("oops", false)));
        let (updates, _) = ctrl.handle_event(ProviderEvent::FinalResult(result("", false)));
        let StreamingUpdate::Text(u) = &updates[0] else { panic!() };
        assert_eq!(u.delete_graphemes, 4);
        assert_eq!(u.text_to_insert, "");
    }

    #[test]
    fn speech_final_result_also_emits_utterance_end() {
        let mut ctrl = LiveStreamingController::new(Duration::from_secs(1));
        ctrl.has_speech_occurred = true;
        let (updates, timer_action) =
            ctrl.handle_event(ProviderEvent::FinalResult(result("done", true)));
        assert!(matches!(updates[1], StreamingUpdate::UtteranceEnd));
        assert!(matches!(timer_action, TimerAction::Start));
    }

    #[test]
    fn utterance_end_starts_timer_only_if_speech_occurred_and_duration_nonzero() {
        let mut ctrl = LiveStreamingController::new(Duration::ZERO);
        ctrl.has_speech_occurred = true;
        let (_, timer_action) = ctrl.handle_event(ProviderEvent::UtteranceEnd(1.0));
        assert!(matches!(timer_action, TimerAction::None), "zero duration disables the timer");

        let mut ctrl = LiveStreamingController::new(Duration::from_secs(1));
        let (_, timer_action) = ctrl.handle_event(ProviderEvent::UtteranceEnd(1.0));
        assert!(matches!(timer_action, TimerAction::None), "no speech occurred yet");
    }

    #[test]
    fn speech_started_sets_flag_and_cancels_timer() {
        let mut ctrl = LiveStreamingController::new(Duration::from_secs(1));
        let (updates, timer_action) = ctrl.handle_event(ProviderEvent::SpeechStarted(0.0));
        assert!(updates.is_empty());
        assert!(matches!(timer_action, TimerAction::Cancel));
        assert!(ctrl.has_speech_occurred);
    }

    #[test]
    fn closed_deactivates_and_error_does_not() {
        let mut ctrl = LiveStreamingController::new(Duration::ZERO);
        let (_, _) = ctrl.handle_event(ProviderEvent::Error("transient".into()));
        assert!(ctrl.is_active());

        let (updates, _) = ctrl.handle_event(ProviderEvent::Closed);
        assert!(matches!(updates[0], StreamingUpdate::SessionClosed));
        assert!(!ctrl.is_active());
    }

    #[test]
    fn metadata_is_ignored() {
        let mut ctrl = LiveStreamingController::new(Duration::from_secs(1));
        let (updates, timer_action) = ctrl.handle_event(ProviderEvent::Metadata("req-1".into()));
        assert!(updates.is_empty());
        assert!(matches!(timer_action, TimerAction::None));
    }
}
