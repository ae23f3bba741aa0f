//! `TranscriptionQueue` — ordered delivery of transcription text, guarded
//! against stale results from a session that has already ended.
//!
//! The queue itself never talks to a provider or makes an HTTP call; it
//! only issues [`TranscriptionTicket`]s and accepts their eventual
//! resolution via `submit_result`/`mark_failed`. Callers (the recorder,
//! `TranscriptionService`) own the upload; the queue's only job is to
//! release results in `(session, seq)` order regardless of which upload
//! finished first, and to silently drop anything stamped with a session
//! generation that `reset()` has since invalidated.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tracing::debug;

/// Identifies one issued slot's place in the delivery order. Totally
/// ordered by `(session_generation, sequence)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TranscriptionTicket {
    pub session_generation: u64,
    pub sequence: u64,
}

struct State {
    session_generation: u64,
    next_seq: u64,
    emitted_up_to: u64,
    /// `Some(text)` for a resolved slot awaiting its turn, `None` for a
    /// slot marked failed. Absent entries are either unresolved or already
    /// released.
    pending: BTreeMap<u64, Option<String>>,
    signaled_completion: bool,
    session_started: bool,
}

impl State {
    fn fresh(session_generation: u64) -> Self {
        Self {
            session_generation,
            next_seq: 0,
            emitted_up_to: 0,
            pending: BTreeMap::new(),
            signaled_completion: false,
            session_started: false,
        }
    }
}

/// A stable handle onto the queue's flushed-text stream. Every call to
/// [`TranscriptionQueue::text_stream`] clones the same underlying receiver
/// handle rather than creating a new one, so a consumer that starts
/// iterating late still observes everything flushed since the queue was
/// created.
#[derive(Clone)]
pub struct TextStreamHandle {
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<String>>>,
}

impl TextStreamHandle {
    /// Await the next flushed, non-empty text. Returns `None` once
    /// `finish_stream()` has been called and every buffered item drained.
    pub async fn recv(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }
}

/// Ordered, session-generation-guarded delivery queue.
pub struct TranscriptionQueue {
    state: parking_lot::Mutex<State>,
    text_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<String>>>,
    text_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<String>>>,
    completion: Notify,
}

impl Default for TranscriptionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptionQueue {
    pub fn new() -> Self {
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        Self {
            state: parking_lot::Mutex::new(State::fresh(0)),
            text_tx: parking_lot::Mutex::new(Some(text_tx)),
            text_rx: Arc::new(AsyncMutex::new(text_rx)),
            completion: Notify::new(),
        }
    }

    pub fn current_session_generation(&self) -> u64 {
        self.state.lock().session_generation
    }

    /// Issue the next ticket for the current session.
    pub fn next_sequence(&self) -> TranscriptionTicket {
        let mut state = self.state.lock();
        state.session_started = true;
        let ticket = TranscriptionTicket {
            session_generation: state.session_generation,
            sequence: state.next_seq,
        };
        state.next_seq += 1;
        ticket
    }

    /// Resolve `ticket` with its transcribed text. Discarded silently if
    /// `ticket` belongs to a generation `reset()` has since invalidated, or
    /// if it was already released (idempotent no-op).
    pub fn submit_result(&self, ticket: TranscriptionTicket, text: impl Into<String>) {
        self.resolve(ticket, Some(text.into()));
    }

    /// Resolve `ticket` as failed; the flush algorithm treats it exactly
    /// like a non-emitting release and continues past it.
    pub fn mark_failed(&self, ticket: TranscriptionTicket) {
        self.resolve(ticket, None);
    }

    fn resolve(&self, ticket: TranscriptionTicket, value: Option<String>) {
        let should_flush = {
            let mut state = self.state.lock();
            if ticket.session_generation != state.session_generation {
                debug!(
                    ticket.session_generation,
                    current = state.session_generation,
                    "dropping stale transcription result from a previous session"
                );
                false
            } else if ticket.sequence < state.emitted_up_to {
                // Already released — resubmission is a no-op.
                false
            } else {
                state.pending.insert(ticket.sequence, value);
                true
            }
        };
        if should_flush {
            self.flush();
        }
    }

    /// Release every contiguous resolved slot starting at `emitted_up_to`,
    /// then check whether the session just completed.
    fn flush(&self) {
        let mut to_send = Vec::new();
        let just_completed = {
            let mut state = self.state.lock();
            while let Some(value) = state.pending.remove(&state.emitted_up_to) {
                if let Some(text) = value {
                    if !text.is_empty() {
                        to_send.push(text);
                    }
                }
                state.emitted_up_to += 1;
            }
            if state.emitted_up_to == state.next_seq
                && state.session_started
                && !state.signaled_completion
            {
                state.signaled_completion = true;
                true
            } else {
                false
            }
        };

        if let Some(tx) = self.text_tx.lock().as_ref() {
            for text in to_send {
                let _ = tx.send(text);
            }
        }
        if just_completed {
            self.completion.notify_waiters();
        }
    }

    /// Start a new session: bumps the generation (invalidating any ticket
    /// issued before this call), drops everything still pending, and zeroes
    /// the sequence/emission counters. Never touches the text-stream
    /// channel itself — a consumer iterating across the reset keeps its
    /// handle.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let next_generation = state.session_generation + 1;
        *state = State::fresh(next_generation);
    }

    /// Count of issued tickets not yet released (resolved-and-flushed or
    /// failed-and-flushed).
    pub fn get_pending_count(&self) -> usize {
        let state = self.state.lock();
        (state.next_seq - state.emitted_up_to) as usize
    }

    /// A stable handle onto the flushed-text stream; repeated calls return
    /// clones of the same underlying receiver, never a second independent
    /// stream.
    pub fn text_stream(&self) -> TextStreamHandle {
        TextStreamHandle {
            rx: Arc::clone(&self.text_rx),
        }
    }

    /// Await the current session's completion signal: every issued ticket
    /// has been released. Fires once per session; a session with no issued
    /// tickets never completes (there is nothing to wait on).
    pub async fn wait_for_completion(&self) {
        loop {
            let notified = self.completion.notified();
            if self.state.lock().signaled_completion {
                return;
            }
            notified.await;
        }
    }

    /// End the text stream (closing it for any consumer still iterating)
    /// and resume any outstanding completion waiter.
    pub fn finish_stream(&self) {
        self.text_tx.lock().take();
        self.completion.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn queue_ordering_yields_ascending_seq_regardless_of_submit_order() {
        let queue = TranscriptionQueue::new();
        let t0 = queue.next_sequence();
        let t1 = queue.next_sequence();
        let t2 = queue.next_sequence();

        queue.submit_result(t2, "c");
        queue.submit_result(t0, "a");
        queue.submit_result(t1, "b");

        let stream = queue.text_stream();
        let mut texts = Vec::new();
        for _ in 0..3 {
            texts.push(stream.recv().await.unwrap());
        }
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    /// Tickets `t0,t1,t2` issued. `t2` submitted first, `t0` marked failed,
    /// then `t1` submitted — the stream must yield `["b", "c"]`, skipping
    /// the failed slot as though it had emitted.
    #[tokio::test]
    async fn failed_ticket_is_skipped_like_an_empty_emission() {
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

    /// Issue `ticket0`=(session=0,seq=0). `reset()`. Issue
    /// `ticket1`=(session=1,seq=0). Submit `ticket0` ("STALE") then
    /// `ticket1` ("FRESH") — the stream must yield only "FRESH".
    #[tokio::test]
    async fn stale_session_result_is_dropped_even_on_seq_collision() {
        let queue = TranscriptionQueue::new();
        let stale_ticket = queue.next_sequence();
        queue.reset();
        let fresh_ticket = queue.next_sequence();
        assert_eq!(stale_ticket.sequence, fresh_ticket.sequence);
        assert_ne!(stale_ticket.session_generation, fresh_ticket.session_generation);

        queue.submit_result(stale_ticket, "STALE");
        queue.submit_result(fresh_ticket, "FRESH");

        let stream = queue.text_stream();
        let first = tokio::time::timeout(Duration::from_millis(200), stream.recv())
            .await
            .expect("should not block")
            .unwrap();
        assert_eq!(first, "FRESH");
    }

    #[tokio::test]
    async fn empty_texts_are_not_yielded_but_still_count_toward_completion() {
        let queue = TranscriptionQueue::new();
        let t0 = queue.next_sequence();
        let t1 = queue.next_sequence();
        queue.submit_result(t0, "");
        queue.submit_result(t1, "only-one");

        let stream = queue.text_stream();
        let text = tokio::time::timeout(Duration::from_millis(200), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "only-one");

        tokio::time::timeout(Duration::from_millis(200), queue.wait_for_completion())
            .await
            .expect("completion should have fired once both tickets resolved");
    }

    #[tokio::test]
    async fn text_stream_returns_a_stable_handle() {
        let queue = TranscriptionQueue::new();
        let a = queue.text_stream();
        let b = queue.text_stream();

        let t0 = queue.next_sequence();
        queue.submit_result(t0, "shared");

        // Either handle observes the single item; it's the same channel.
        let via_a = tokio::time::timeout(Duration::from_millis(200), a.recv())
            .await
            .unwrap();
        assert_eq!(via_a, Some("shared".to_string()));
        drop(b);
    }

    #[tokio::test]
    async fn finish_stream_closes_it_for_a_waiting_consumer() {
        let queue = TranscriptionQueue::new();
        let stream = queue.text_stream();
        queue.finish_stream();
        let result = tokio::time::timeout(Duration::from_millis(200), stream.recv())
            .await
            .expect("closed stream must resolve promptly");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn wait_for_completion_never_fires_for_a_session_with_no_tickets() {
        let queue = TranscriptionQueue::new();
        let result = tokio::time::timeout(Duration::from_millis(100), queue.wait_for_completion()).await;
        assert!(result.is_err(), "nothing was issued, so nothing can complete");
    }

    #[test]
    fn pending_count_tracks_unresolved_tickets() {
        let queue = TranscriptionQueue::new();
        let t0 = queue.next_sequence();
        let _t1 = queue.next_sequence();
        assert_eq!(queue.get_pending_count(), 2);
        queue.submit_result(t0, "a");
        assert_eq!(queue.get_pending_count(), 1);
    }
}
