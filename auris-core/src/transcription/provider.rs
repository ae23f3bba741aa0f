//! External transcription provider capability traits — batch (one chunk in,
//! one transcript out) and streaming (a long-lived session emitting
//! incremental events).

use async_trait::async_trait;

use crate::buffering::AudioChunk;
use crate::error::Result;

/// One recognised word within a [`TranscriptionResult`]. Optional — most
/// providers populate it only on final results, if at all.
#[derive(Debug, Clone)]
pub struct Word {
    pub text: String,
    pub start_seconds: f32,
    pub end_seconds: f32,
    pub confidence: Option<f32>,
}

/// Result of transcribing one span of audio, batch or streaming alike.
/// `words` may be empty; only `transcript` and `speech_final` are
/// load-bearing for delivery/diffing decisions.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub transcript: String,
    pub confidence: Option<f32>,
    pub speech_final: bool,
    pub words: Vec<Word>,
}

/// A provider that accepts one complete audio chunk and returns one
/// complete transcript. Used by [`crate::transcription::TranscriptionService`]
/// and submitted into [`crate::queue::TranscriptionQueue`] by the caller.
#[async_trait]
pub trait BatchTranscriptionProvider: Send + Sync {
    /// Whether this provider has the credentials/configuration it needs to
    /// accept a chunk right now. Feeds the dictation-readiness guard.
    fn is_configured(&self) -> bool;

    async fn transcribe(&self, chunk: &AudioChunk) -> Result<TranscriptionResult>;
}

/// Incremental events a streaming provider emits as it recognises speech.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Text that may still change before the matching `FinalResult`.
    Interim(TranscriptionResult),
    /// Committed text for the current utterance.
    FinalResult(TranscriptionResult),
    /// The provider considers the utterance over; carries the end time (in
    /// seconds) of the last recognised word.
    UtteranceEnd(f32),
    /// The provider detected the start of speech, at the given timestamp.
    SpeechStarted(f32),
    /// Provider-assigned identifier for the in-flight request, informational
    /// only.
    Metadata(String),
    /// A recoverable error for the current utterance; does not end the
    /// session by itself.
    Error(String),
    /// The provider closed the connection.
    Closed,
}

/// Parameters a [`StreamingProvider`] needs to open a session. Kept minimal;
/// providers with additional configuration knobs extend this as needed.
#[derive(Debug, Clone)]
pub struct StreamingSessionConfig {
    pub sample_rate_hz: u32,
    pub language: Option<String>,
}

/// A single open streaming connection. Audio flows in as 16-bit PCM, events
/// flow out one at a time via `next_event`.
#[async_trait]
pub trait StreamingSession: Send {
    /// Await the next event, or `None` once the session is exhausted.
    async fn next_event(&mut self) -> Option<ProviderEvent>;

    /// Send the next span of little-endian 16-bit PCM, 16 kHz mono.
    async fn send_audio(&mut self, pcm16: &[u8]) -> Result<()>;

    /// Signal that no more audio is coming for the current utterance; the
    /// provider should emit its closing events shortly after.
    async fn finalize(&mut self) -> Result<()>;

    /// Tear the connection down. Idempotent.
    async fn close(&mut self);
}

/// A provider that accepts a live audio stream and emits incremental
/// [`ProviderEvent`]s over a [`StreamingSession`]. Distinct from the batch
/// provider because streaming providers are long-lived connections, not
/// one-shot requests.
#[async_trait]
pub trait StreamingProvider: Send + Sync {
    /// Whether this provider has the credentials/configuration it needs to
    /// open a session right now.
    fn is_configured(&self) -> bool;

    /// Build the session configuration this provider wants for the current
    /// settings.
    fn build_session_config(&self) -> StreamingSessionConfig;

    async fn start_session(&self, config: StreamingSessionConfig) -> Result<Box<dyn StreamingSession>>;
}
