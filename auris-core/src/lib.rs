//! # auris-core
//!
//! Real-time dictation engine SDK: captures push-to-talk audio, buffers and
//! classifies it, ships finished chunks to a cloud transcription provider in
//! order, and turns streaming provider events into minimal text deltas for
//! an application-supplied text sink.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioSource → StreamingRecorder (resample + VAD + AudioBuffer)
//!                                   │
//!                            AudioChunk ready
//!                                   │
//!                          TranscriptionQueue → BatchTranscriptionProvider
//!                                   │
//!                     ordered TranscriptionResult delivery
//! ```
//!
//! `RecordingController` owns the `Idle -> Recording -> ProcessingFinal ->
//! Idle` lifecycle across the pieces above. `LiveStreamingController` is the
//! parallel path for providers that stream partial/final text directly
//! instead of returning one result per chunk.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod auth;
pub mod buffering;
pub mod clock;
pub mod controller;
pub mod error;
pub mod ipc;
pub mod queue;
pub mod recorder;
pub mod session;
pub mod sink;
pub mod streaming;
pub mod transcription;
pub mod vad;

// Convenience re-exports for downstream crates.
pub use auth::{OAuthCallbackServer, OAuthCredentials, TokenRefreshCoordinator};
pub use buffering::{AudioBuffer, AudioChunk, Frame};
pub use clock::{Clock, SystemClock};
pub use controller::{PermissionState, RecordingConfig, RecordingController};
pub use error::EngineError;
pub use ipc::events::{
    AudioActivityEvent, RecordingState, RecordingStatusEvent, TranscriptEvent, TranscriptSegment,
};
pub use queue::{TextStreamHandle, TranscriptionQueue, TranscriptionTicket};
pub use session::{SessionConfig, SessionController};
pub use sink::TextSink;
pub use streaming::{diff_from_end, LiveStreamingController, StreamingUpdate, TextUpdate};
pub use transcription::{
    BatchTranscriptionProvider, ProviderEvent, RateLimiter, StreamingProvider, StreamingSession,
    StreamingSessionConfig, TranscriptionResult, TranscriptionService, Word,
};
