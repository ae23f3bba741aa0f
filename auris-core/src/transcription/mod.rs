//! Transcription providers and rate limiting.

pub mod provider;
pub mod rate_limiter;
pub mod service;

pub use provider::{
    BatchTranscriptionProvider, ProviderEvent, StreamingProvider, StreamingSession,
    StreamingSessionConfig, TranscriptionResult, Word,
};
pub use rate_limiter::RateLimiter;
pub use service::TranscriptionService;
