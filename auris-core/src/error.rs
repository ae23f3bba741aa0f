use thiserror::Error;

/// All errors produced by auris-core.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("audio buffer is full — recorder cannot keep up")]
    BufferFull,

    #[error("recorder is already running")]
    AlreadyRunning,

    #[error("recorder is not running")]
    NotRunning,

    #[error("transcription request failed: {0}")]
    Transcription(String),

    #[error("transcription request timed out after {0:?}")]
    TranscriptionTimeout(std::time::Duration),

    #[error("rate limit exceeded, retry after {0:?}")]
    RateLimited(std::time::Duration),

    #[error("OAuth token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("OAuth callback state mismatch")]
    OAuthStateMismatch,

    #[error("OAuth callback server failed: {0}")]
    OAuthServer(String),

    #[error("credentials file is a symlink, refusing to read/write: {0}")]
    CredentialsSymlink(std::path::PathBuf),

    #[error("text sink rejected insertion: focused window changed")]
    FocusChanged,

    #[error("audio too large: {size} bytes exceeds cap of {max_size} bytes")]
    AudioTooLarge { size: usize, max_size: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
