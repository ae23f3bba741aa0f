//! `TranscriptionService` — HTTP multipart upload to a batch transcription
//! endpoint, with size-scaled timeouts, retry/backoff, and truncated error
//! bodies in failure logs.
//!
//! Follows the cloud-fallback upload shape used elsewhere in this codebase
//! (multipart part named `"file"`, filename `"audio.wav"`, mime
//! `audio/wav`) and the `reqwest::Client` construction pattern used for
//! other outbound HTTP here (timeout + explicit `User-Agent`), built fully
//! async throughout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::provider::{BatchTranscriptionProvider, TranscriptionResult};
use super::rate_limiter::RateLimiter;
use crate::auth::{OAuthCredentials, TokenRefreshCoordinator};
use crate::buffering::AudioChunk;
use crate::error::{EngineError, Result};

/// Additional retries after the first attempt — three total attempts, 250ms
/// initial backoff doubling, capped at 2s.
const MAX_RETRIES: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Error-body bytes kept when surfacing/logging a failed response. Short
/// bodies are shown verbatim with no padding.
const MAX_ERROR_BODY_BYTES: usize = 200;

/// Chunk size at/under which the base timeout applies.
const BASE_TIMEOUT_DATA_SIZE: usize = 1_000_000;
/// Chunk size at/over which the max timeout applies; also the hard reject
/// threshold for `AudioTooLarge`.
const MAX_AUDIO_SIZE_BYTES: usize = 25 * 1024 * 1024;
const BASE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TIMEOUT: Duration = Duration::from_secs(60);

enum UploadError {
    Retryable { err: EngineError, retry_after: Option<Duration> },
    Permanent(EngineError),
}

/// Proactive refresh margin: a credential this close to the hard 24h expiry
/// (`auth::EXPIRY_WINDOW - REFRESH_MARGIN`, not `REFRESH_MARGIN` itself) is
/// refreshed before use rather than left to fail mid-upload.
const REFRESH_MARGIN: chrono::Duration = chrono::Duration::minutes(5);

pub struct TranscriptionService {
    client: Client,
    endpoint: String,
    credentials: Arc<RwLock<OAuthCredentials>>,
    rate_limiter: Arc<RateLimiter>,
    token_refresh: Option<Arc<TokenRefreshCoordinator>>,
}

impl TranscriptionService {
    pub fn new(
        endpoint: impl Into<String>,
        credentials: Arc<RwLock<OAuthCredentials>>,
        rate_limiter: Arc<RateLimiter>,
        token_refresh: Option<Arc<TokenRefreshCoordinator>>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("auris/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Transcription(format!("http client build: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            credentials,
            rate_limiter,
            token_refresh,
        })
    }

    /// Refresh credentials ahead of expiry if a coordinator was supplied,
    /// writing the result back into the shared slot other readers observe.
    async fn refresh_if_needed(&self) {
        let Some(coordinator) = &self.token_refresh else {
            return;
        };
        let snapshot = self.credentials.read().clone();
        let proactive_window = crate::auth::EXPIRY_WINDOW - REFRESH_MARGIN;
        if snapshot.access_token.is_empty() || !snapshot.should_refresh(chrono::Utc::now(), proactive_window) {
            return;
        }
        match coordinator.refresh(&snapshot).await {
            Ok(refreshed) => *self.credentials.write() = refreshed,
            Err(e) => warn!(error = %e, "proactive token refresh failed, continuing with stale credentials"),
        }
    }

    /// Request timeout, linearly interpolated on byte size between
    /// `BASE_TIMEOUT_DATA_SIZE`/`BASE_TIMEOUT` and
    /// `MAX_AUDIO_SIZE_BYTES`/`MAX_TIMEOUT`.
    fn timeout_for(size_bytes: usize) -> Duration {
        if size_bytes <= BASE_TIMEOUT_DATA_SIZE {
            return BASE_TIMEOUT;
        }
        if size_bytes >= MAX_AUDIO_SIZE_BYTES {
            return MAX_TIMEOUT;
        }
        let span = (MAX_AUDIO_SIZE_BYTES - BASE_TIMEOUT_DATA_SIZE) as f64;
        let offset = (size_bytes - BASE_TIMEOUT_DATA_SIZE) as f64;
        let fraction = offset / span;
        let base = BASE_TIMEOUT.as_secs_f64();
        let max = MAX_TIMEOUT.as_secs_f64();
        Duration::from_secs_f64(base + fraction * (max - base))
    }

    async fn upload_once(&self, chunk: &AudioChunk) -> std::result::Result<TranscriptionResult, UploadError> {
        let (access_token, account_id) = {
            let creds = self.credentials.read();
            (creds.access_token.clone(), creds.account_id.clone())
        };

        let part = Part::bytes(chunk.wav_bytes.clone())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| UploadError::Permanent(EngineError::Transcription(format!("multipart part: {e}"))))?;
        let form = Form::new().part("file", part);

        let timeout = Self::timeout_for(chunk.wav_bytes.len());
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&access_token)
            .header("ChatGPT-Account-Id", &account_id)
            .header("originator", "Codex Desktop")
            .timeout(timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                let err = if e.is_timeout() {
                    EngineError::TranscriptionTimeout(timeout)
                } else {
                    EngineError::Transcription(e.to_string())
                };
                UploadError::Retryable { err, retry_after: None }
            })?;

        let status = response.status();
        if status.is_success() {
            let payload: serde_json::Value = response.json().await.map_err(|e| {
                UploadError::Permanent(EngineError::Transcription(format!("invalid response body: {e}")))
            })?;
            return Ok(parse_result(&payload));
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        let truncated = truncate_error_body(&body);
        let err = EngineError::Transcription(format!("provider returned {status}: {truncated}"));

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(UploadError::Retryable { err, retry_after })
        } else {
            // 401/403/other 4xx: permanent, never retried.
            Err(UploadError::Permanent(err))
        }
    }
}

fn parse_result(payload: &serde_json::Value) -> TranscriptionResult {
    let transcript = payload
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let confidence = payload.get("confidence").and_then(|v| v.as_f64()).map(|c| c as f32);
    TranscriptionResult {
        transcript,
        confidence,
        speech_final: true,
        words: Vec::new(),
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Truncate a response body to `MAX_ERROR_BODY_BYTES` UTF-8 bytes, never
/// splitting a multi-byte character, appending `"…"` only when truncated.
fn truncate_error_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_BYTES {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_BYTES;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

#[async_trait]
impl BatchTranscriptionProvider for TranscriptionService {
    fn is_configured(&self) -> bool {
        !self.credentials.read().access_token.is_empty()
    }

    async fn transcribe(&self, chunk: &AudioChunk) -> Result<TranscriptionResult> {
        if chunk.wav_bytes.len() > MAX_AUDIO_SIZE_BYTES {
            return Err(EngineError::AudioTooLarge {
                size: chunk.wav_bytes.len(),
                max_size: MAX_AUDIO_SIZE_BYTES,
            });
        }

        self.refresh_if_needed().await;

        let mut backoff = RETRY_BASE_DELAY;
        for attempt in 0..=MAX_RETRIES {
            self.rate_limiter.wait_and_record().await?;
            match self.upload_once(chunk).await {
                Ok(result) => return Ok(result),
                Err(UploadError::Permanent(err)) => {
                    debug!(error = %err, "transcription upload failed permanently, not retrying");
                    return Err(err);
                }
                Err(UploadError::Retryable { err, retry_after }) => {
                    warn!(attempt, error = %err, "transcription upload attempt failed");
                    if attempt == MAX_RETRIES {
                        return Err(err);
                    }
                    let delay = retry_after.unwrap_or(backoff);
                    tokio::time::sleep(delay).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        unreachable!("loop always returns by the final retry attempt")
    }
}
