//! `TextSink` — the capability boundary for inserting recognised text into
//! whatever application currently has focus.
//!
//! The concrete implementation (SendInput/clipboard on Windows) lives in
//! `auris-app`. Accessibility APIs beyond focused-process text insertion are
//! out of scope; this trait only contracts the behavior the engine actually
//! depends on.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Handle identifying the window/process a [`TextSink`] captured as its
/// insertion target, used to detect focus changes mid-utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusTarget {
    pub process_name: String,
}

/// The capability the engine inserts/corrects recognised text through:
/// capture a focus target, insert/delete graphemes against it, press enter,
/// and query/restore focus.
#[async_trait]
pub trait TextSink: Send + Sync {
    /// Record the currently focused window/process as this sink's target
    /// for the rest of the session.
    async fn capture_target(&self) -> Option<FocusTarget>;

    /// Insert `text` at the caret in the captured target.
    async fn insert(&self, text: &str) -> Result<()>;

    /// Delete `graphemes` grapheme clusters immediately before the caret.
    async fn delete(&self, graphemes: usize) -> Result<()>;

    /// Press Enter in the captured target (used after a successful stop).
    async fn press_enter(&self) -> Result<()>;

    /// Whether the captured target's owning process is still the
    /// foreground application.
    async fn is_target_app_frontmost(&self) -> bool;

    /// Wait up to `timeout` for the captured target to regain focus,
    /// returning whether it did.
    async fn ensure_target_focused(&self, timeout: Duration) -> bool;

    /// Discard the captured target and any queued insertions (used on
    /// cancel).
    async fn cancel_and_reset(&self);
}

/// A `TextSink` that drops everything — used on platforms with no concrete
/// adapter and in tests that don't care about insertion.
pub struct NullTextSink;

#[async_trait]
impl TextSink for NullTextSink {
    async fn capture_target(&self) -> Option<FocusTarget> {
        None
    }

    async fn insert(&self, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _graphemes: usize) -> Result<()> {
        Ok(())
    }

    async fn press_enter(&self) -> Result<()> {
        Ok(())
    }

    async fn is_target_app_frontmost(&self) -> bool {
        true
    }

    async fn ensure_target_focused(&self, _timeout: Duration) -> bool {
        true
    }

    async fn cancel_and_reset(&self) {}
}
