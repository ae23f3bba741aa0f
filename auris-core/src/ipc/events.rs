//! Event types emitted over the Tauri IPC channel.
//!
//! ## Channel names
//!
//! | Event | Channel |
//! |-------|---------|
//! | `TranscriptEvent` | `"auris://transcript"` |
//! | `RecordingStatusEvent` | `"auris://status"` |
//! | `AudioActivityEvent` | `"auris://activity"` |
//!
//! TypeScript mirrors live in the app frontend's `ipc_types.ts`.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transcript events
// ---------------------------------------------------------------------------

/// Emitted on channel `"auris://transcript"` when the pipeline produces output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// One or more transcript segments from this inference pass.
    pub segments: Vec<TranscriptSegment>,
}

/// A single recognised speech segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    /// Unique ID for this utterance (stable across partial→final updates).
    pub id: String,
    /// Recognised text.
    pub text: String,
    /// Whether this is a streaming partial or a committed final.
    pub kind: SegmentKind,
    /// Model confidence in [0.0, 1.0], if available.
    pub confidence: Option<f32>,
}

/// Distinguishes streaming partials from committed finals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// Streaming partial — text may change on the next event with the same `id`.
    Partial,
    /// Committed final — the utterance is complete and will not change.
    Final,
}

// ---------------------------------------------------------------------------
// Audio activity events
// ---------------------------------------------------------------------------

/// Emitted on channel `"auris://activity"` for each processed audio chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the chunk in [0.0, 1.0].
    pub rms: f32,
    /// VAD decision for the current chunk.
    pub is_speech: bool,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted on channel `"auris://status"` when `RecordingController`'s state
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatusEvent {
    pub state: RecordingState,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// `RecordingController`'s lifecycle state (see `controller::RecordingController`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No session active; `start()` may be called.
    Idle,
    /// Actively capturing audio for the current push-to-talk session.
    Recording,
    /// Capture stopped; flushing the final buffered chunk to the queue.
    ProcessingFinal,
}
