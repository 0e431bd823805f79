//! Event types broadcast by the synthesis coordinator.
//!
//! ## Streams
//!
//! | Event | Subscribe via |
//! |-------|---------------|
//! | `SegmentReady` | `SynthesisCoordinator::subscribe_ready` |
//! | `SynthesisStarted` | `SynthesisCoordinator::subscribe_started` |
//! | `SegmentFailed` | `SynthesisCoordinator::subscribe_failed` |
//! | `QueueDrained` | `SynthesisCoordinator::subscribe_drained` |
//!
//! Streams are lossy from a late subscriber's perspective: each subscriber
//! sees events from its subscription point forward. Publishers never block
//! on slow subscribers.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Segment lifecycle events
// ---------------------------------------------------------------------------

/// A segment's audio is available in the cache.
///
/// Emitted both for fresh synthesis (`from_cache == false`) and for cache
/// hits discovered at queue time or during the in-flight re-check
/// (`from_cache == true`). Cache hits carry no preceding `SynthesisStarted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentReady {
    /// Position of the segment in the current playback queue.
    pub segment_index: usize,
    /// Canonical cache key identifying the audio.
    pub cache_key: String,
    /// Audio duration in milliseconds. For cache hits without trusted
    /// metadata this is a file-size estimate.
    pub duration_ms: u64,
    /// Whether the audio was already cached (no synthesis performed).
    pub from_cache: bool,
}

/// Synthesis has been dispatched for a segment.
///
/// Emitted before the synthesizer is invoked; never emitted for cache hits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisStarted {
    pub segment_index: usize,
    pub cache_key: String,
}

/// Synthesis failed for a segment.
///
/// The coordinator does not retry; the segment index is exposed so the
/// player can decide between skip, retry, or degrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentFailed {
    pub segment_index: usize,
    pub cache_key: String,
    /// Human-readable failure description.
    pub error: String,
    /// `true` when the per-request wall-clock timeout elapsed.
    pub is_timeout: bool,
}

// ---------------------------------------------------------------------------
// Queue edge events
// ---------------------------------------------------------------------------

/// Fired when both the pending queue and the in-flight set become empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDrained {
    /// Completed synthesis count at the time of the edge.
    pub completed: u64,
    /// Failed synthesis count at the time of the edge.
    pub failed: u64,
}
