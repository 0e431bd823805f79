//! Collaborator seams: the TTS backend and the persistent audio cache.
//!
//! Both are consumed interfaces — lector-core produces no audio samples and
//! persists nothing itself. Implementations live with the host application
//! (engine sidecars, on-disk cache, …).

use std::path::PathBuf;

use async_trait::async_trait;

use crate::coordinator::request::CacheKey;
use crate::error::Result;

/// Output of a single synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// Path of the produced audio file.
    pub file_path: PathBuf,
    /// Audio duration in milliseconds.
    pub duration_ms: u64,
    /// Sample rate of the produced audio.
    pub sample_rate: u32,
}

/// Contract for TTS synthesis backends.
///
/// Must be safe to invoke concurrently — the coordinator already bounds
/// concurrency per engine, so implementations need no extra gating.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` with the given voice at `effective_rate`.
    ///
    /// # Errors
    /// Returns an error when the engine fails; the coordinator reports it
    /// per-segment and continues with the rest of the queue.
    async fn synthesize(
        &self,
        voice_id: &str,
        text: &str,
        effective_rate: f32,
    ) -> Result<SynthesizedAudio>;
}

/// Metadata for a cached audio entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub size_bytes: u64,
    /// Trusted audio duration, when the cache recorded one. `None` forces
    /// the coordinator to fall back to a file-size estimate.
    pub duration_ms: Option<u64>,
}

/// Contract for the persistent audio cache.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Whether audio for `key` is present and usable.
    async fn is_ready(&self, key: &CacheKey) -> bool;

    /// Metadata for `key`, if present.
    async fn entry(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Path of the cached audio file for `key`, if present.
    async fn file_for(&self, key: &CacheKey) -> Option<PathBuf>;

    /// Record a freshly synthesized entry.
    ///
    /// # Errors
    /// Failures are logged by the coordinator and are non-fatal: the audio
    /// file still exists on disk and a later reconciliation may adopt it.
    #[allow(clippy::too_many_arguments)]
    async fn register(
        &self,
        key: &CacheKey,
        size_bytes: u64,
        book_id: &str,
        chapter_index: u32,
        segment_index: usize,
        engine: &str,
        audio_duration_ms: u64,
    ) -> Result<()>;
}
