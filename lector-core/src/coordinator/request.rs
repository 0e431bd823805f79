//! Request model: cache keys, priorities, and queue ordering.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Scheduling priority. Higher variants dispatch first; FIFO within a
/// priority. A later request for the same cache key may raise the priority
/// of a pending request but never lower it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Background,
    Prefetch,
    Immediate,
}

/// Characters treated as segment separators when deriving an engine id
/// from a voice id (e.g. `"kokoro_af_bella"` → `"kokoro"`).
const VOICE_SEPARATORS: &[char] = &['/', ':', '_', '-'];

/// Derive the engine id from a voice id: the lowercased prefix up to the
/// first separator. The engine set is open; each observed engine gets its
/// own semaphore.
pub fn engine_for_voice(voice_id: &str) -> String {
    let prefix = voice_id
        .split(VOICE_SEPARATORS)
        .find(|segment| !segment.is_empty())
        .unwrap_or("");
    if prefix.is_empty() {
        "default".to_string()
    } else {
        prefix.to_ascii_lowercase()
    }
}

/// Canonical identifier for a synthesizable unit.
///
/// Deterministic over `(voice_id, normalized_text, effective_rate)`: two
/// requests with equal keys are interchangeable outputs by contract. The
/// canonical string doubles as the deduplication key and as the cache
/// filename stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    canonical: String,
}

impl CacheKey {
    /// Compute the key. Text is normalized (trimmed, inner whitespace runs
    /// collapsed to single spaces); the rate is quantized to hundredths.
    pub fn compute(voice_id: &str, text: &str, effective_rate: f32) -> Self {
        let normalized = normalize_text(text);
        let centirate = quantize_rate(effective_rate);

        let mut hasher = Sha256::new();
        hasher.update(voice_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(normalized.as_bytes());
        hasher.update(centirate.to_le_bytes());
        let digest = hasher.finalize();

        let hash: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
        Self {
            canonical: format!("{}-r{}-{}", sanitize_voice(voice_id), centirate, hash),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Collapse whitespace runs and trim the payload before hashing, so
/// re-extracted text with layout differences still dedups.
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Quantize a playback rate to hundredths, floored at 0.01.
fn quantize_rate(rate: f32) -> u32 {
    ((rate * 100.0).round() as u32).max(1)
}

/// Reduce a voice id to a filename-stem-safe token.
fn sanitize_voice(voice_id: &str) -> String {
    let cleaned: String = voice_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "voice".to_string()
    } else {
        cleaned
    }
}

/// A unit of synthesis work waiting for (or holding) a worker slot.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// Text payload to synthesize.
    pub track: String,
    pub voice_id: String,
    pub effective_rate: f32,
    /// Position in the current playback queue.
    pub segment_index: usize,
    pub priority: Priority,
    pub cache_key: CacheKey,
    pub book_id: String,
    pub chapter_index: u32,
    pub created_at: Instant,
}

/// Ordering key for the pending queue: higher priority first, admission
/// order within a priority. `seq` is a monotone admission counter, immune
/// to `Instant` resolution ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueKey {
    pub priority: Priority,
    pub seq: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_immediate_highest() {
        assert!(Priority::Immediate > Priority::Prefetch);
        assert!(Priority::Prefetch > Priority::Background);
    }

    #[test]
    fn queue_key_orders_by_priority_then_admission() {
        let hi = QueueKey { priority: Priority::Immediate, seq: 10 };
        let lo_old = QueueKey { priority: Priority::Prefetch, seq: 1 };
        let lo_new = QueueKey { priority: Priority::Prefetch, seq: 2 };

        assert!(hi < lo_old, "higher priority sorts first");
        assert!(lo_old < lo_new, "FIFO within a priority");
    }

    #[test]
    fn cache_key_is_deterministic() {
        let a = CacheKey::compute("kokoro_af_bella", "Call me Ishmael.", 1.0);
        let b = CacheKey::compute("kokoro_af_bella", "Call me Ishmael.", 1.0);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_normalizes_whitespace() {
        let a = CacheKey::compute("v1", "  hello   world ", 1.0);
        let b = CacheKey::compute("v1", "hello world", 1.0);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_quantizes_rate_to_hundredths() {
        let a = CacheKey::compute("v1", "hello", 1.004);
        let b = CacheKey::compute("v1", "hello", 0.9999);
        let c = CacheKey::compute("v1", "hello", 1.25);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn cache_key_varies_by_voice_and_text() {
        let base = CacheKey::compute("v1", "hello", 1.0);
        assert_ne!(base, CacheKey::compute("v2", "hello", 1.0));
        assert_ne!(base, CacheKey::compute("v1", "goodbye", 1.0));
    }

    #[test]
    fn cache_key_is_filename_stem_safe() {
        let key = CacheKey::compute("piper/en_US-amy", "some text", 1.5);
        assert!(key
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn engine_derivation_takes_lowercased_prefix() {
        assert_eq!(engine_for_voice("kokoro_af_bella"), "kokoro");
        assert_eq!(engine_for_voice("Piper/en_US-amy"), "piper");
        assert_eq!(engine_for_voice("supertonic:clara"), "supertonic");
        assert_eq!(engine_for_voice("plainvoice"), "plainvoice");
        assert_eq!(engine_for_voice(""), "default");
        assert_eq!(engine_for_voice("__"), "default");
    }
}
