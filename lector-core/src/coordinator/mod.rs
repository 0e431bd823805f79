//! `SynthesisCoordinator` — request intake, deduplication, prioritized
//! dispatch, and lifecycle events.
//!
//! ## Dispatch flow
//!
//! ```text
//! queue_range / queue_immediate
//!     │  (cache probe outside the lock)
//!     ├─ cache hit ──────────► SegmentReady { from_cache: true }
//!     ├─ in-flight ─────────► skipped (priority frozen at dispatch)
//!     ├─ pending ───────────► priority upgraded in place
//!     └─ novel ─────────────► PendingQueue ── wake ──► worker loop
//!                                                        │
//!                                          pop highest priority, acquire
//!                                          engine semaphore ON THE WORKER
//!                                                        │
//!                                              spawn process(req)
//!                                    SynthesisStarted → Synthesizer →
//!                                    Cache::register → SegmentReady
//! ```
//!
//! The semaphore is acquired on the worker's own task before spawning, so a
//! saturated engine blocks the worker instead of piling up tasks that would
//! all wait on the same semaphore. This is the sole backpressure mechanism.
//! While the worker waits, the head request stays *pending* — still visible
//! to deduplication and still upgradable — and is popped together with its
//! in-flight registration under one lock hold once a slot frees up.
//!
//! All queue/in-flight state lives under one FIFO-fair `tokio::sync::Mutex`;
//! cache probes happen outside it and the re-check inside `process` closes
//! the race.

pub mod queue;
pub mod request;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex as AsyncMutex, Notify};
use tracing::{debug, info, warn};

use crate::error::{LectorError, Result};
use crate::events::{QueueDrained, SegmentFailed, SegmentReady, SynthesisStarted};
use crate::semaphore::DynamicSemaphore;
use crate::synth::{Cache, Synthesizer};

use self::queue::{Admission, PendingQueue};
use self::request::{engine_for_voice, CacheKey, Priority, SynthesisRequest};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Fallback audio bitrate for cache hits without a trusted duration:
/// ≈48 KB of audio per second.
const ESTIMATE_BYTES_PER_MS: u64 = 48;

/// Construction-time tunables for the coordinator.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Hard cap on the pending queue. Overflow drops the lowest-priority,
    /// newest pending request. Default: 100.
    pub max_queue_size: usize,
    /// Initial semaphore capacity for engines not listed in
    /// `engine_concurrency`. Default: 2.
    pub default_concurrency: usize,
    /// Per-engine initial concurrency overrides.
    pub engine_concurrency: HashMap<String, usize>,
    /// Wall-clock timeout per synthesis call. Default: 60 s.
    pub synthesis_timeout: Duration,
    /// When `true` all requests normalize `effective_rate` to 1.0 and the
    /// player time-stretches downstream. Default: true.
    pub rate_independent_synthesis: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            default_concurrency: 2,
            engine_concurrency: HashMap::new(),
            synthesis_timeout: Duration::from_secs(60),
            rate_independent_synthesis: true,
        }
    }
}

impl SchedulerConfig {
    /// The rate used for synthesis and cache keying: 1.0 under
    /// rate-independent mode, else the requested rate quantized to
    /// hundredths.
    pub fn effective_rate(&self, requested: f32) -> f32 {
        if self.rate_independent_synthesis {
            1.0
        } else {
            ((requested * 100.0).round().max(1.0)) / 100.0
        }
    }

    fn concurrency_for(&self, engine: &str) -> usize {
        self.engine_concurrency
            .get(engine)
            .copied()
            .unwrap_or(self.default_concurrency)
            .max(1)
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Lifetime counters, incremented from worker and process tasks.
#[derive(Default)]
pub struct CoordinatorStats {
    /// Novel requests admitted to the pending queue.
    pub queued: AtomicU64,
    /// Successful syntheses.
    pub completed: AtomicU64,
    /// Failed or timed-out syntheses.
    pub failed: AtomicU64,
    /// Cache hits, both at queue time and in the in-flight re-check.
    pub cache_hits: AtomicU64,
    /// Requests discarded: overflow victims, context-change/reset/dispose
    /// clears, and in-flight duplicates caught at dispatch.
    pub dropped: AtomicU64,
}

/// Point-in-time view of the counters plus live queue gauges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub queued: u64,
    pub completed: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub dropped: u64,
    pub pending: usize,
    pub in_flight: usize,
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

type SemaphoreListener = Box<dyn Fn(&str, &Arc<DynamicSemaphore>) + Send + Sync>;
type RegisteredHook = Box<dyn Fn(&CacheKey) -> anyhow::Result<()> + Send + Sync>;
/// `(engine, voice_id, audio_duration_ms, synth_time_ms)`
type SynthesisObserver = Box<dyn Fn(&str, &str, u64, u64) + Send + Sync>;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The remembered `(voice, effective rate)` pair. Rate is held in
/// centi-units so the key is `Eq`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ContextKey {
    voice_id: String,
    centirate: u32,
}

struct SchedulerState {
    pending: PendingQueue,
    in_flight: HashSet<String>,
    context: Option<ContextKey>,
    disposed: bool,
}

struct Shared {
    config: SchedulerConfig,
    synthesizer: Arc<dyn Synthesizer>,
    cache: Arc<dyn Cache>,
    state: AsyncMutex<SchedulerState>,
    semaphores: Mutex<HashMap<String, Arc<DynamicSemaphore>>>,
    wake: Notify,
    stats: CoordinatorStats,
    ready_tx: broadcast::Sender<SegmentReady>,
    started_tx: broadcast::Sender<SynthesisStarted>,
    failed_tx: broadcast::Sender<SegmentFailed>,
    drained_tx: broadcast::Sender<QueueDrained>,
    semaphore_listener: Mutex<Option<SemaphoreListener>>,
    registered_hook: Mutex<Option<RegisteredHook>>,
    synthesis_observer: Mutex<Option<SynthesisObserver>>,
}

enum Offer {
    CacheHit,
    Enqueued,
    Skipped,
}

impl Shared {
    /// Look up (or lazily create) the semaphore for `engine`. Creation
    /// notifies the listener so the governor can apply the learned target
    /// immediately.
    fn engine_semaphore(&self, engine: &str) -> Arc<DynamicSemaphore> {
        let created = {
            let mut map = self.semaphores.lock();
            if let Some(sem) = map.get(engine) {
                return Arc::clone(sem);
            }
            let capacity = self.config.concurrency_for(engine);
            let sem = Arc::new(DynamicSemaphore::new(capacity));
            map.insert(engine.to_string(), Arc::clone(&sem));
            info!(engine, capacity, "created engine semaphore");
            sem
        };
        if let Some(listener) = &*self.semaphore_listener.lock() {
            listener(engine, &created);
        }
        created
    }

    /// Duration for a cache hit: trusted metadata when present, otherwise
    /// the file-size estimate.
    async fn cached_duration(&self, key: &CacheKey) -> u64 {
        match self.cache.entry(key).await {
            Some(entry) => entry
                .duration_ms
                .unwrap_or(entry.size_bytes / ESTIMATE_BYTES_PER_MS),
            None => 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn offer(
        &self,
        text: &str,
        voice_id: &str,
        effective_rate: f32,
        segment_index: usize,
        priority: Priority,
        book_id: &str,
        chapter_index: u32,
    ) -> Result<Offer> {
        let cache_key = CacheKey::compute(voice_id, text, effective_rate);

        // Cache probe outside the state lock.
        if self.cache.is_ready(&cache_key).await {
            let duration_ms = self.cached_duration(&cache_key).await;
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            let _ = self.ready_tx.send(SegmentReady {
                segment_index,
                cache_key: cache_key.to_string(),
                duration_ms,
                from_cache: true,
            });
            return Ok(Offer::CacheHit);
        }

        let mut st = self.state.lock().await;
        if st.disposed {
            return Err(LectorError::Disposed);
        }
        if st.in_flight.contains(cache_key.as_str()) {
            // In-flight priority is frozen at dispatch time.
            return Ok(Offer::Skipped);
        }

        let admission = st.pending.admit(SynthesisRequest {
            track: text.to_string(),
            voice_id: voice_id.to_string(),
            effective_rate,
            segment_index,
            priority,
            cache_key: cache_key.clone(),
            book_id: book_id.to_string(),
            chapter_index,
            created_at: Instant::now(),
        });

        match admission {
            Admission::Inserted => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                while st.pending.len() > self.config.max_queue_size {
                    let Some(victim) = st.pending.drop_victim() else {
                        break;
                    };
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        cache_key = %victim.cache_key,
                        segment = victim.segment_index,
                        "queue overflow — dropped lowest-priority newest request"
                    );
                }
                Ok(Offer::Enqueued)
            }
            Admission::Upgraded => {
                debug!(cache_key = %cache_key, new_priority = ?priority, "pending priority upgraded");
                Ok(Offer::Skipped)
            }
            Admission::Duplicate => Ok(Offer::Skipped),
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// The scheduling core's primary surface: accepts synthesis requests,
/// deduplicates, prioritizes, enforces per-engine concurrency, and
/// publishes lifecycle events.
pub struct SynthesisCoordinator {
    shared: Arc<Shared>,
}

impl SynthesisCoordinator {
    /// Create the coordinator and spawn its worker loop.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        config: SchedulerConfig,
        synthesizer: Arc<dyn Synthesizer>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        let (ready_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (started_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (failed_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (drained_tx, _) = broadcast::channel(BROADCAST_CAP);

        let shared = Arc::new(Shared {
            config,
            synthesizer,
            cache,
            state: AsyncMutex::new(SchedulerState {
                pending: PendingQueue::new(),
                in_flight: HashSet::new(),
                context: None,
                disposed: false,
            }),
            semaphores: Mutex::new(HashMap::new()),
            wake: Notify::new(),
            stats: CoordinatorStats::default(),
            ready_tx,
            started_tx,
            failed_tx,
            drained_tx,
            semaphore_listener: Mutex::new(None),
            registered_hook: Mutex::new(None),
            synthesis_observer: Mutex::new(None),
        });

        tokio::spawn(worker_loop(Arc::clone(&shared)));
        Self { shared }
    }

    /// Queue segments `start..=end` of `tracks` for synthesis.
    ///
    /// Per segment, in order of check: cache hit (emit `SegmentReady`
    /// immediately), in-flight (skip), pending (upgrade priority when the
    /// offer is higher), novel (enqueue; overflow drops the
    /// lowest-priority newest pending entry).
    #[allow(clippy::too_many_arguments)]
    pub async fn queue_range(
        &self,
        tracks: &[String],
        voice_id: &str,
        playback_rate: f32,
        start: usize,
        end: usize,
        priority: Priority,
        book_id: &str,
        chapter_index: u32,
    ) -> Result<()> {
        if self.shared.state.lock().await.disposed {
            return Err(LectorError::Disposed);
        }
        if tracks.is_empty() || start >= tracks.len() {
            return Ok(());
        }
        let effective_rate = self.shared.config.effective_rate(playback_rate);
        let last = end.min(tracks.len() - 1);

        let mut enqueued = false;
        for index in start..=last {
            let offer = self
                .shared
                .offer(
                    &tracks[index],
                    voice_id,
                    effective_rate,
                    index,
                    priority,
                    book_id,
                    chapter_index,
                )
                .await?;
            enqueued |= matches!(offer, Offer::Enqueued);
        }
        if enqueued {
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    /// Queue a single segment at `Immediate` priority.
    pub async fn queue_immediate(
        &self,
        track: &str,
        voice_id: &str,
        playback_rate: f32,
        segment_index: usize,
        book_id: &str,
        chapter_index: u32,
    ) -> Result<()> {
        if self.shared.state.lock().await.disposed {
            return Err(LectorError::Disposed);
        }
        let effective_rate = self.shared.config.effective_rate(playback_rate);
        let offer = self
            .shared
            .offer(
                track,
                voice_id,
                effective_rate,
                segment_index,
                Priority::Immediate,
                book_id,
                chapter_index,
            )
            .await?;
        if matches!(offer, Offer::Enqueued) {
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    /// Switch the remembered `(voice, effective rate)` context. When the
    /// key changes, the pending queue is cleared before returning `true`;
    /// in-flight requests are not cancelled — their results land in the
    /// cache where downstream listeners may discard them.
    pub async fn update_context(&self, voice_id: &str, playback_rate: f32) -> Result<bool> {
        let effective_rate = self.shared.config.effective_rate(playback_rate);
        let key = ContextKey {
            voice_id: voice_id.to_string(),
            centirate: (effective_rate * 100.0).round() as u32,
        };

        let mut st = self.shared.state.lock().await;
        if st.disposed {
            return Err(LectorError::Disposed);
        }
        if st.context.as_ref() == Some(&key) {
            return Ok(false);
        }
        let dropped = st.pending.clear();
        self.shared
            .stats
            .dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
        st.context = Some(key);
        info!(
            voice_id,
            rate = effective_rate,
            dropped,
            "context changed — pending queue cleared"
        );
        Ok(true)
    }

    /// Clear the pending queue without touching the remembered context.
    /// Does not wait for in-flight requests; await the drained event for a
    /// synchronous drain.
    pub async fn reset(&self) {
        let mut st = self.shared.state.lock().await;
        if st.disposed {
            return;
        }
        let dropped = st.pending.clear();
        self.shared
            .stats
            .dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
        debug!(dropped, "reset — pending queue cleared");
    }

    /// Pure cache probe; no side effects.
    pub async fn is_ready(&self, voice_id: &str, text: &str, playback_rate: f32) -> bool {
        let key = CacheKey::compute(
            voice_id,
            text,
            self.shared.config.effective_rate(playback_rate),
        );
        self.shared.cache.is_ready(&key).await
    }

    /// Stop accepting work and shut the worker down. Idempotent. In-flight
    /// requests complete but their events may not be observed.
    pub async fn dispose(&self) {
        {
            let mut st = self.shared.state.lock().await;
            if st.disposed {
                return;
            }
            st.disposed = true;
            let dropped = st.pending.clear();
            self.shared
                .stats
                .dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        self.shared.wake.notify_one();
        for sem in self.shared.semaphores.lock().values() {
            sem.cancel_all_waiters("coordinator disposed");
        }
        info!("coordinator disposed");
    }

    // ── Event surface ────────────────────────────────────────────────────

    pub fn subscribe_ready(&self) -> broadcast::Receiver<SegmentReady> {
        self.shared.ready_tx.subscribe()
    }

    pub fn subscribe_started(&self) -> broadcast::Receiver<SynthesisStarted> {
        self.shared.started_tx.subscribe()
    }

    pub fn subscribe_failed(&self) -> broadcast::Receiver<SegmentFailed> {
        self.shared.failed_tx.subscribe()
    }

    /// Edge event: fires when pending and in-flight both become empty.
    pub fn subscribe_drained(&self) -> broadcast::Receiver<QueueDrained> {
        self.shared.drained_tx.subscribe()
    }

    // ── Observability ────────────────────────────────────────────────────

    /// Lifetime counters plus live pending/in-flight gauges.
    pub async fn stats(&self) -> StatsSnapshot {
        let st = self.shared.state.lock().await;
        StatsSnapshot {
            queued: self.shared.stats.queued.load(Ordering::Relaxed),
            completed: self.shared.stats.completed.load(Ordering::Relaxed),
            failed: self.shared.stats.failed.load(Ordering::Relaxed),
            cache_hits: self.shared.stats.cache_hits.load(Ordering::Relaxed),
            dropped: self.shared.stats.dropped.load(Ordering::Relaxed),
            pending: st.pending.len(),
            in_flight: st.in_flight.len(),
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.shared.state.lock().await.pending.len()
    }

    pub async fn in_flight_count(&self) -> usize {
        self.shared.state.lock().await.in_flight.len()
    }

    /// Snapshot of the per-engine semaphores created so far.
    pub fn semaphores(&self) -> Vec<(String, Arc<DynamicSemaphore>)> {
        self.shared
            .semaphores
            .lock()
            .iter()
            .map(|(engine, sem)| (engine.clone(), Arc::clone(sem)))
            .collect()
    }

    // ── Hooks (wired by the calibration manager) ─────────────────────────

    /// Called whenever a new engine semaphore is created.
    pub fn set_semaphore_listener(
        &self,
        listener: impl Fn(&str, &Arc<DynamicSemaphore>) + Send + Sync + 'static,
    ) {
        *self.shared.semaphore_listener.lock() = Some(Box::new(listener));
    }

    /// Called after each successful `Cache::register`; failures are logged,
    /// never propagated.
    pub fn set_registered_hook(
        &self,
        hook: impl Fn(&CacheKey) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        *self.shared.registered_hook.lock() = Some(Box::new(hook));
    }

    /// Called with `(engine, voice_id, audio_duration_ms, synth_time_ms)`
    /// after each non-cache-hit completion.
    pub fn set_synthesis_observer(
        &self,
        observer: impl Fn(&str, &str, u64, u64) + Send + Sync + 'static,
    ) {
        *self.shared.synthesis_observer.lock() = Some(Box::new(observer));
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

async fn worker_loop(shared: Arc<Shared>) {
    debug!("synthesis worker started");
    loop {
        // Find which engine the head of the queue needs. The head itself
        // stays pending — still deduplicable and upgradable — until a slot
        // is actually free.
        let head_engine = {
            let st = shared.state.lock().await;
            if st.disposed {
                break;
            }
            st.pending
                .peek_first()
                .map(|req| engine_for_voice(&req.voice_id))
        };

        let Some(engine) = head_engine else {
            shared.wake.notified().await;
            continue;
        };

        let sem = shared.engine_semaphore(&engine);

        // Backpressure: the worker itself blocks while the engine is
        // saturated, so spawned tasks never pile up behind a semaphore.
        if let Err(err) = sem.acquire().await {
            debug!(error = %err, engine, "dispatch wait cancelled");
            continue;
        }

        // Pop and register in-flight under one lock hold: a pending entry
        // is never simultaneously in-flight.
        let req = {
            let mut st = shared.state.lock().await;
            if st.disposed {
                None
            } else {
                match st.pending.pop_first() {
                    // Queue cleared (context change / reset) while waiting.
                    None => None,
                    Some((key, req)) => {
                        if engine_for_voice(&req.voice_id) != engine {
                            // The head switched engines while this one's
                            // slot was awaited; retry against the new head.
                            st.pending.restore(key, req);
                            None
                        } else {
                            let _fresh =
                                st.in_flight.insert(req.cache_key.as_str().to_string());
                            debug_assert!(_fresh, "pending entry duplicated an in-flight key");
                            Some(req)
                        }
                    }
                }
            }
        };

        let Some(req) = req else {
            sem.release();
            continue;
        };

        let task_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            process(task_shared, req, sem, engine).await;
        });
    }
    debug!("synthesis worker stopped");
}

/// Run one dispatched request to completion, then leave the in-flight set,
/// free the engine slot, and detect the drained edge.
async fn process(shared: Arc<Shared>, req: SynthesisRequest, sem: Arc<DynamicSemaphore>, engine: String) {
    synthesize_one(&shared, &req, &engine).await;

    let drained = {
        let mut st = shared.state.lock().await;
        st.in_flight.remove(req.cache_key.as_str());
        !st.disposed && st.pending.is_empty() && st.in_flight.is_empty()
    };
    sem.release();

    if drained {
        let _ = shared.drained_tx.send(QueueDrained {
            completed: shared.stats.completed.load(Ordering::Relaxed),
            failed: shared.stats.failed.load(Ordering::Relaxed),
        });
    }
}

async fn synthesize_one(shared: &Shared, req: &SynthesisRequest, engine: &str) {
    if shared.state.lock().await.disposed {
        shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
        return;
    }

    // Re-check the cache: another path may have produced this key while the
    // request waited in the queue.
    if shared.cache.is_ready(&req.cache_key).await {
        let duration_ms = shared.cached_duration(&req.cache_key).await;
        shared.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        let _ = shared.ready_tx.send(SegmentReady {
            segment_index: req.segment_index,
            cache_key: req.cache_key.to_string(),
            duration_ms,
            from_cache: true,
        });
        return;
    }

    let _ = shared.started_tx.send(SynthesisStarted {
        segment_index: req.segment_index,
        cache_key: req.cache_key.to_string(),
    });

    let started_at = Instant::now();
    let outcome = tokio::time::timeout(
        shared.config.synthesis_timeout,
        shared
            .synthesizer
            .synthesize(&req.voice_id, &req.track, req.effective_rate),
    )
    .await;

    match outcome {
        Err(_) => {
            shared.stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                segment = req.segment_index,
                cache_key = %req.cache_key,
                timeout_ms = shared.config.synthesis_timeout.as_millis() as u64,
                "synthesis timed out"
            );
            let _ = shared.failed_tx.send(SegmentFailed {
                segment_index: req.segment_index,
                cache_key: req.cache_key.to_string(),
                error: format!(
                    "synthesis timed out after {:?}",
                    shared.config.synthesis_timeout
                ),
                is_timeout: true,
            });
        }
        Ok(Err(err)) => {
            shared.stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                segment = req.segment_index,
                cache_key = %req.cache_key,
                error = %err,
                "synthesis failed"
            );
            let _ = shared.failed_tx.send(SegmentFailed {
                segment_index: req.segment_index,
                cache_key: req.cache_key.to_string(),
                error: err.to_string(),
                is_timeout: false,
            });
        }
        Ok(Ok(audio)) => {
            let synth_ms = started_at.elapsed().as_millis() as u64;
            let size_bytes = tokio::fs::metadata(&audio.file_path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);

            let registered = shared
                .cache
                .register(
                    &req.cache_key,
                    size_bytes,
                    &req.book_id,
                    req.chapter_index,
                    req.segment_index,
                    engine,
                    audio.duration_ms,
                )
                .await;
            match registered {
                Ok(()) => {
                    if let Some(hook) = &*shared.registered_hook.lock() {
                        if let Err(err) = hook(&req.cache_key) {
                            warn!(cache_key = %req.cache_key, error = %err, "post-registration hook failed");
                        }
                    }
                }
                Err(err) => {
                    // Non-fatal: the audio file still exists on disk; a later
                    // reconciliation may adopt it.
                    warn!(cache_key = %req.cache_key, error = %err, "cache registration failed");
                }
            }

            if let Some(observer) = &*shared.synthesis_observer.lock() {
                observer(engine, &req.voice_id, audio.duration_ms, synth_ms);
            }

            shared.stats.completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                segment = req.segment_index,
                cache_key = %req.cache_key,
                duration_ms = audio.duration_ms,
                synth_ms,
                "segment synthesized"
            );
            let _ = shared.ready_tx.send(SegmentReady {
                segment_index: req.segment_index,
                cache_key: req.cache_key.to_string(),
                duration_ms: audio.duration_ms,
                from_cache: false,
            });
        }
    }
}
