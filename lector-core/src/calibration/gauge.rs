//! Buffer depth sampling and demand classification.
//!
//! ## Classification
//!
//! `effective_seconds = buffered_ahead_ms / (1000 · playback_rate)` — the
//! listener's real safety margin, shrinking as the rate grows.
//!
//! | Effective buffer | Level |
//! |------------------|-------|
//! | < 3 s   | `Emergency` |
//! | < 10 s  | `Critical` |
//! | < 30 s  | `Low` |
//! | 30–60 s | `Adequate` |
//! | ≥ 60 s  | `Comfortable` |
//!
//! A signal is emitted when the level changes, and re-emitted every tick
//! while Critical/Emergency so the controller keeps reacting. Nothing is
//! emitted while playback is paused.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;

const EMERGENCY_SECONDS: f32 = 3.0;
const CRITICAL_SECONDS: f32 = 10.0;
const LOW_SECONDS: f32 = 30.0;
const COMFORTABLE_SECONDS: f32 = 60.0;

/// Buffer health, ordered from starving to saturated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemandLevel {
    Emergency,
    Critical,
    Low,
    Adequate,
    Comfortable,
}

impl DemandLevel {
    pub fn classify(effective_seconds: f32) -> Self {
        if effective_seconds < EMERGENCY_SECONDS {
            DemandLevel::Emergency
        } else if effective_seconds < CRITICAL_SECONDS {
            DemandLevel::Critical
        } else if effective_seconds < LOW_SECONDS {
            DemandLevel::Low
        } else if effective_seconds < COMFORTABLE_SECONDS {
            DemandLevel::Adequate
        } else {
            DemandLevel::Comfortable
        }
    }

    /// Critical and Emergency bypass controller cooldowns and re-emit on
    /// every tick.
    pub fn is_urgent(self) -> bool {
        matches!(self, DemandLevel::Emergency | DemandLevel::Critical)
    }
}

impl std::fmt::Display for DemandLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DemandLevel::Emergency => "emergency",
            DemandLevel::Critical => "critical",
            DemandLevel::Low => "low",
            DemandLevel::Adequate => "adequate",
            DemandLevel::Comfortable => "comfortable",
        };
        f.write_str(name)
    }
}

/// One classified buffer observation.
#[derive(Debug, Clone, Copy)]
pub struct DemandSignal {
    pub level: DemandLevel,
    pub buffer_seconds: f32,
    pub playback_rate: f32,
    pub at: Instant,
}

/// Read-only view of the player, polled at the sample interval.
/// Implementations must be cheap and side-effect-free.
pub trait PlayerProbe: Send + Sync {
    fn buffered_ahead_ms(&self) -> Result<u64>;
    fn playback_rate(&self) -> Result<f32>;
    fn is_playing(&self) -> Result<bool>;
}

type SignalSink = Box<dyn Fn(DemandSignal) + Send + Sync>;

/// Periodic buffer sampler feeding the demand controller.
pub struct BufferGauge {
    probe: Arc<dyn PlayerProbe>,
    sink: SignalSink,
    sample_interval: Duration,
    last_level: Mutex<Option<DemandLevel>>,
    last_signal: Mutex<Option<DemandSignal>>,
    probe_failures: AtomicU64,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BufferGauge {
    pub fn new(
        probe: Arc<dyn PlayerProbe>,
        sample_interval: Duration,
        sink: impl Fn(DemandSignal) + Send + Sync + 'static,
    ) -> Self {
        Self {
            probe,
            sink: Box::new(sink),
            sample_interval,
            last_level: Mutex::new(None),
            last_signal: Mutex::new(None),
            probe_failures: AtomicU64::new(0),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Begin periodic sampling. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let gauge = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gauge.sample_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so sampling
            // starts one interval from now.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !gauge.running.load(Ordering::SeqCst) {
                    break;
                }
                gauge.sample();
            }
        });
        *self.task.lock() = Some(handle);
    }

    /// Halt periodic sampling. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    /// Take one sample synchronously, outside the periodic schedule.
    pub fn force_sample(&self) {
        self.sample();
    }

    /// Most recent emission, if any.
    pub fn last_signal(&self) -> Option<DemandSignal> {
        *self.last_signal.lock()
    }

    /// Probe errors swallowed so far.
    pub fn probe_failures(&self) -> u64 {
        self.probe_failures.load(Ordering::Relaxed)
    }

    fn sample(&self) {
        let observation = (|| -> Result<Option<(u64, f32)>> {
            if !self.probe.is_playing()? {
                return Ok(None);
            }
            Ok(Some((self.probe.buffered_ahead_ms()?, self.probe.playback_rate()?)))
        })();

        let (buffered_ms, rate) = match observation {
            Ok(Some(values)) => values,
            Ok(None) => return,
            Err(err) => {
                self.probe_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "player probe failed — skipping sample");
                return;
            }
        };

        let rate = if rate > 0.0 { rate } else { 1.0 };
        let buffer_seconds = buffered_ms as f32 / (1000.0 * rate);
        let level = DemandLevel::classify(buffer_seconds);

        let mut last_level = self.last_level.lock();
        if *last_level == Some(level) && !level.is_urgent() {
            return;
        }
        *last_level = Some(level);

        let signal = DemandSignal {
            level,
            buffer_seconds,
            playback_rate: rate,
            at: Instant::now(),
        };
        *self.last_signal.lock() = Some(signal);
        debug!(%level, buffer_seconds, rate, "demand signal");
        (self.sink)(signal);
    }
}
