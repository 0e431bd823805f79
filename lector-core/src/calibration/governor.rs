//! Applies concurrency decisions to the per-engine semaphores.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::semaphore::DynamicSemaphore;

/// Bounded length of the change log.
const CHANGE_LOG_CAP: usize = 20;

/// Broadcast capacity for change events.
const CHANGE_BROADCAST_CAP: usize = 64;

/// Utilization above which a waiting queue marks an engine as pressured.
const PRESSURE_UTILIZATION_PCT: f32 = 80.0;

/// One applied capacity change.
#[derive(Debug, Clone)]
pub struct ConcurrencyChange {
    pub engine: String,
    pub old: usize,
    pub new: usize,
    pub reason: String,
    pub at: Instant,
}

/// Point-in-time view of one engine's semaphore.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemaphoreStatus {
    pub capacity: usize,
    pub active: usize,
    pub waiting: usize,
    pub utilization_pct: f32,
    /// Waiters are queued and utilization exceeds 80 %.
    pub under_pressure: bool,
}

/// Owns the engine → semaphore map and the learned global target.
///
/// Engines registered after a target was set inherit it immediately, so a
/// late-discovered engine starts at the learned concurrency rather than its
/// configured default.
pub struct ConcurrencyGovernor {
    semaphores: Mutex<HashMap<String, Arc<DynamicSemaphore>>>,
    target: Mutex<Option<usize>>,
    changes: Mutex<VecDeque<ConcurrencyChange>>,
    change_tx: broadcast::Sender<ConcurrencyChange>,
}

impl Default for ConcurrencyGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrencyGovernor {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_BROADCAST_CAP);
        Self {
            semaphores: Mutex::new(HashMap::new()),
            target: Mutex::new(None),
            changes: Mutex::new(VecDeque::new()),
            change_tx,
        }
    }

    /// Adopt an engine semaphore, applying the current global target to it.
    pub fn register(&self, engine: &str, sem: Arc<DynamicSemaphore>) {
        let target = *self.target.lock();
        if let Some(target) = target {
            let old = sem.capacity();
            if old != target {
                sem.set_capacity(target);
                self.record(engine, old, target, "late registration");
            }
        }
        self.semaphores.lock().insert(engine.to_string(), sem);
    }

    /// Set every known engine's capacity and remember the target for
    /// engines registered later.
    pub fn set_concurrency(&self, concurrency: usize, reason: &str) {
        let concurrency = concurrency.max(1);
        *self.target.lock() = Some(concurrency);

        let semaphores: Vec<(String, Arc<DynamicSemaphore>)> = self
            .semaphores
            .lock()
            .iter()
            .map(|(engine, sem)| (engine.clone(), Arc::clone(sem)))
            .collect();

        for (engine, sem) in semaphores {
            let old = sem.capacity();
            if old != concurrency {
                sem.set_capacity(concurrency);
                self.record(&engine, old, concurrency, reason);
            }
        }
    }

    /// Set one engine's capacity without touching the global target.
    pub fn set_for_engine(&self, engine: &str, concurrency: usize, reason: &str) {
        let concurrency = concurrency.max(1);
        let sem = self.semaphores.lock().get(engine).map(Arc::clone);
        if let Some(sem) = sem {
            let old = sem.capacity();
            if old != concurrency {
                sem.set_capacity(concurrency);
                self.record(engine, old, concurrency, reason);
            }
        }
    }

    /// The last globally applied target, if any.
    pub fn current_target(&self) -> Option<usize> {
        *self.target.lock()
    }

    /// Active permit count for one engine.
    pub fn active_for(&self, engine: &str) -> Option<usize> {
        self.semaphores.lock().get(engine).map(|sem| sem.active())
    }

    /// Per-engine status snapshots.
    pub fn status(&self) -> HashMap<String, SemaphoreStatus> {
        self.semaphores
            .lock()
            .iter()
            .map(|(engine, sem)| (engine.clone(), Self::status_of(sem)))
            .collect()
    }

    pub fn status_for(&self, engine: &str) -> Option<SemaphoreStatus> {
        self.semaphores.lock().get(engine).map(Self::status_of)
    }

    /// The bounded change log, oldest first.
    pub fn recent_changes(&self) -> Vec<ConcurrencyChange> {
        self.changes.lock().iter().cloned().collect()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ConcurrencyChange> {
        self.change_tx.subscribe()
    }

    fn status_of(sem: &Arc<DynamicSemaphore>) -> SemaphoreStatus {
        let capacity = sem.capacity();
        let active = sem.active();
        let waiting = sem.waiting();
        let utilization_pct = (active as f32 / capacity.max(1) as f32) * 100.0;
        SemaphoreStatus {
            capacity,
            active,
            waiting,
            utilization_pct,
            under_pressure: waiting > 0 && utilization_pct > PRESSURE_UTILIZATION_PCT,
        }
    }

    fn record(&self, engine: &str, old: usize, new: usize, reason: &str) {
        info!(engine, old, new, reason, "engine concurrency changed");
        let change = ConcurrencyChange {
            engine: engine.to_string(),
            old,
            new,
            reason: reason.to_string(),
            at: Instant::now(),
        };
        let mut log = self.changes.lock();
        log.push_back(change.clone());
        while log.len() > CHANGE_LOG_CAP {
            log.pop_front();
        }
        drop(log);
        let _ = self.change_tx.send(change);
    }
}
