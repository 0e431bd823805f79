//! Demand-driven concurrency target selection.
//!
//! ## Decision table
//!
//! | Signal | Target |
//! |--------|--------|
//! | Emergency | `max` |
//! | Critical | `current + 1` |
//! | Low | `current + 1` |
//! | Adequate | one step toward `baseline` |
//! | Comfortable | `current − 1` |
//!
//! Targets clamp to `[1, max]`. Emergency and Critical bypass the cooldown;
//! every other change is rate-limited to one ±1 step per cooldown period.
//! No-op changes are never emitted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::gauge::{DemandLevel, DemandSignal};

type ChangeCallback = Box<dyn Fn(usize, DemandLevel) + Send + Sync>;

struct ControllerState {
    current: usize,
    baseline: usize,
    max: usize,
    last_change: Option<Instant>,
}

/// Hysteresis-damped state machine over integer concurrency targets.
pub struct DemandController {
    state: Mutex<ControllerState>,
    cooldown: Duration,
    on_change: ChangeCallback,
    enabled: AtomicBool,
}

impl DemandController {
    /// `on_change(new_level, reason)` is invoked only when the target
    /// actually moves.
    pub fn new(
        baseline: usize,
        max: usize,
        cooldown: Duration,
        on_change: impl Fn(usize, DemandLevel) + Send + Sync + 'static,
    ) -> Self {
        let max = max.max(1);
        let baseline = baseline.clamp(1, max);
        Self {
            state: Mutex::new(ControllerState {
                current: baseline,
                baseline,
                max,
                last_change: None,
            }),
            cooldown,
            on_change: Box::new(on_change),
            enabled: AtomicBool::new(false),
        }
    }

    pub fn start(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn current_target(&self) -> usize {
        self.state.lock().current
    }

    pub fn baseline(&self) -> usize {
        self.state.lock().baseline
    }

    pub fn max_concurrency(&self) -> usize {
        self.state.lock().max
    }

    /// Update the device ceiling. An over-ceiling current target is brought
    /// down by the next signal's clamp.
    pub fn set_max_concurrency(&self, max: usize) {
        let mut st = self.state.lock();
        st.max = max.max(1);
        st.baseline = st.baseline.min(st.max);
    }

    /// Update the resting target used for Adequate buffers.
    pub fn set_baseline(&self, baseline: usize) {
        let mut st = self.state.lock();
        st.baseline = baseline.clamp(1, st.max);
    }

    /// Consume one demand signal, possibly emitting a concurrency change.
    pub fn apply(&self, signal: &DemandSignal) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }

        let changed = {
            let mut st = self.state.lock();
            let current = st.current;
            let proposed = match signal.level {
                DemandLevel::Emergency => st.max,
                DemandLevel::Critical | DemandLevel::Low => current + 1,
                DemandLevel::Adequate => match st.baseline.cmp(&current) {
                    std::cmp::Ordering::Greater => current + 1,
                    std::cmp::Ordering::Less => current - 1,
                    std::cmp::Ordering::Equal => current,
                },
                DemandLevel::Comfortable => current.saturating_sub(1),
            };
            let target = proposed.clamp(1, st.max);

            if target == current {
                None
            } else if !signal.level.is_urgent()
                && st
                    .last_change
                    .is_some_and(|at| at.elapsed() < self.cooldown)
            {
                debug!(
                    level = %signal.level,
                    target,
                    current,
                    "concurrency change suppressed by cooldown"
                );
                None
            } else {
                st.current = target;
                st.last_change = Some(Instant::now());
                Some(target)
            }
        };

        if let Some(target) = changed {
            info!(
                target,
                level = %signal.level,
                buffer_seconds = signal.buffer_seconds,
                "concurrency target changed"
            );
            (self.on_change)(target, signal.level);
        }
    }
}
