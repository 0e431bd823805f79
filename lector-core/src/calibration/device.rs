//! Device capability probing.
//!
//! The scheduler treats the probe as a black box: it only consumes the
//! derived concurrency bounds. The "performance cores ≈ half the total"
//! heuristic is deliberately crude; hosts with a real performance-domain
//! API should implement [`DeviceProbe`] themselves.

use serde::{Deserialize, Serialize};

/// Snapshot of the device's capacity for concurrent synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    pub total_cores: usize,
    /// Crude estimate: half the total cores, floor 1.
    pub perf_cores_estimate: usize,
    /// Hard ceiling for any engine's concurrency, in `[1, 4]`.
    pub recommended_max_concurrency: usize,
    /// Starting concurrency target: `ceil(max / 2)`, in `[1, 2]`.
    pub suggested_baseline_concurrency: usize,
    /// Battery charge in `[0.0, 1.0]`, when known.
    pub battery_level: Option<f32>,
    pub is_charging: bool,
    /// When set, the recommended maximum is reduced by 25 %.
    pub battery_optimized: bool,
}

impl DeviceCapabilities {
    /// Derive the concurrency bounds from a raw core count and battery
    /// state.
    pub fn derive(
        total_cores: usize,
        battery_level: Option<f32>,
        is_charging: bool,
        battery_optimized: bool,
    ) -> Self {
        let total_cores = total_cores.max(1);
        let perf_cores_estimate = (total_cores / 2).max(1);

        let mut max = perf_cores_estimate.clamp(1, 4);
        if battery_optimized {
            max = (max * 3 / 4).max(1);
        }
        let baseline = max.div_ceil(2).clamp(1, 2);

        Self {
            total_cores,
            perf_cores_estimate,
            recommended_max_concurrency: max,
            suggested_baseline_concurrency: baseline,
            battery_level,
            is_charging,
            battery_optimized,
        }
    }
}

/// Produces a [`DeviceCapabilities`] snapshot on demand.
pub trait DeviceProbe: Send + Sync {
    fn capabilities(&self) -> DeviceCapabilities;
}

/// Default probe: core count from the OS, no battery information.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProbe;

impl DeviceProbe for HostProbe {
    fn capabilities(&self) -> DeviceCapabilities {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        DeviceCapabilities::derive(cores, None, false, false)
    }
}
