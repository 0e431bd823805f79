//! Rolling real-time-factor statistics.
//!
//! RTF = `synthesis_time / audio_duration`; below 1.0 means synthesis runs
//! faster than playback. Samples live in a bounded ring (default 50) and
//! every statistic is recomputed from the current window on demand — the
//! window is small and reads are rare.
//!
//! Single-writer by design: the monitor itself is not synchronized. The
//! calibration manager wraps it in a mutex and is its only writer.

use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Sample window length.
pub const DEFAULT_WINDOW: usize = 50;

/// Minimum samples before derived quantities are trusted.
const RELIABLE_SAMPLE_COUNT: usize = 10;

/// Safety margin applied to sustainable-rate estimates.
const SAFETY_MARGIN: f64 = 0.8;

/// Sustainable rate reported before any data exists.
const DEFAULT_MAX_RATE: f64 = 3.0;

/// Coefficient-of-variation ceiling for a "stable" engine.
const STABLE_COV: f64 = 0.2;

/// One synthesis performance measurement.
#[derive(Debug, Clone)]
pub struct RtfSample {
    pub rtf: f64,
    /// Engine concurrency when the sample was produced.
    pub concurrency: usize,
    pub engine: String,
    pub voice_id: String,
    pub at: Instant,
}

/// Statistics over the current window (all zeros when empty).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtfStatistics {
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub p95: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub coefficient_of_variation: f64,
    pub count: usize,
}

/// User-facing performance advisory derived from the window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceAdvisory {
    pub max_sustainable_rate: f64,
    pub stable: bool,
    pub realtime_ok: bool,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Recommendation {
    KeepCurrent,
    LowerRate,
    InsufficientData,
}

/// Rolling window of RTF samples with on-demand statistics.
pub struct RtfMonitor {
    window_size: usize,
    samples: VecDeque<RtfSample>,
    rejected: u64,
}

impl Default for RtfMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl RtfMonitor {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            samples: VecDeque::new(),
            rejected: 0,
        }
    }

    /// Append a sample, evicting the oldest when the window is full.
    /// Samples with a zero audio duration are rejected.
    pub fn record(
        &mut self,
        audio_duration_ms: u64,
        synth_time_ms: u64,
        concurrency: usize,
        engine: &str,
        voice_id: &str,
    ) {
        if audio_duration_ms == 0 {
            self.rejected += 1;
            warn!(engine, voice_id, "rejected RTF sample with zero audio duration");
            return;
        }

        if self.samples.len() >= self.window_size {
            self.samples.pop_front();
        }
        self.samples.push_back(RtfSample {
            rtf: synth_time_ms as f64 / audio_duration_ms as f64,
            concurrency,
            engine: engine.to_string(),
            voice_id: voice_id.to_string(),
            at: Instant::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn has_reliable_data(&self) -> bool {
        self.samples.len() >= RELIABLE_SAMPLE_COUNT
    }

    pub fn statistics(&self) -> RtfStatistics {
        compute(self.samples.iter().map(|s| s.rtf).collect())
    }

    pub fn statistics_for_engine(&self, engine: &str) -> RtfStatistics {
        compute(
            self.samples
                .iter()
                .filter(|s| s.engine == engine)
                .map(|s| s.rtf)
                .collect(),
        )
    }

    pub fn statistics_for_voice(&self, voice_id: &str) -> RtfStatistics {
        compute(
            self.samples
                .iter()
                .filter(|s| s.voice_id == voice_id)
                .map(|s| s.rtf)
                .collect(),
        )
    }

    /// `(1 / P95) · 0.8`; 3.0 before any data exists.
    pub fn max_sustainable_playback_rate(&self) -> f64 {
        let p95 = self.statistics().p95;
        if p95 <= 0.0 {
            DEFAULT_MAX_RATE
        } else {
            (1.0 / p95) * SAFETY_MARGIN
        }
    }

    /// Whether P95 leaves the 20 % margin at the given playback rate.
    pub fn can_maintain_realtime(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return true;
        }
        self.statistics().p95 < (1.0 / rate) * SAFETY_MARGIN
    }

    /// Low variance across the window: `cov < 0.2`.
    pub fn is_stable(&self) -> bool {
        self.statistics().coefficient_of_variation < STABLE_COV
    }

    /// Advisory for the given requested playback rate.
    pub fn advisory(&self, rate: f64) -> PerformanceAdvisory {
        let realtime_ok = self.can_maintain_realtime(rate);
        let recommendation = if !self.has_reliable_data() {
            Recommendation::InsufficientData
        } else if !realtime_ok {
            Recommendation::LowerRate
        } else {
            Recommendation::KeepCurrent
        };
        PerformanceAdvisory {
            max_sustainable_rate: self.max_sustainable_playback_rate(),
            stable: self.is_stable(),
            realtime_ok,
            recommendation,
        }
    }
}

/// Full statistics over an unsorted value set. Percentiles use the
/// nearest-rank method on a sorted copy.
fn compute(mut values: Vec<f64>) -> RtfStatistics {
    if values.is_empty() {
        return RtfStatistics::default();
    }
    values.sort_by(|a, b| a.partial_cmp(b).expect("RTF values are finite"));

    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    let std_dev = variance.sqrt();
    let coefficient_of_variation = if mean > 0.0 { std_dev / mean } else { 0.0 };

    RtfStatistics {
        mean,
        median: nearest_rank(&values, 50.0),
        p90: nearest_rank(&values, 90.0),
        p95: nearest_rank(&values, 95.0),
        min: values[0],
        max: values[count - 1],
        std_dev,
        coefficient_of_variation,
        count,
    }
}

fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn monitor_with(rtfs: &[(u64, u64)]) -> RtfMonitor {
        let mut monitor = RtfMonitor::new(DEFAULT_WINDOW);
        for &(audio_ms, synth_ms) in rtfs {
            monitor.record(audio_ms, synth_ms, 1, "kokoro", "kokoro_af");
        }
        monitor
    }

    #[test]
    fn empty_window_reports_zeros_and_no_reliability() {
        let monitor = RtfMonitor::default();
        let stats = monitor.statistics();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.p95, 0.0);
        assert!(!monitor.has_reliable_data());
    }

    #[test]
    fn mean_median_and_percentiles_match_nearest_rank() {
        // RTFs: 0.1, 0.2, 0.3, 0.4 (audio 1000 ms each).
        let monitor = monitor_with(&[(1000, 100), (1000, 200), (1000, 300), (1000, 400)]);
        let stats = monitor.statistics();

        assert_eq!(stats.count, 4);
        assert_relative_eq!(stats.mean, 0.25, epsilon = 1e-9);
        // Nearest rank: p50 of 4 values → rank 2 → 0.2.
        assert_relative_eq!(stats.median, 0.2, epsilon = 1e-9);
        // p90 → rank ceil(3.6) = 4 → 0.4; p95 → rank 4 → 0.4.
        assert_relative_eq!(stats.p90, 0.4, epsilon = 1e-9);
        assert_relative_eq!(stats.p95, 0.4, epsilon = 1e-9);
        assert_relative_eq!(stats.min, 0.1, epsilon = 1e-9);
        assert_relative_eq!(stats.max, 0.4, epsilon = 1e-9);
    }

    #[test]
    fn std_dev_and_cov_are_population_statistics() {
        // Two samples: 0.2 and 0.4 → mean 0.3, stddev 0.1, cov ≈ 0.333.
        let monitor = monitor_with(&[(1000, 200), (1000, 400)]);
        let stats = monitor.statistics();
        assert_relative_eq!(stats.std_dev, 0.1, epsilon = 1e-9);
        assert_relative_eq!(stats.coefficient_of_variation, 1.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn window_evicts_oldest_samples() {
        let mut monitor = RtfMonitor::new(3);
        for synth_ms in [100, 200, 300, 400] {
            monitor.record(1000, synth_ms, 1, "kokoro", "v");
        }
        let stats = monitor.statistics();
        assert_eq!(stats.count, 3);
        assert_relative_eq!(stats.min, 0.2, epsilon = 1e-9);
        assert_relative_eq!(stats.max, 0.4, epsilon = 1e-9);
    }

    #[test]
    fn zero_audio_duration_is_rejected() {
        let mut monitor = RtfMonitor::default();
        monitor.record(0, 500, 1, "kokoro", "v");
        assert!(monitor.is_empty());
        assert_eq!(monitor.rejected(), 1);
    }

    #[test]
    fn filters_by_engine_and_voice() {
        let mut monitor = RtfMonitor::default();
        monitor.record(1000, 100, 1, "kokoro", "kokoro_af");
        monitor.record(1000, 900, 1, "piper", "piper_en");
        monitor.record(1000, 300, 2, "kokoro", "kokoro_br");

        assert_eq!(monitor.statistics_for_engine("kokoro").count, 2);
        assert_eq!(monitor.statistics_for_engine("piper").count, 1);
        assert_eq!(monitor.statistics_for_voice("kokoro_br").count, 1);
        assert_relative_eq!(
            monitor.statistics_for_engine("piper").mean,
            0.9,
            epsilon = 1e-9
        );
    }

    #[test]
    fn reliability_requires_ten_samples() {
        let mut monitor = RtfMonitor::default();
        for _ in 0..9 {
            monitor.record(1000, 100, 1, "kokoro", "v");
        }
        assert!(!monitor.has_reliable_data());
        monitor.record(1000, 100, 1, "kokoro", "v");
        assert!(monitor.has_reliable_data());
    }

    #[test]
    fn sustainable_rate_defaults_to_three_without_data() {
        let monitor = RtfMonitor::default();
        assert_relative_eq!(monitor.max_sustainable_playback_rate(), 3.0);
    }

    #[test]
    fn sustainable_rate_applies_safety_margin() {
        // All samples at RTF 0.4 → p95 = 0.4 → (1/0.4)·0.8 = 2.0.
        let monitor = monitor_with(&[(1000, 400); 10]);
        assert_relative_eq!(monitor.max_sustainable_playback_rate(), 2.0, epsilon = 1e-9);
        assert!(monitor.can_maintain_realtime(1.5));
        assert!(!monitor.can_maintain_realtime(2.0));
    }

    #[test]
    fn stability_follows_coefficient_of_variation() {
        let steady = monitor_with(&[(1000, 300); 10]);
        assert!(steady.is_stable());

        let jittery = monitor_with(&[
            (1000, 100),
            (1000, 900),
            (1000, 100),
            (1000, 900),
            (1000, 100),
        ]);
        assert!(!jittery.is_stable());
    }

    #[test]
    fn advisory_reflects_data_quality_and_rate() {
        let sparse = monitor_with(&[(1000, 400)]);
        assert_eq!(
            sparse.advisory(1.0).recommendation,
            Recommendation::InsufficientData
        );

        let solid = monitor_with(&[(1000, 400); 10]);
        assert_eq!(
            solid.advisory(1.0).recommendation,
            Recommendation::KeepCurrent
        );
        assert_eq!(solid.advisory(2.5).recommendation, Recommendation::LowerRate);
    }
}
