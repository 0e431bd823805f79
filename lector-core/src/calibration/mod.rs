//! `AutoCalibrationManager` — assembles the feedback loop and wires it to
//! the coordinator.
//!
//! ## Feedback flow
//!
//! ```text
//! PlayerProbe ──► BufferGauge ──► DemandSignal ──► DemandController
//!                                                       │
//!                                       ConcurrencyGovernor::set_concurrency
//!                                                       │
//!                                     per-engine DynamicSemaphore capacity
//! ```
//!
//! The coordinator reports two things back: newly created engine semaphores
//! (forwarded to the governor so late engines inherit the learned target)
//! and per-synthesis timings (recorded into the RTF monitor together with
//! the concurrency they ran at).

pub mod controller;
pub mod device;
pub mod gauge;
pub mod governor;
pub mod rtf;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::coordinator::SynthesisCoordinator;
use crate::error::{LectorError, Result};

use self::controller::DemandController;
use self::device::{DeviceCapabilities, DeviceProbe};
use self::gauge::{BufferGauge, DemandLevel, PlayerProbe};
use self::governor::{ConcurrencyGovernor, SemaphoreStatus};
use self::rtf::{PerformanceAdvisory, RtfMonitor, RtfStatistics};

/// Construction-time tunables for the calibration loop.
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// RTF sample window. Default: 50.
    pub rtf_window: usize,
    /// Buffer gauge sample interval. Default: 1 s.
    pub sample_interval: Duration,
    /// Minimum spacing between non-emergency concurrency changes.
    /// Default: 5 s.
    pub cooldown: Duration,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            rtf_window: rtf::DEFAULT_WINDOW,
            sample_interval: Duration::from_secs(1),
            cooldown: Duration::from_secs(5),
        }
    }
}

/// Debug view collating every calibration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationSnapshot {
    pub rtf: RtfStatistics,
    pub has_reliable_data: bool,
    pub last_signal: Option<SignalSnapshot>,
    pub target_concurrency: usize,
    pub engines: HashMap<String, SemaphoreStatus>,
    pub probe_failures: u64,
}

/// Serializable view of the gauge's most recent emission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSnapshot {
    pub level: DemandLevel,
    pub buffer_seconds: f32,
    pub playback_rate: f32,
    pub age_ms: u64,
}

/// Lifecycle façade over the monitor, gauge, controller, and governor.
pub struct AutoCalibrationManager {
    monitor: Mutex<RtfMonitor>,
    gauge: Arc<BufferGauge>,
    controller: Arc<DemandController>,
    governor: Arc<ConcurrencyGovernor>,
    capabilities: DeviceCapabilities,
    running: AtomicBool,
}

impl AutoCalibrationManager {
    /// Probe the device, build the calibration parts, and wire them to the
    /// coordinator. Returns the manager ready for `start()`.
    pub fn initialize(
        coordinator: &SynthesisCoordinator,
        device_probe: &dyn DeviceProbe,
        player_probe: Arc<dyn PlayerProbe>,
        config: CalibrationConfig,
    ) -> Arc<Self> {
        let capabilities = device_probe.capabilities();
        info!(
            cores = capabilities.total_cores,
            max = capabilities.recommended_max_concurrency,
            baseline = capabilities.suggested_baseline_concurrency,
            battery_optimized = capabilities.battery_optimized,
            "device probed"
        );

        let governor = Arc::new(ConcurrencyGovernor::new());

        let controller_governor = Arc::clone(&governor);
        let controller = Arc::new(DemandController::new(
            capabilities.suggested_baseline_concurrency,
            capabilities.recommended_max_concurrency,
            config.cooldown,
            move |target, level| {
                controller_governor.set_concurrency(target, &format!("demand: {level}"));
            },
        ));

        let gauge_controller = Arc::clone(&controller);
        let gauge = Arc::new(BufferGauge::new(
            player_probe,
            config.sample_interval,
            move |signal| gauge_controller.apply(&signal),
        ));

        // Adopt semaphores the coordinator already created, then follow new
        // ones as engines are discovered.
        for (engine, sem) in coordinator.semaphores() {
            governor.register(&engine, sem);
        }
        let listener_governor = Arc::clone(&governor);
        coordinator.set_semaphore_listener(move |engine, sem| {
            listener_governor.register(engine, Arc::clone(sem));
        });

        let manager = Arc::new(Self {
            monitor: Mutex::new(RtfMonitor::new(config.rtf_window)),
            gauge,
            controller,
            governor,
            capabilities,
            running: AtomicBool::new(false),
        });

        let observer = Arc::clone(&manager);
        coordinator.set_synthesis_observer(move |engine, voice_id, audio_ms, synth_ms| {
            observer.record_synthesis(engine, voice_id, audio_ms, synth_ms);
        });

        manager
    }

    /// Begin sampling and reacting to demand.
    ///
    /// # Errors
    /// `LectorError::AlreadyRunning` when already started.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(LectorError::AlreadyRunning);
        }
        self.controller.start();
        self.gauge.start();
        info!("auto-calibration started");
        Ok(())
    }

    /// Halt sampling and freeze the current targets.
    ///
    /// # Errors
    /// `LectorError::NotRunning` when not started.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(LectorError::NotRunning);
        }
        self.gauge.stop();
        self.controller.stop();
        info!("auto-calibration stopped");
        Ok(())
    }

    /// Record one synthesis measurement, tagged with the concurrency the
    /// engine was running at.
    pub fn record_synthesis(
        &self,
        engine: &str,
        voice_id: &str,
        audio_duration_ms: u64,
        synth_time_ms: u64,
    ) {
        let concurrency = self.governor.active_for(engine).unwrap_or(1).max(1);
        self.monitor
            .lock()
            .record(audio_duration_ms, synth_time_ms, concurrency, engine, voice_id);
    }

    /// Adopt a semaphore created outside the coordinator's own flow.
    pub fn register_semaphore(&self, engine: &str, sem: Arc<crate::semaphore::DynamicSemaphore>) {
        self.governor.register(engine, sem);
    }

    /// Feed a learned baseline back into the controller.
    pub fn update_baseline(&self, baseline: usize) {
        self.controller.set_baseline(baseline);
    }

    /// Update the device ceiling (e.g. after a thermal or battery change).
    pub fn update_max_concurrency(&self, max: usize) {
        self.controller.set_max_concurrency(max);
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn governor(&self) -> &Arc<ConcurrencyGovernor> {
        &self.governor
    }

    /// One out-of-schedule gauge sample (e.g. right after a seek).
    pub fn force_sample(&self) {
        self.gauge.force_sample();
    }

    pub fn rtf_statistics(&self) -> RtfStatistics {
        self.monitor.lock().statistics()
    }

    /// Performance advisory for the given playback rate.
    pub fn advisory(&self, rate: f64) -> PerformanceAdvisory {
        self.monitor.lock().advisory(rate)
    }

    /// Collated view of every calibration surface.
    pub fn debug_snapshot(&self) -> CalibrationSnapshot {
        let monitor = self.monitor.lock();
        CalibrationSnapshot {
            rtf: monitor.statistics(),
            has_reliable_data: monitor.has_reliable_data(),
            last_signal: self.gauge.last_signal().map(|signal| SignalSnapshot {
                level: signal.level,
                buffer_seconds: signal.buffer_seconds,
                playback_rate: signal.playback_rate,
                age_ms: signal.at.elapsed().as_millis() as u64,
            }),
            target_concurrency: self.controller.current_target(),
            engines: self.governor.status(),
            probe_failures: self.gauge.probe_failures(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::coordinator::request::CacheKey;
    use crate::coordinator::SchedulerConfig;
    use crate::synth::{Cache, CacheEntry, SynthesizedAudio, Synthesizer};

    struct NullSynthesizer;

    #[async_trait]
    impl Synthesizer for NullSynthesizer {
        async fn synthesize(
            &self,
            _voice_id: &str,
            _text: &str,
            _effective_rate: f32,
        ) -> Result<SynthesizedAudio> {
            Ok(SynthesizedAudio {
                file_path: "/nonexistent/out.wav".into(),
                duration_ms: 1_000,
                sample_rate: 24_000,
            })
        }
    }

    struct EmptyCache;

    #[async_trait]
    impl Cache for EmptyCache {
        async fn is_ready(&self, _key: &CacheKey) -> bool {
            false
        }
        async fn entry(&self, _key: &CacheKey) -> Option<CacheEntry> {
            None
        }
        async fn file_for(&self, _key: &CacheKey) -> Option<std::path::PathBuf> {
            None
        }
        async fn register(
            &self,
            _key: &CacheKey,
            _size_bytes: u64,
            _book_id: &str,
            _chapter_index: u32,
            _segment_index: usize,
            _engine: &str,
            _audio_duration_ms: u64,
        ) -> Result<()> {
            Ok(())
        }
    }

    struct IdleProbe;

    impl PlayerProbe for IdleProbe {
        fn buffered_ahead_ms(&self) -> Result<u64> {
            Ok(0)
        }
        fn playback_rate(&self) -> Result<f32> {
            Ok(1.0)
        }
        fn is_playing(&self) -> Result<bool> {
            Ok(false)
        }
    }

    struct FixedProbe {
        cores: usize,
    }

    impl DeviceProbe for FixedProbe {
        fn capabilities(&self) -> DeviceCapabilities {
            DeviceCapabilities::derive(self.cores, None, true, false)
        }
    }

    fn manager_with_coordinator() -> (Arc<AutoCalibrationManager>, SynthesisCoordinator) {
        let coordinator = SynthesisCoordinator::new(
            SchedulerConfig::default(),
            Arc::new(NullSynthesizer),
            Arc::new(EmptyCache),
        );
        let manager = AutoCalibrationManager::initialize(
            &coordinator,
            &FixedProbe { cores: 8 },
            Arc::new(IdleProbe),
            CalibrationConfig::default(),
        );
        (manager, coordinator)
    }

    #[tokio::test]
    async fn start_and_stop_enforce_lifecycle() {
        let (manager, _coordinator) = manager_with_coordinator();

        assert!(matches!(manager.stop(), Err(LectorError::NotRunning)));
        manager.start().unwrap();
        assert!(matches!(manager.start(), Err(LectorError::AlreadyRunning)));
        manager.stop().unwrap();
    }

    #[tokio::test]
    async fn initialize_derives_targets_from_the_device() {
        let (manager, _coordinator) = manager_with_coordinator();
        assert_eq!(manager.capabilities().recommended_max_concurrency, 4);
        assert_eq!(manager.capabilities().suggested_baseline_concurrency, 2);
        assert_eq!(manager.debug_snapshot().target_concurrency, 2);
    }

    #[tokio::test]
    async fn record_synthesis_feeds_the_monitor() {
        let (manager, _coordinator) = manager_with_coordinator();
        manager.record_synthesis("kokoro", "kokoro_af", 2_000, 500);
        manager.record_synthesis("kokoro", "kokoro_af", 2_000, 1_000);

        let stats = manager.rtf_statistics();
        assert_eq!(stats.count, 2);
        assert!((stats.mean - 0.375).abs() < 1e-6);
    }

    #[tokio::test]
    async fn late_engine_semaphores_reach_the_governor() {
        let (manager, coordinator) = manager_with_coordinator();

        // Queueing for a brand-new engine creates its semaphore, which must
        // land in the governor through the coordinator hook.
        coordinator
            .queue_immediate("hello there", "supertonic_clara", 1.0, 0, "book", 0)
            .await
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        loop {
            if manager.governor().status_for("supertonic").is_some() {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "governor never saw the supertonic semaphore"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn debug_snapshot_serializes() {
        let (manager, _coordinator) = manager_with_coordinator();
        manager.record_synthesis("kokoro", "kokoro_af", 1_000, 250);

        let snapshot = manager.debug_snapshot();
        let json = serde_json::to_value(&snapshot).expect("snapshot serializes");
        assert_eq!(json["hasReliableData"], false);
        assert_eq!(json["targetConcurrency"], 2);
        assert!(json["rtf"]["count"].is_number());
    }
}
