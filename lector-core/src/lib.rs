//! # lector-core
//!
//! Predictive TTS synthesis scheduler for a long-form audiobook player.
//! Keeps a continuously playing stream fed by synthesizing upcoming
//! segments ahead of the playback cursor, with bounded per-engine
//! concurrency and adaptive feedback.
//!
//! ## Architecture
//!
//! ```text
//! requesters → SynthesisCoordinator queue → worker → DynamicSemaphore slot
//!                                                         │
//!                                            Synthesizer → Cache::register
//!                                                         │
//!                                        broadcast SegmentReady / Failed
//!
//! player state → BufferGauge → DemandController → ConcurrencyGovernor
//!                                                         │
//!                                          per-engine semaphore capacity
//! ```
//!
//! The core produces no audio samples and persists nothing: the TTS engine,
//! the audio cache, and the player are consumed through narrow trait seams
//! ([`Synthesizer`], [`Cache`], [`PlayerProbe`], [`DeviceProbe`]).

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod calibration;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod semaphore;
pub mod synth;

// Convenience re-exports for downstream crates
pub use calibration::controller::DemandController;
pub use calibration::device::{DeviceCapabilities, DeviceProbe, HostProbe};
pub use calibration::gauge::{BufferGauge, DemandLevel, DemandSignal, PlayerProbe};
pub use calibration::governor::{ConcurrencyChange, ConcurrencyGovernor, SemaphoreStatus};
pub use calibration::rtf::{PerformanceAdvisory, Recommendation, RtfMonitor, RtfStatistics};
pub use calibration::{AutoCalibrationManager, CalibrationConfig, CalibrationSnapshot};
pub use coordinator::request::{engine_for_voice, CacheKey, Priority};
pub use coordinator::{SchedulerConfig, StatsSnapshot, SynthesisCoordinator};
pub use error::{LectorError, Result};
pub use events::{QueueDrained, SegmentFailed, SegmentReady, SynthesisStarted};
pub use semaphore::DynamicSemaphore;
pub use synth::{Cache, CacheEntry, SynthesizedAudio, Synthesizer};
