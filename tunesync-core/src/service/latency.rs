//! Latency estimation
//!
//! Tracks round-trip time to the shared store over a rolling window and the
//! local audio output latency. Both move slowly compared to playback drift,
//! so they are sampled on their own schedule rather than every sync tick.
//!
//! ## Derived figures
//! - current: most recent round trip
//! - average: mean over the window
//! - jitter: population standard deviation over the window
//! - stable: at least [`MIN_STABLE_SAMPLES`] samples and jitter within the configured bound

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::cache::SyncStateCache;
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::models::{LatencyInfo, LatencySample, ParticipantId};
use crate::Result;

/// Samples required before latency may be reported as stable
pub const MIN_STABLE_SAMPLES: usize = 3;

/// Measures one round trip to the shared store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoundTripProber: Send + Sync {
    async fn ping(&self) -> Result<Duration>;
}

/// Probes by writing and reading back a marker key
#[derive(Debug, Clone)]
pub struct StoreProber {
    cache: SyncStateCache,
    participant_id: ParticipantId,
}

impl StoreProber {
    #[must_use]
    pub const fn new(cache: SyncStateCache, participant_id: ParticipantId) -> Self {
        Self {
            cache,
            participant_id,
        }
    }
}

#[async_trait]
impl RoundTripProber for StoreProber {
    async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        self.cache.probe_round_trip(&self.participant_id).await?;
        Ok(started.elapsed())
    }
}

/// Latency figures reported by the platform audio subsystem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportedAudioLatency {
    pub base_ms: f64,
    pub output_ms: f64,
}

#[cfg_attr(test, mockall::automock)]
pub trait AudioLatencySource: Send + Sync {
    /// `None` when the platform does not expose its pipeline latency.
    fn reported_latency(&self) -> Option<ReportedAudioLatency>;
}

/// Source for platforms that report nothing; the configured default applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnreportedAudioLatency;

impl AudioLatencySource for UnreportedAudioLatency {
    fn reported_latency(&self) -> Option<ReportedAudioLatency> {
        None
    }
}

#[derive(Debug, Clone)]
struct EstimatorSettings {
    window: usize,
    stable_jitter_ms: f64,
    audio_default_ms: f64,
    audio_overhead_ms: f64,
    audio_min_ms: f64,
    audio_max_ms: f64,
}

impl From<&SyncConfig> for EstimatorSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            window: config.latency_window.max(1),
            stable_jitter_ms: config.stable_jitter_ms,
            audio_default_ms: config.audio_latency_default_ms,
            audio_overhead_ms: config.audio_platform_overhead_ms,
            audio_min_ms: config.audio_latency_min_ms,
            audio_max_ms: config.audio_latency_max_ms.max(config.audio_latency_min_ms),
        }
    }
}

#[derive(Debug, Default)]
struct EstimatorState {
    samples: VecDeque<f64>,
    info: LatencyInfo,
}

pub struct LatencyEstimator {
    prober: Arc<dyn RoundTripProber>,
    audio: Arc<dyn AudioLatencySource>,
    clock: Arc<dyn Clock>,
    settings: EstimatorSettings,
    state: RwLock<EstimatorState>,
}

impl std::fmt::Debug for LatencyEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyEstimator")
            .field("info", &self.state.read().info)
            .finish_non_exhaustive()
    }
}

impl LatencyEstimator {
    #[must_use]
    pub fn new(
        prober: Arc<dyn RoundTripProber>,
        audio: Arc<dyn AudioLatencySource>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Self {
        let estimator = Self {
            prober,
            audio,
            clock,
            settings: EstimatorSettings::from(config),
            state: RwLock::new(EstimatorState::default()),
        };
        let audio_ms = estimator.estimate_audio_latency();
        estimator.state.write().info.audio_latency_ms = audio_ms;
        estimator
    }

    async fn try_measure(&self) -> Result<f64> {
        let elapsed = self.prober.ping().await?;
        Ok(elapsed.as_micros() as f64 / 1000.0)
    }

    /// One store round trip in milliseconds; `0.0` if the probe failed.
    pub async fn measure_round_trip(&self) -> f64 {
        match self.try_measure().await {
            Ok(ms) => ms,
            Err(e) => {
                tracing::warn!(error = %e, "Round-trip probe failed");
                0.0
            }
        }
    }

    /// Local audio output latency in milliseconds, clamped to the configured range.
    #[must_use]
    pub fn estimate_audio_latency(&self) -> f64 {
        let s = &self.settings;
        let estimate = match self.audio.reported_latency() {
            Some(reported) if reported.base_ms.is_finite() && reported.output_ms.is_finite() => {
                reported.base_ms.max(0.0) + reported.output_ms.max(0.0) + s.audio_overhead_ms
            }
            _ => s.audio_default_ms,
        };
        estimate.clamp(s.audio_min_ms, s.audio_max_ms)
    }

    /// Take a round-trip sample and re-estimate audio latency.
    ///
    /// Returns the new sample, or `None` when the probe failed; a failed
    /// probe leaves the previous figures in place.
    pub async fn refresh(&self) -> Option<LatencySample> {
        let measured = self.try_measure().await;
        let audio_ms = self.estimate_audio_latency();
        let now = self.clock.now();

        let mut state = self.state.write();
        state.info.audio_latency_ms = audio_ms;

        match measured {
            Ok(round_trip_ms) => {
                state.samples.push_back(round_trip_ms);
                while state.samples.len() > self.settings.window {
                    state.samples.pop_front();
                }
                let (average_ms, jitter_ms) = mean_and_deviation(&state.samples);

                state.info.current_ms = round_trip_ms;
                state.info.average_ms = average_ms;
                state.info.jitter_ms = jitter_ms;
                state.info.is_stable = state.samples.len() >= MIN_STABLE_SAMPLES
                    && jitter_ms <= self.settings.stable_jitter_ms;
                state.info.measured_at = Some(now);

                Some(LatencySample {
                    round_trip_ms,
                    measured_at: now.timestamp_millis(),
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Round-trip probe failed, keeping previous latency figures");
                None
            }
        }
    }

    #[must_use]
    pub fn latency_info(&self) -> LatencyInfo {
        self.state.read().info
    }

    /// Smoothed round trip used for corrections (window average)
    #[must_use]
    pub fn round_trip_ms(&self) -> f64 {
        self.state.read().info.average_ms
    }

    #[must_use]
    pub fn audio_latency_ms(&self) -> f64 {
        self.state.read().info.audio_latency_ms
    }
}

fn mean_and_deviation(samples: &VecDeque<f64>) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}
