//! Member-side position reconciliation
//!
//! Each tick reads the owner's latest snapshot, extrapolates where the owner
//! is now, smooths that estimate across recent ticks, and corrects the local
//! player only when it is materially out of step.
//!
//! ## Target position
//! While the owner is playing:
//!
//! ```text
//! raw = position_ms + (now - published_at) - owner_write_latency / 2 - member_round_trip + audio_latency
//! ```
//!
//! Elapsed time advances the target one-for-one. The owner's position was
//! already half a write round trip old when it reached the store, and the
//! member's read arrives one full round trip late, so both are subtracted.
//! Audio output latency is added (when enabled) so that sound leaves the
//! speaker in step with the owner. A paused snapshot is used verbatim.
//!
//! ## Tolerance
//! Drift below the adaptive tolerance is ignored to avoid audible
//! micro-seeking. The tolerance grows with the mean of member and owner
//! latency and is clamped to the configured range.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::driver::PlaybackDriver;
use super::latency::LatencyEstimator;
use super::smoothing::JitterSmoother;
use crate::cache::SyncStateCache;
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::metrics;
use crate::models::{RoomId, Snapshot};
use crate::resilience::with_timeout;
use crate::Result;

/// Mean latency above which the tolerance starts to widen
pub const LATENCY_WIDEN_THRESHOLD_MS: f64 = 100.0;
/// Mean latency above which the tolerance widens twice as fast
pub const LATENCY_HIGH_THRESHOLD_MS: f64 = 200.0;

/// Unclamped, unsmoothed target position in milliseconds.
#[must_use]
pub fn raw_target_ms(
    snapshot: &Snapshot,
    now_ms: i64,
    member_round_trip_ms: f64,
    audio_latency_ms: f64,
) -> f64 {
    let position = snapshot.position_ms as f64;
    if !snapshot.is_playing {
        return position;
    }

    let elapsed = now_ms.saturating_sub(snapshot.published_at) as f64;
    let write_latency_half = snapshot.owner_latency_or_zero() / 2.0;

    position + elapsed - write_latency_half - member_round_trip_ms + audio_latency_ms
}

/// Round to whole milliseconds, never below zero.
#[must_use]
pub fn clamp_position(target_ms: f64) -> u64 {
    if target_ms.is_finite() && target_ms > 0.0 {
        target_ms.round() as u64
    } else {
        0
    }
}

/// Drift tolerance for the given member and owner latencies.
#[must_use]
pub fn adaptive_tolerance_ms(
    member_round_trip_ms: f64,
    owner_write_latency_ms: f64,
    base_ms: f64,
    min_ms: f64,
    max_ms: f64,
) -> f64 {
    let average = (member_round_trip_ms.max(0.0) + owner_write_latency_ms.max(0.0)) / 2.0;

    let widened = if average > LATENCY_HIGH_THRESHOLD_MS {
        base_ms + 2.0 * average
    } else if average > LATENCY_WIDEN_THRESHOLD_MS {
        base_ms + average
    } else {
        base_ms
    };

    widened.clamp(min_ms, max_ms.max(min_ms))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayCommand {
    Play,
    Pause,
}

/// What a member tick decided
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub raw_target_ms: f64,
    pub target_ms: u64,
    /// Local minus target; positive when the member is ahead
    pub drift_ms: f64,
    pub tolerance_ms: f64,
    pub seeked: bool,
    pub play_command: Option<PlayCommand>,
}

#[derive(Debug, Clone)]
struct ReconcilerSettings {
    compensate_audio_latency: bool,
    base_tolerance_ms: f64,
    min_tolerance_ms: f64,
    max_tolerance_ms: f64,
    driver_timeout: Duration,
}

/// Tracks the owner for one room. Holds the jitter history, so a fresh
/// reconciler is built whenever the member (re)joins a room.
pub struct PositionReconciler {
    room_id: RoomId,
    cache: SyncStateCache,
    driver: Arc<dyn PlaybackDriver>,
    latency: Arc<LatencyEstimator>,
    clock: Arc<dyn Clock>,
    smoother: JitterSmoother,
    settings: ReconcilerSettings,
}

impl std::fmt::Debug for PositionReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionReconciler")
            .field("room_id", &self.room_id)
            .field("smoother", &self.smoother)
            .finish_non_exhaustive()
    }
}

impl PositionReconciler {
    #[must_use]
    pub fn new(
        room_id: RoomId,
        cache: SyncStateCache,
        driver: Arc<dyn PlaybackDriver>,
        latency: Arc<LatencyEstimator>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            room_id,
            cache,
            driver,
            latency,
            clock,
            smoother: JitterSmoother::new(&config.smoothing_weights, config.max_tolerance_ms),
            settings: ReconcilerSettings {
                compensate_audio_latency: config.compensate_audio_latency,
                base_tolerance_ms: config.base_tolerance_ms,
                min_tolerance_ms: config.min_tolerance_ms,
                max_tolerance_ms: config.max_tolerance_ms,
                driver_timeout: config.timeouts().driver,
            },
        }
    }

    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Tolerance for the current latency figures
    #[must_use]
    pub fn tolerance_for(&self, member_round_trip_ms: f64, owner_write_latency_ms: f64) -> f64 {
        adaptive_tolerance_ms(
            member_round_trip_ms,
            owner_write_latency_ms,
            self.settings.base_tolerance_ms,
            self.settings.min_tolerance_ms,
            self.settings.max_tolerance_ms,
        )
    }

    /// Run one reconciliation pass.
    ///
    /// `Ok(None)` means there was nothing to sync to: no snapshot yet or
    /// nothing loaded locally. Driver and store failures abort the tick
    /// with the error; corrections already issued are not rolled back.
    pub async fn reconcile_tick(&mut self) -> Result<Option<ReconcileOutcome>> {
        let Some(snapshot) = self.cache.latest_snapshot(&self.room_id).await? else {
            tracing::debug!(room_id = %self.room_id, "No snapshot yet, skipping tick");
            return Ok(None);
        };

        let timeout = self.settings.driver_timeout;
        let Some(local) =
            with_timeout(timeout, "driver state", self.driver.current_state()).await?
        else {
            tracing::debug!(room_id = %self.room_id, "Nothing loaded locally, skipping tick");
            return Ok(None);
        };

        let now_ms = self.clock.now_ms();
        let member_round_trip_ms = self.latency.round_trip_ms();
        let audio_latency_ms = if self.settings.compensate_audio_latency {
            self.latency.audio_latency_ms()
        } else {
            0.0
        };

        let raw = raw_target_ms(&snapshot, now_ms, member_round_trip_ms, audio_latency_ms);
        let smoothed = if snapshot.is_playing {
            self.smoother.smooth(raw, now_ms)
        } else {
            // Paused positions do not drift; blending would only lag behind owner seeks
            self.smoother.reset();
            raw
        };

        let target_ms = clamp_position(smoothed);
        let drift_ms = local.position_ms as f64 - target_ms as f64;
        let tolerance_ms =
            self.tolerance_for(member_round_trip_ms, snapshot.owner_latency_or_zero());
        metrics::DRIFT_MS.observe(drift_ms.abs());

        let seeked = drift_ms.abs() > tolerance_ms;
        if seeked {
            tracing::info!(
                room_id = %self.room_id,
                local_ms = local.position_ms,
                target_ms,
                drift_ms,
                tolerance_ms,
                "Out of tolerance, seeking"
            );
            with_timeout(timeout, "driver seek", self.driver.seek(target_ms)).await?;
            metrics::CORRECTIONS_TOTAL.with_label_values(&["seek"]).inc();
        }

        let play_command = match (snapshot.is_playing, local.is_paused) {
            (true, true) => Some(PlayCommand::Play),
            (false, false) => Some(PlayCommand::Pause),
            _ => None,
        };
        match play_command {
            Some(PlayCommand::Play) => {
                tracing::info!(room_id = %self.room_id, "Owner is playing, resuming");
                with_timeout(timeout, "driver play", self.driver.play()).await?;
                metrics::CORRECTIONS_TOTAL.with_label_values(&["play"]).inc();
            }
            Some(PlayCommand::Pause) => {
                tracing::info!(room_id = %self.room_id, "Owner is paused, pausing");
                with_timeout(timeout, "driver pause", self.driver.pause()).await?;
                metrics::CORRECTIONS_TOTAL.with_label_values(&["pause"]).inc();
            }
            None => {}
        }

        let outcome = ReconcileOutcome {
            raw_target_ms: raw,
            target_ms,
            drift_ms,
            tolerance_ms,
            seeked,
            play_command,
        };
        tracing::debug!(room_id = %self.room_id, ?outcome, "Reconciled");
        Ok(Some(outcome))
    }
}
