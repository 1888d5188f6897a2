//! Test helpers and fixtures for tunesync-core tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cache::{KeyBuilder, MemoryStore, SyncStateCache};
use crate::clock::ManualClock;
use crate::config::SyncConfig;
use crate::models::RoomId;
use crate::service::driver::{PlaybackDriver, PlaybackState};
use crate::service::latency::{LatencyEstimator, RoundTripProber, UnreportedAudioLatency};
use crate::{Error, Result};

/// Wall-clock instant most tests start from
pub const T0_MS: i64 = 1_700_000_000_000;

pub fn test_room() -> RoomId {
    RoomId::from_string("ROOM01".to_string())
}

/// Defaults with audio compensation off, so targets are exact in assertions
pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        compensate_audio_latency: false,
        ..SyncConfig::default()
    }
}

pub fn memory_cache(store: Arc<MemoryStore>, config: &SyncConfig) -> SyncStateCache {
    SyncStateCache::new(store, KeyBuilder::default(), config)
}

/// Prober that always reports the same round trip
#[derive(Debug, Clone, Copy)]
pub struct FixedProber(pub Duration);

#[async_trait]
impl RoundTripProber for FixedProber {
    async fn ping(&self) -> Result<Duration> {
        Ok(self.0)
    }
}

/// Estimator primed with `samples` identical round trips of `rtt_ms`
pub async fn estimator_with_rtt(
    rtt_ms: u64,
    samples: usize,
    clock: Arc<ManualClock>,
    config: &SyncConfig,
) -> Arc<LatencyEstimator> {
    let estimator = LatencyEstimator::new(
        Arc::new(FixedProber(Duration::from_millis(rtt_ms))),
        Arc::new(UnreportedAudioLatency),
        clock,
        config,
    );
    for _ in 0..samples {
        estimator.refresh().await;
    }
    Arc::new(estimator)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    Seek(u64),
    Play,
    Pause,
}

/// In-memory playback driver that records every control call
#[derive(Debug, Default)]
pub struct FakeDriver {
    state: Mutex<Option<PlaybackState>>,
    calls: Mutex<Vec<DriverCall>>,
    failing: AtomicBool,
    reads: AtomicUsize,
}

impl FakeDriver {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_state(position_ms: u64, is_paused: bool) -> Self {
        let driver = Self::default();
        *driver.state.lock() = Some(PlaybackState {
            position_ms,
            is_paused,
            track_id: Some("track-1".to_string()),
        });
        driver
    }

    pub fn playing(position_ms: u64) -> Self {
        Self::with_state(position_ms, false)
    }

    pub fn paused(position_ms: u64) -> Self {
        Self::with_state(position_ms, true)
    }

    pub fn set_position(&self, position_ms: u64) {
        if let Some(state) = self.state.lock().as_mut() {
            state.position_ms = position_ms;
        }
    }

    /// Make every subsequent call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `current_state` calls so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    pub fn seeks(&self) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DriverCall::Seek(position) => Some(*position),
                _ => None,
            })
            .collect()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Driver("media engine rejected the call".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PlaybackDriver for FakeDriver {
    async fn current_state(&self) -> Result<Option<PlaybackState>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.state.lock().clone())
    }

    async fn seek(&self, position_ms: u64) -> Result<()> {
        self.check()?;
        self.calls.lock().push(DriverCall::Seek(position_ms));
        self.set_position(position_ms);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        self.check()?;
        self.calls.lock().push(DriverCall::Play);
        if let Some(state) = self.state.lock().as_mut() {
            state.is_paused = false;
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.check()?;
        self.calls.lock().push(DriverCall::Pause);
        if let Some(state) = self.state.lock().as_mut() {
            state.is_paused = true;
        }
        Ok(())
    }
}
