//! Owner-side snapshot publication

use std::sync::Arc;
use std::time::Duration;

use super::driver::PlaybackDriver;
use super::latency::LatencyEstimator;
use crate::cache::SyncStateCache;
use crate::clock::Clock;
use crate::models::{RoomId, Snapshot};
use crate::resilience::with_timeout;
use crate::Result;

/// Writes the owner's playback state to the shared store once per tick.
///
/// The publisher keeps no state between ticks; every snapshot is a complete
/// replacement of the previous one.
pub struct SnapshotPublisher {
    room_id: RoomId,
    cache: SyncStateCache,
    driver: Arc<dyn PlaybackDriver>,
    latency: Arc<LatencyEstimator>,
    clock: Arc<dyn Clock>,
    driver_timeout: Duration,
}

impl std::fmt::Debug for SnapshotPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotPublisher")
            .field("room_id", &self.room_id)
            .finish_non_exhaustive()
    }
}

impl SnapshotPublisher {
    #[must_use]
    pub const fn new(
        room_id: RoomId,
        cache: SyncStateCache,
        driver: Arc<dyn PlaybackDriver>,
        latency: Arc<LatencyEstimator>,
        clock: Arc<dyn Clock>,
        driver_timeout: Duration,
    ) -> Self {
        Self {
            room_id,
            cache,
            driver,
            latency,
            clock,
            driver_timeout,
        }
    }

    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Build a snapshot from the local player without writing it.
    ///
    /// `published_at` is taken after the driver answers so that the
    /// position and the timestamp describe the same instant as closely as
    /// the driver allows.
    pub async fn capture(&self) -> Result<Option<Snapshot>> {
        let state = with_timeout(
            self.driver_timeout,
            "driver state",
            self.driver.current_state(),
        )
        .await?;

        let Some(state) = state else {
            return Ok(None);
        };

        let published_at = self.clock.now_ms();
        let owner_write_latency_ms = self
            .latency
            .latency_info()
            .measured_at
            .map(|_| self.latency.round_trip_ms());

        Ok(Some(Snapshot::new(
            state.position_ms,
            published_at,
            !state.is_paused,
            owner_write_latency_ms,
        )))
    }

    /// Capture and publish. Returns the snapshot written, or `None` when
    /// nothing is loaded locally and there is nothing to publish.
    pub async fn publish_tick(&self) -> Result<Option<Snapshot>> {
        let Some(snapshot) = self.capture().await? else {
            tracing::debug!(room_id = %self.room_id, "Nothing loaded locally, not publishing");
            return Ok(None);
        };

        self.cache.publish_snapshot(&self.room_id, &snapshot).await?;
        tracing::debug!(
            room_id = %self.room_id,
            position_ms = snapshot.position_ms,
            is_playing = snapshot.is_playing,
            "Published snapshot"
        );

        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::clock::ManualClock;
    use crate::config::SyncConfig;
    use crate::service::driver::MockPlaybackDriver;
    use crate::test_helpers::{
        estimator_with_rtt, memory_cache, test_room, test_sync_config, FakeDriver, T0_MS,
    };
    use crate::Error;

    async fn publisher_with(
        driver: Arc<dyn PlaybackDriver>,
        rtt_samples: usize,
    ) -> (SnapshotPublisher, SyncStateCache, Arc<ManualClock>) {
        let config: SyncConfig = test_sync_config();
        let cache = memory_cache(Arc::new(MemoryStore::new()), &config);
        let clock = Arc::new(ManualClock::new(T0_MS));
        let latency = estimator_with_rtt(80, rtt_samples, clock.clone(), &config).await;
        let publisher = SnapshotPublisher::new(
            test_room(),
            cache.clone(),
            driver,
            latency,
            clock.clone(),
            config.timeouts().driver,
        );
        (publisher, cache, clock)
    }

    #[tokio::test]
    async fn test_published_snapshot_is_read_back() {
        let (publisher, cache, clock) =
            publisher_with(Arc::new(FakeDriver::playing(42_000)), 2).await;
        clock.set(T0_MS + 250);

        let published = publisher.publish_tick().await.unwrap().unwrap();
        let read = cache.latest_snapshot(&test_room()).await.unwrap().unwrap();

        assert_eq!(read, published);
        assert_eq!(read.position_ms, 42_000);
        assert_eq!(read.published_at, T0_MS + 250);
        assert!(read.is_playing);
        assert_eq!(read.owner_write_latency_ms, Some(80.0));
    }

    #[tokio::test]
    async fn test_write_latency_omitted_until_measured() {
        let (publisher, _, _) = publisher_with(Arc::new(FakeDriver::paused(1_000)), 0).await;

        let snapshot = publisher.publish_tick().await.unwrap().unwrap();
        assert!(!snapshot.is_playing);
        assert_eq!(snapshot.owner_write_latency_ms, None);
    }

    #[tokio::test]
    async fn test_nothing_loaded_publishes_nothing() {
        let (publisher, cache, _) = publisher_with(Arc::new(FakeDriver::empty()), 1).await;

        assert_eq!(publisher.publish_tick().await.unwrap(), None);
        assert_eq!(cache.latest_snapshot(&test_room()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_later_tick_replaces_snapshot() {
        let driver = Arc::new(FakeDriver::playing(1_000));
        let (publisher, cache, clock) = publisher_with(driver.clone(), 1).await;

        publisher.publish_tick().await.unwrap();
        clock.advance(1_000);
        driver.set_position(2_000);
        publisher.publish_tick().await.unwrap();

        let read = cache.latest_snapshot(&test_room()).await.unwrap().unwrap();
        assert_eq!(read.position_ms, 2_000);
        assert_eq!(read.published_at, T0_MS + 1_000);
    }

    #[tokio::test]
    async fn test_driver_failure_is_propagated() {
        let mut driver = MockPlaybackDriver::new();
        driver
            .expect_current_state()
            .returning(|| Err(Error::Driver("no audio device".to_string())));
        let (publisher, cache, _) = publisher_with(Arc::new(driver), 1).await;

        assert!(matches!(
            publisher.publish_tick().await,
            Err(Error::Driver(_))
        ));
        assert_eq!(cache.latest_snapshot(&test_room()).await.unwrap(), None);
    }
}
