//! Sync loop controller
//!
//! Drives one participant's synchronization for one room. Two schedules run
//! side by side on the tokio runtime:
//! 1. the sync tick (publish for owners, reconcile for members)
//! 2. latency sampling, on a slower cadence
//!
//! Tick bodies never overlap with themselves: scheduled ticks and
//! [`SyncLoopController::manual_sync`] share one lock. Stopping cancels both
//! schedules but lets an in-flight tick run to completion.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::driver::PlaybackDriver;
use super::latency::{AudioLatencySource, LatencyEstimator, StoreProber};
use super::publisher::SnapshotPublisher;
use super::reconciler::PositionReconciler;
use crate::cache::{KeyBuilder, KeyValueStore, SyncStateCache};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::metrics;
use crate::models::{
    LatencyInfo, LatencySample, ParticipantId, RoomId, RoomSyncSession, SessionState, SyncRole,
};
use crate::Result;

type SharedSession = Arc<RwLock<RoomSyncSession>>;

enum RoleTicker {
    Owner(SnapshotPublisher),
    Member(PositionReconciler),
}

/// Runs one tick and folds its result into the session
struct TickRunner {
    role: SyncRole,
    ticker: tokio::sync::Mutex<RoleTicker>,
    session: SharedSession,
    clock: Arc<dyn Clock>,
}

impl TickRunner {
    /// Returns whether the tick synced anything.
    async fn run(&self) -> bool {
        let result = {
            let mut ticker = self.ticker.lock().await;
            match &mut *ticker {
                RoleTicker::Owner(publisher) => publisher
                    .publish_tick()
                    .await
                    .map(|snapshot| snapshot.is_some()),
                RoleTicker::Member(reconciler) => reconciler
                    .reconcile_tick()
                    .await
                    .map(|outcome| outcome.is_some()),
            }
        };

        match result {
            Ok(synced) => {
                let mut session = self.session.write();
                session.mark_tick_completed();
                if synced {
                    session.mark_synced(self.clock.now());
                }
                let outcome = if synced { "synced" } else { "idle" };
                metrics::SYNC_TICKS_TOTAL
                    .with_label_values(&[self.role.as_str(), outcome])
                    .inc();
                synced
            }
            Err(e) => {
                let mut session = self.session.write();
                if e.is_transient() {
                    tracing::warn!(
                        room_id = %session.room_id(),
                        role = %self.role,
                        error = %e,
                        "Sync tick failed, skipping"
                    );
                } else {
                    tracing::error!(
                        room_id = %session.room_id(),
                        role = %self.role,
                        error = %e,
                        "Sync tick failed on unusable data, skipping"
                    );
                }
                session.record_error(e.to_string());
                metrics::SYNC_TICKS_TOTAL
                    .with_label_values(&[self.role.as_str(), "failed"])
                    .inc();
                false
            }
        }
    }
}

struct ActiveLoop {
    cancel: CancellationToken,
    runner: Arc<TickRunner>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the schedules and session of one participant.
///
/// Role or room changes go through [`Self::start`] again, which stops the
/// running loop first.
pub struct SyncLoopController {
    cache: SyncStateCache,
    latency: Arc<LatencyEstimator>,
    clock: Arc<dyn Clock>,
    participant_id: ParticipantId,
    config: SyncConfig,
    active: Mutex<Option<ActiveLoop>>,
    session: RwLock<Option<SharedSession>>,
}

impl std::fmt::Debug for SyncLoopController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLoopController")
            .field("participant_id", &self.participant_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SyncLoopController {
    #[must_use]
    pub fn new(
        cache: SyncStateCache,
        latency: Arc<LatencyEstimator>,
        clock: Arc<dyn Clock>,
        participant_id: ParticipantId,
        config: SyncConfig,
    ) -> Self {
        Self {
            cache,
            latency,
            clock,
            participant_id,
            config,
            active: Mutex::new(None),
            session: RwLock::new(None),
        }
    }

    /// Controller over a store, probing round trips through it and using
    /// the system clock.
    #[must_use]
    pub fn with_store(
        store: Arc<dyn KeyValueStore>,
        keys: KeyBuilder,
        audio: Arc<dyn AudioLatencySource>,
        participant_id: ParticipantId,
        config: SyncConfig,
    ) -> Self {
        let cache = SyncStateCache::new(store, keys, &config);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let prober = Arc::new(StoreProber::new(cache.clone(), participant_id.clone()));
        let latency = Arc::new(LatencyEstimator::new(prober, audio, clock.clone(), &config));
        Self::new(cache, latency, clock, participant_id, config)
    }

    #[must_use]
    pub const fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    /// Begin syncing `room_id` in `role`. Must be called within a tokio runtime.
    ///
    /// Any running loop is stopped first. An invalid room id does not
    /// raise: the new session records the error and stays stopped.
    pub fn start(&self, room_id: &str, role: SyncRole, driver: Arc<dyn PlaybackDriver>) {
        self.stop();

        let room_id = match RoomId::parse(room_id) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(room_id, role = %role, error = %e, "Refusing to start sync");
                let mut session = RoomSyncSession::new(
                    RoomId::from_string(room_id.to_string()),
                    role,
                    self.config.max_recent_errors,
                );
                session.record_error(e.to_string());
                session.mark_stopped();
                *self.session.write() = Some(Arc::new(RwLock::new(session)));
                return;
            }
        };

        let session: SharedSession = Arc::new(RwLock::new(RoomSyncSession::new(
            room_id.clone(),
            role,
            self.config.max_recent_errors,
        )));
        session.write().set_latency(self.latency.latency_info());

        let ticker = match role {
            SyncRole::Owner => RoleTicker::Owner(SnapshotPublisher::new(
                room_id.clone(),
                self.cache.clone(),
                driver,
                self.latency.clone(),
                self.clock.clone(),
                self.config.timeouts().driver,
            )),
            SyncRole::Member => RoleTicker::Member(PositionReconciler::new(
                room_id.clone(),
                self.cache.clone(),
                driver,
                self.latency.clone(),
                self.clock.clone(),
                &self.config,
            )),
        };
        let runner = Arc::new(TickRunner {
            role,
            ticker: tokio::sync::Mutex::new(ticker),
            session: session.clone(),
            clock: self.clock.clone(),
        });

        let cancel = CancellationToken::new();
        let tasks = vec![
            self.spawn_sync_loop(runner.clone(), cancel.clone()),
            self.spawn_latency_loop(room_id.clone(), session.clone(), cancel.clone()),
        ];

        tracing::info!(
            room_id = %room_id,
            role = %role,
            participant_id = %self.participant_id,
            interval_ms = self.config.sync_interval_ms,
            "Sync loop started"
        );

        *self.session.write() = Some(session);
        *self.active.lock() = Some(ActiveLoop {
            cancel,
            runner,
            tasks,
        });
    }

    fn spawn_sync_loop(&self, runner: Arc<TickRunner>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut timer = interval(self.config.sync_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!(role = %runner.role, "Sync loop shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        runner.run().await;
                    }
                }
            }
        })
    }

    fn spawn_latency_loop(
        &self,
        room_id: RoomId,
        session: SharedSession,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut timer = interval(self.config.latency_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let latency = self.latency.clone();
        let cache = self.cache.clone();
        let participant_id = self.participant_id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!(room_id = %room_id, "Latency loop shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        Self::refresh_latency(&latency, &cache, &room_id, &participant_id, &session).await;
                    }
                }
            }
        })
    }

    async fn refresh_latency(
        latency: &LatencyEstimator,
        cache: &SyncStateCache,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        session: &SharedSession,
    ) {
        if let Some(sample) = latency.refresh().await {
            metrics::ROUND_TRIP_MS.set(sample.round_trip_ms);
            if let Err(e) = cache.record_latency(room_id, participant_id, &sample).await {
                tracing::warn!(room_id = %room_id, error = %e, "Failed to publish latency sample");
            }
        }
        session.write().set_latency(latency.latency_info());
    }

    /// Cancel both schedules. Safe to call repeatedly and from any state.
    pub fn stop(&self) {
        let active = self.active.lock().take();
        let Some(active) = active else {
            if let Some(session) = self.session.read().as_ref() {
                session.write().mark_stopped();
            }
            return;
        };

        active.cancel.cancel();
        // Dropping the handles detaches the tasks; an in-flight tick finishes on its own
        drop(active.tasks);

        if let Some(session) = self.session.read().as_ref() {
            let mut session = session.write();
            session.mark_stopped();
            tracing::info!(room_id = %session.room_id(), role = %session.role(), "Sync loop stopped");
        }
    }

    /// Run one tick now, outside the schedule. Returns whether it synced;
    /// `false` when no loop is running.
    pub async fn manual_sync(&self) -> bool {
        let runner = self.active.lock().as_ref().map(|active| active.runner.clone());
        match runner {
            Some(runner) => runner.run().await,
            None => false,
        }
    }

    /// Snapshot of the current session, if one was ever started
    #[must_use]
    pub fn session(&self) -> Option<RoomSyncSession> {
        self.session.read().as_ref().map(|s| s.read().clone())
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session
            .read()
            .as_ref()
            .map_or(SessionState::Stopped, |s| s.read().state())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(|s| s.read().is_connected())
    }

    #[must_use]
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.session
            .read()
            .as_ref()
            .and_then(|s| s.read().last_sync_at())
    }

    #[must_use]
    pub fn latency_info(&self) -> LatencyInfo {
        self.session
            .read()
            .as_ref()
            .map_or_else(|| self.latency.latency_info(), |s| s.read().latency())
    }

    /// Recent tick errors, oldest first
    #[must_use]
    pub fn sync_errors(&self) -> Vec<String> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.read().error_messages())
            .unwrap_or_default()
    }

    /// Latest round-trip sample of every participant in the current room.
    pub async fn room_latencies(&self) -> Result<HashMap<ParticipantId, LatencySample>> {
        let room_id = self
            .session
            .read()
            .as_ref()
            .map(|s| s.read().room_id().clone());

        match room_id {
            Some(room_id) => self.cache.room_latencies(&room_id).await,
            None => Ok(HashMap::new()),
        }
    }
}

impl Drop for SyncLoopController {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::MemoryStore;
    use crate::clock::ManualClock;
    use crate::models::Snapshot;
    use crate::test_helpers::{
        estimator_with_rtt, memory_cache, test_sync_config, DriverCall, FakeDriver, T0_MS,
    };

    const ROOM: &str = "ROOM01";

    struct Fixture {
        cache: SyncStateCache,
        clock: Arc<ManualClock>,
        config: SyncConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let config = test_sync_config();
            Self {
                cache: memory_cache(Arc::new(MemoryStore::new()), &config),
                clock: Arc::new(ManualClock::new(T0_MS)),
                config,
            }
        }

        async fn controller(&self, participant: &str) -> SyncLoopController {
            let latency = estimator_with_rtt(0, 0, self.clock.clone(), &self.config).await;
            SyncLoopController::new(
                self.cache.clone(),
                latency,
                self.clock.clone(),
                ParticipantId::from_string(participant.to_string()),
                self.config.clone(),
            )
        }
    }

    async fn run_for(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_owner_and_member_converge() {
        let f = Fixture::new();
        let owner = f.controller("owner").await;
        let member = f.controller("member").await;
        let owner_driver = Arc::new(FakeDriver::playing(10_000));
        let member_driver = Arc::new(FakeDriver::playing(0));

        owner.start(ROOM, SyncRole::Owner, owner_driver);
        member.start(ROOM, SyncRole::Member, member_driver.clone());
        run_for(2_500).await;

        assert_eq!(member_driver.seeks(), vec![10_000]);
        assert!(owner.is_connected());
        assert!(member.is_connected());
        assert_eq!(member.state(), SessionState::Running);
        assert!(member.last_sync_time().is_some());
        assert!(member.sync_errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_without_owner_connects_but_never_syncs() {
        let f = Fixture::new();
        let member = f.controller("member").await;
        let driver = Arc::new(FakeDriver::playing(0));

        member.start(ROOM, SyncRole::Member, driver.clone());
        run_for(3_500).await;

        assert!(member.is_connected());
        assert_eq!(member.last_sync_time(), None);
        assert_eq!(driver.reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_halts_ticks() {
        let f = Fixture::new();
        f.cache
            .publish_snapshot(
                &RoomId::from_string(ROOM.to_string()),
                &Snapshot::new(0, T0_MS, true, None),
            )
            .await
            .unwrap();
        let member = f.controller("member").await;
        let driver = Arc::new(FakeDriver::playing(0));

        member.start(ROOM, SyncRole::Member, driver.clone());
        run_for(2_500).await;
        let reads = driver.reads();
        assert!(reads >= 2);

        member.stop();
        member.stop();
        run_for(5_000).await;

        assert_eq!(driver.reads(), reads);
        assert_eq!(member.state(), SessionState::Stopped);
        assert!(!member.is_connected());
        assert!(!member.manual_sync().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_is_harmless() {
        let f = Fixture::new();
        let controller = f.controller("idle").await;

        controller.stop();
        assert_eq!(controller.state(), SessionState::Stopped);
        assert!(controller.session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_room_is_reported_not_raised() {
        let f = Fixture::new();
        let controller = f.controller("member").await;
        let driver = Arc::new(FakeDriver::playing(0));

        controller.start("bad room!", SyncRole::Member, driver.clone());
        run_for(2_000).await;

        assert_eq!(controller.state(), SessionState::Stopped);
        assert!(!controller.is_connected());
        assert_eq!(controller.sync_errors().len(), 1);
        assert_eq!(driver.reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_failures_fill_bounded_error_ring() {
        let f = Fixture::new();
        let owner = f.controller("owner").await;
        let driver = Arc::new(FakeDriver::playing(1_000));
        driver.set_failing(true);

        owner.start(ROOM, SyncRole::Owner, driver.clone());
        run_for(8_500).await;

        assert!(!owner.is_connected());
        assert_eq!(owner.state(), SessionState::Starting);
        assert_eq!(owner.sync_errors().len(), f.config.max_recent_errors);

        driver.set_failing(false);
        run_for(1_000).await;
        assert!(owner.is_connected());
        assert_eq!(owner.state(), SessionState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_sync_runs_immediately() {
        let f = Fixture::new();
        let owner = f.controller("owner").await;
        assert!(!owner.manual_sync().await);

        let driver = Arc::new(FakeDriver::playing(5_000));
        owner.start(ROOM, SyncRole::Owner, driver);
        assert!(owner.manual_sync().await);

        let snapshot = f
            .cache
            .latest_snapshot(&RoomId::from_string(ROOM.to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.position_ms, 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_switches_role() {
        let f = Fixture::new();
        let controller = f.controller("p1").await;
        let first = Arc::new(FakeDriver::paused(0));

        controller.start(ROOM, SyncRole::Owner, first.clone());
        run_for(1_500).await;
        let first_reads = first.reads();

        let second = Arc::new(FakeDriver::paused(0));
        controller.start(ROOM, SyncRole::Member, second.clone());
        run_for(3_000).await;

        assert_eq!(first.reads(), first_reads);
        assert!(second.reads() > 0);
        let session = controller.session().unwrap();
        assert_eq!(session.role(), SyncRole::Member);
        // The old owner's paused snapshot is what the member now follows
        assert!(!second.calls().contains(&DriverCall::Play));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_samples_are_published_per_participant() {
        let f = Fixture::new();
        let latency = estimator_with_rtt(35, 0, f.clock.clone(), &f.config).await;
        let controller = SyncLoopController::new(
            f.cache.clone(),
            latency,
            f.clock.clone(),
            ParticipantId::from_string("p1".to_string()),
            f.config.clone(),
        );

        controller.start(ROOM, SyncRole::Member, Arc::new(FakeDriver::empty()));
        run_for(100).await;

        let latencies = controller.room_latencies().await.unwrap();
        let sample = latencies
            .get(&ParticipantId::from_string("p1".to_string()))
            .unwrap();
        assert_eq!(sample.round_trip_ms, 35.0);
        assert_eq!(sample.measured_at, T0_MS);

        let info = controller.latency_info();
        assert_eq!(info.current_ms, 35.0);
        assert!(info.measured_at.is_some());
    }
}
