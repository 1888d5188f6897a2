//! Typed access to the sync records kept in the shared store
//!
//! Wraps a [`KeyValueStore`] with key derivation, JSON encoding and
//! per-call timeouts. Reads are lenient: a record that fails to decode is
//! logged and reported as absent, since a member can always wait for the
//! owner's next publish.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::key_builder::KeyBuilder;
use super::store::KeyValueStore;
use crate::config::SyncConfig;
use crate::models::snapshot::WireSnapshot;
use crate::models::{LatencySample, ParticipantId, RoomId, Snapshot};
use crate::resilience::with_timeout;
use crate::Result;

/// TTL of the round-trip probe marker
const PROBE_TTL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct SyncStateCache {
    store: Arc<dyn KeyValueStore>,
    keys: KeyBuilder,
    timeout: Duration,
    snapshot_ttl: Duration,
    latency_ttl: Duration,
}

impl std::fmt::Debug for SyncStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStateCache")
            .field("keys", &self.keys)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SyncStateCache {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, keys: KeyBuilder, config: &SyncConfig) -> Self {
        Self {
            store,
            keys,
            timeout: config.timeouts().store,
            snapshot_ttl: config.snapshot_ttl(),
            latency_ttl: config.latency_ttl(),
        }
    }

    /// Overwrite the room's snapshot and refresh its TTL.
    pub async fn publish_snapshot(&self, room_id: &RoomId, snapshot: &Snapshot) -> Result<()> {
        let key = self.keys.room_sync(room_id);
        let json = serde_json::to_string(snapshot)?;
        with_timeout(
            self.timeout,
            "snapshot put",
            self.store.put(&key, json, self.snapshot_ttl),
        )
        .await?;

        tracing::trace!(
            room_id = %room_id,
            position_ms = snapshot.position_ms,
            is_playing = snapshot.is_playing,
            "Snapshot published"
        );
        Ok(())
    }

    /// Latest snapshot for the room, or `None` if none has been published
    /// yet (or the stored record is unreadable).
    pub async fn latest_snapshot(&self, room_id: &RoomId) -> Result<Option<Snapshot>> {
        let key = self.keys.room_sync(room_id);
        let raw = with_timeout(self.timeout, "snapshot get", self.store.get(&key)).await?;

        let Some(json) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<WireSnapshot>(&json) {
            Ok(wire) => Ok(Some(wire.into())),
            Err(e) => {
                tracing::warn!(
                    room_id = %room_id,
                    error = %e,
                    "Ignoring malformed snapshot"
                );
                Ok(None)
            }
        }
    }

    /// Store this participant's latest round-trip sample in the room's latency map.
    pub async fn record_latency(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        sample: &LatencySample,
    ) -> Result<()> {
        let key = self.keys.room_latency(room_id);
        let json = serde_json::to_string(sample)?;
        with_timeout(
            self.timeout,
            "latency hash put",
            self.store
                .hash_put(&key, participant_id.as_str(), json, self.latency_ttl),
        )
        .await
    }

    pub async fn participant_latency(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
    ) -> Result<Option<LatencySample>> {
        let key = self.keys.room_latency(room_id);
        let raw = with_timeout(
            self.timeout,
            "latency hash get",
            self.store.hash_get(&key, participant_id.as_str()),
        )
        .await?;

        Ok(raw.and_then(|json| serde_json::from_str(&json).ok()))
    }

    /// Every participant's latest sample for the room; undecodable entries are skipped.
    pub async fn room_latencies(
        &self,
        room_id: &RoomId,
    ) -> Result<HashMap<ParticipantId, LatencySample>> {
        let key = self.keys.room_latency(room_id);
        let raw = with_timeout(
            self.timeout,
            "latency hash get all",
            self.store.hash_get_all(&key),
        )
        .await?;

        Ok(raw
            .into_iter()
            .filter_map(|(participant, json)| {
                serde_json::from_str::<LatencySample>(&json)
                    .ok()
                    .map(|sample| (ParticipantId::from_string(participant), sample))
            })
            .collect())
    }

    /// Write then read back a throwaway marker: one full store round trip.
    pub async fn probe_round_trip(&self, participant_id: &ParticipantId) -> Result<()> {
        let key = self.keys.latency_probe(participant_id);
        with_timeout(self.timeout, "latency probe", async {
            self.store.put(&key, "1".to_string(), PROBE_TTL).await?;
            self.store.get(&key).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    fn cache_with(store: Arc<MemoryStore>) -> SyncStateCache {
        SyncStateCache::new(store, KeyBuilder::default(), &SyncConfig::default())
    }

    fn room() -> RoomId {
        RoomId::from_string("ROOM42".to_string())
    }

    #[tokio::test]
    async fn test_snapshot_publish_then_read() {
        let cache = cache_with(Arc::new(MemoryStore::new()));
        assert_eq!(cache.latest_snapshot(&room()).await.unwrap(), None);

        let snapshot = Snapshot::new(60_000, 1_000, true, Some(30.0));
        cache.publish_snapshot(&room(), &snapshot).await.unwrap();
        assert_eq!(cache.latest_snapshot(&room()).await.unwrap(), Some(snapshot));

        let newer = Snapshot::new(61_000, 2_000, false, None);
        cache.publish_snapshot(&room(), &newer).await.unwrap();
        assert_eq!(cache.latest_snapshot(&room()).await.unwrap(), Some(newer));
    }

    #[tokio::test]
    async fn test_malformed_snapshot_reads_as_absent() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                &KeyBuilder::default().room_sync(&room()),
                "{not json".to_string(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let cache = cache_with(store);
        assert_eq!(cache.latest_snapshot(&room()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_room_latencies_collects_participants() {
        let cache = cache_with(Arc::new(MemoryStore::new()));
        let alice = ParticipantId::from_string("alice".to_string());
        let bob = ParticipantId::from_string("bob".to_string());

        let a = LatencySample {
            round_trip_ms: 40.0,
            measured_at: 10,
        };
        let b = LatencySample {
            round_trip_ms: 180.0,
            measured_at: 11,
        };
        cache.record_latency(&room(), &alice, &a).await.unwrap();
        cache.record_latency(&room(), &bob, &b).await.unwrap();

        assert_eq!(
            cache.participant_latency(&room(), &alice).await.unwrap(),
            Some(a)
        );
        let all = cache.room_latencies(&room()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get(&bob), Some(&b));
    }

    #[tokio::test]
    async fn test_probe_round_trip_succeeds_on_memory_store() {
        let cache = cache_with(Arc::new(MemoryStore::new()));
        cache
            .probe_round_trip(&ParticipantId::from_string("p".to_string()))
            .await
            .unwrap();
    }
}
