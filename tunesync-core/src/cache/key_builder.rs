//! Store key construction
//!
//! All keys share a configurable prefix (default: "tunesync") so several
//! deployments can share one Redis without colliding.

use crate::models::{ParticipantId, RoomId};
use crate::Config;

#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    /// Create a new `KeyBuilder` with the given prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Create `KeyBuilder` from configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.redis.key_prefix.clone())
    }

    /// Latest owner snapshot for a room
    ///
    /// Type: String + TTL (snapshot TTL, refreshed on every publish)
    /// Value: JSON { `position_ms`, `published_at`, `is_playing`, `owner_write_latency_ms` }
    #[must_use]
    pub fn room_sync(&self, room_id: &RoomId) -> String {
        format!("{}:room:sync:{}", self.prefix, room_id.as_str())
    }

    /// Per-participant latency samples for a room
    ///
    /// Type: Hash + TTL (latency TTL)
    /// Field: `participant_id`
    /// Value: JSON { `round_trip_ms`, `measured_at` }
    #[must_use]
    pub fn room_latency(&self, room_id: &RoomId) -> String {
        format!("{}:room:latency:{}", self.prefix, room_id.as_str())
    }

    /// Throwaway marker written and read back to measure round-trip time
    ///
    /// Type: String + TTL (short)
    #[must_use]
    pub fn latency_probe(&self, participant_id: &ParticipantId) -> String {
        format!("{}:probe:{}", self.prefix, participant_id.as_str())
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new("tunesync")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builder_default() {
        let builder = KeyBuilder::default();
        let room = RoomId::from_string("AB12CD".to_string());

        assert_eq!(builder.room_sync(&room), "tunesync:room:sync:AB12CD");
        assert_eq!(builder.room_latency(&room), "tunesync:room:latency:AB12CD");
        assert_eq!(
            builder.latency_probe(&ParticipantId::from_string("p1".to_string())),
            "tunesync:probe:p1"
        );
    }

    #[test]
    fn test_key_builder_from_config() {
        let mut config = Config::default();
        config.redis.key_prefix = "staging".to_string();
        let builder = KeyBuilder::from_config(&config);

        assert_eq!(
            builder.room_sync(&RoomId::from_string("r".to_string())),
            "staging:room:sync:r"
        );
    }
}
