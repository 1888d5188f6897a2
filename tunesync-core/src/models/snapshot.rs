use serde::{Deserialize, Serialize};

/// Latest publish time accepted from the wire (9999-12-31T23:59:59.999Z)
pub const MAX_PUBLISHED_AT_MS: i64 = 253_402_300_799_999;

/// Owner-published playback reference for a room.
///
/// Overwritten in place on every publish; members only ever read the latest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub position_ms: u64,
    /// Wall-clock publish time, milliseconds since the Unix epoch
    pub published_at: i64,
    pub is_playing: bool,
    pub owner_write_latency_ms: Option<f64>,
}

impl Snapshot {
    #[must_use]
    pub const fn new(
        position_ms: u64,
        published_at: i64,
        is_playing: bool,
        owner_write_latency_ms: Option<f64>,
    ) -> Self {
        Self {
            position_ms,
            published_at,
            is_playing,
            owner_write_latency_ms,
        }
    }

    /// Owner write latency, treating an absent figure as zero.
    #[must_use]
    pub fn owner_latency_or_zero(&self) -> f64 {
        self.owner_write_latency_ms.unwrap_or(0.0)
    }
}

/// Lenient wire form used when reading snapshots back from the store.
///
/// Other clients may write floats or negative positions; those are
/// clamped instead of failing the read.
#[derive(Debug, Deserialize)]
pub(crate) struct WireSnapshot {
    position_ms: f64,
    published_at: f64,
    is_playing: bool,
    #[serde(default)]
    owner_write_latency_ms: Option<f64>,
}

impl From<WireSnapshot> for Snapshot {
    fn from(wire: WireSnapshot) -> Self {
        let position_ms = if wire.position_ms.is_finite() && wire.position_ms > 0.0 {
            wire.position_ms.round() as u64
        } else {
            0
        };
        let published_at = if wire.published_at.is_finite() {
            wire.published_at
                .round()
                .clamp(0.0, MAX_PUBLISHED_AT_MS as f64) as i64
        } else {
            0
        };
        let owner_write_latency_ms = wire
            .owner_write_latency_ms
            .filter(|ms| ms.is_finite())
            .map(|ms| ms.max(0.0));

        Self {
            position_ms,
            published_at,
            is_playing: wire.is_playing,
            owner_write_latency_ms,
        }
    }
}

/// One round-trip measurement to the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    pub round_trip_ms: f64,
    /// Milliseconds since the Unix epoch
    pub measured_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> Snapshot {
        serde_json::from_str::<WireSnapshot>(json).unwrap().into()
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = Snapshot::new(60_000, 1_700_000_000_000, true, Some(42.0));
        let json = serde_json::to_value(snapshot).unwrap();

        assert_eq!(json["position_ms"], 60_000);
        assert_eq!(json["published_at"], 1_700_000_000_000_i64);
        assert_eq!(json["is_playing"], true);
        assert_eq!(json["owner_write_latency_ms"], 42.0);
    }

    #[test]
    fn test_wire_snapshot_clamps_negative_position() {
        let snapshot = decode(r#"{"position_ms":-250,"published_at":1000,"is_playing":false}"#);
        assert_eq!(snapshot.position_ms, 0);
        assert_eq!(snapshot.owner_write_latency_ms, None);
    }

    #[test]
    fn test_wire_snapshot_accepts_fractional_values() {
        let snapshot = decode(
            r#"{"position_ms":1234.6,"published_at":99.4,"is_playing":true,"owner_write_latency_ms":-3.0}"#,
        );
        assert_eq!(snapshot.position_ms, 1235);
        assert_eq!(snapshot.published_at, 99);
        assert_eq!(snapshot.owner_write_latency_ms, Some(0.0));
    }

    #[test]
    fn test_wire_snapshot_clamps_out_of_range_publish_time() {
        let early = decode(r#"{"position_ms":1000,"published_at":-1e30,"is_playing":true}"#);
        assert_eq!(early.published_at, 0);

        let late = decode(r#"{"position_ms":1000,"published_at":1e30,"is_playing":true}"#);
        assert_eq!(late.published_at, MAX_PUBLISHED_AT_MS);
    }

    #[test]
    fn test_owner_latency_or_zero() {
        assert_eq!(Snapshot::new(0, 0, true, None).owner_latency_or_zero(), 0.0);
        assert_eq!(Snapshot::new(0, 0, true, Some(80.0)).owner_latency_or_zero(), 80.0);
    }
}
