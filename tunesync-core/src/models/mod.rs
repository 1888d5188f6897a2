pub mod id;
pub mod session;
pub mod snapshot;

pub use id::{generate_id, ParticipantId, RoomId};
pub use session::{LatencyInfo, RoomSyncSession, SessionState, SyncErrorEntry, SyncRole};
pub use snapshot::{LatencySample, Snapshot};
