use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::RoomId;

/// Whether the local participant drives or follows the room position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRole {
    Owner,
    Member,
}

impl SyncRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Member => "member",
        }
    }
}

impl std::fmt::Display for SyncRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "member" => Ok(Self::Member),
            other => Err(format!("unknown role \"{other}\", expected owner or member")),
        }
    }
}

/// Loop lifecycle: `Stopped -> Starting -> Running -> Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
}

/// Derived latency figures exposed to observers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyInfo {
    /// Most recent round trip to the store
    pub current_ms: f64,
    /// Mean over the sample window
    pub average_ms: f64,
    /// Standard deviation over the sample window
    pub jitter_ms: f64,
    pub is_stable: bool,
    /// Estimated local audio output latency
    pub audio_latency_ms: f64,
    pub measured_at: Option<DateTime<Utc>>,
}

impl Default for LatencyInfo {
    fn default() -> Self {
        Self {
            current_ms: 0.0,
            average_ms: 0.0,
            jitter_ms: 0.0,
            is_stable: false,
            audio_latency_ms: 0.0,
            measured_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncErrorEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Local, never-shared state of one participant's sync loop for one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSyncSession {
    room_id: RoomId,
    role: SyncRole,
    state: SessionState,
    is_connected: bool,
    last_sync_at: Option<DateTime<Utc>>,
    recent_errors: VecDeque<SyncErrorEntry>,
    max_errors: usize,
    latency: LatencyInfo,
}

impl RoomSyncSession {
    #[must_use]
    pub fn new(room_id: RoomId, role: SyncRole, max_errors: usize) -> Self {
        let max_errors = max_errors.max(1);
        Self {
            room_id,
            role,
            state: SessionState::Starting,
            is_connected: false,
            last_sync_at: None,
            recent_errors: VecDeque::with_capacity(max_errors),
            max_errors,
            latency: LatencyInfo::default(),
        }
    }

    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    #[must_use]
    pub const fn role(&self) -> SyncRole {
        self.role
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.is_connected
    }

    #[must_use]
    pub const fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.last_sync_at
    }

    #[must_use]
    pub const fn latency(&self) -> LatencyInfo {
        self.latency
    }

    /// Recent errors, oldest first
    pub fn recent_errors(&self) -> impl Iterator<Item = &SyncErrorEntry> {
        self.recent_errors.iter()
    }

    #[must_use]
    pub fn error_messages(&self) -> Vec<String> {
        self.recent_errors.iter().map(|e| e.message.clone()).collect()
    }

    /// Append to the bounded error ring, evicting the oldest entry when full.
    pub fn record_error(&mut self, message: impl Into<String>) {
        while self.recent_errors.len() >= self.max_errors {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(SyncErrorEntry {
            at: Utc::now(),
            message: message.into(),
        });
    }

    /// A tick completed without error.
    pub fn mark_tick_completed(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.is_connected = true;
        self.state = SessionState::Running;
    }

    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_sync_at = Some(at);
    }

    pub fn set_latency(&mut self, latency: LatencyInfo) {
        self.latency = latency;
    }

    pub fn mark_stopped(&mut self) {
        self.state = SessionState::Stopped;
        self.is_connected = false;
    }
}
