//! Local media engine capability consumed by the sync loop

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// What the local player is doing right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub position_ms: u64,
    pub is_paused: bool,
    pub track_id: Option<String>,
}

/// Control surface of the local media engine.
///
/// Every call may fail or stall; callers bound them with a timeout and
/// never assume success.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaybackDriver: Send + Sync {
    /// `None` when nothing is loaded.
    async fn current_state(&self) -> Result<Option<PlaybackState>>;

    async fn seek(&self, position_ms: u64) -> Result<()>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;
}
