//! Timeout bounds for calls into external collaborators
//!
//! Store I/O and playback driver calls may hang on a dead connection or an
//! unresponsive media engine. Every such call made by a sync tick goes
//! through [`with_timeout`], so an elapsed bound surfaces as an ordinary
//! [`Error::Timeout`] and is handled like any other tick failure.

use std::future::Future;
use std::time::Duration;

use crate::{Error, Result};

/// Default timeout for Redis operations
pub const STORE_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Default timeout for playback driver calls
pub const DRIVER_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout configuration
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub store: Duration,
    pub driver: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            store: STORE_OPERATION_TIMEOUT,
            driver: DRIVER_CALL_TIMEOUT,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set store operation timeout
    #[must_use]
    pub const fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store = timeout;
        self
    }

    /// Set driver call timeout
    #[must_use]
    pub const fn with_driver_timeout(mut self, timeout: Duration) -> Self {
        self.driver = timeout;
        self
    }
}

/// Run `fut` with an upper bound, mapping an elapsed deadline to [`Error::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "{operation} did not complete within {}ms",
            limit.as_millis()
        ))),
    }
}
