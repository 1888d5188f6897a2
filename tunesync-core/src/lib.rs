pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod resilience;
pub mod service;

#[cfg(test)]
pub mod test_helpers;

pub use cache::KeyBuilder;
pub use config::Config;
pub use error::{Error, Result};
pub use service::SyncLoopController;
