use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::resilience::TimeoutConfig;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub connect_timeout_seconds: u64,
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout_seconds: 5,
            key_prefix: "tunesync".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Tunables for the publish/reconcile loop and latency sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Publisher / reconciler tick period
    pub sync_interval_ms: u64,
    /// Round-trip and audio latency sampling period
    pub latency_interval_ms: u64,
    /// TTL of the owner snapshot; bounds storage for abandoned rooms
    pub snapshot_ttl_secs: u64,
    /// TTL of the per-room participant latency map
    pub latency_ttl_secs: u64,
    /// Upper bound on any single store operation
    pub store_timeout_ms: u64,
    /// Upper bound on any single playback driver call
    pub driver_timeout_ms: u64,

    /// Number of round-trip samples kept for averaging
    pub latency_window: usize,
    /// Round-trip jitter at or below which latency is reported as stable
    pub stable_jitter_ms: f64,

    /// Audio output latency assumed when the platform reports none
    pub audio_latency_default_ms: f64,
    /// Fixed overhead added on top of reported audio latency
    pub audio_platform_overhead_ms: f64,
    pub audio_latency_min_ms: f64,
    pub audio_latency_max_ms: f64,
    /// Add local audio output latency to the member's target position
    pub compensate_audio_latency: bool,

    /// Weights for the newest target first, then progressively older ones
    pub smoothing_weights: Vec<f64>,

    pub base_tolerance_ms: f64,
    pub min_tolerance_ms: f64,
    pub max_tolerance_ms: f64,

    /// Capacity of the session's recent-error ring
    pub max_recent_errors: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 1000,
            latency_interval_ms: 3000,
            snapshot_ttl_secs: 86400,
            latency_ttl_secs: 300,
            store_timeout_ms: 2000,
            driver_timeout_ms: 2000,

            latency_window: 10,
            stable_jitter_ms: 50.0,

            audio_latency_default_ms: 150.0,
            audio_platform_overhead_ms: 20.0,
            audio_latency_min_ms: 50.0,
            audio_latency_max_ms: 500.0,
            compensate_audio_latency: true,

            smoothing_weights: vec![0.6, 0.3, 0.1],

            base_tolerance_ms: 1000.0,
            min_tolerance_ms: 500.0,
            max_tolerance_ms: 5000.0,

            max_recent_errors: 5,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    #[must_use]
    pub const fn latency_interval(&self) -> Duration {
        Duration::from_millis(self.latency_interval_ms)
    }

    #[must_use]
    pub const fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    #[must_use]
    pub const fn latency_ttl(&self) -> Duration {
        Duration::from_secs(self.latency_ttl_secs)
    }

    #[must_use]
    pub fn timeouts(&self) -> TimeoutConfig {
        TimeoutConfig::new()
            .with_store_timeout(Duration::from_millis(self.store_timeout_ms))
            .with_driver_timeout(Duration::from_millis(self.driver_timeout_ms))
    }

    fn validate_into(&self, errors: &mut Vec<String>) {
        if self.sync_interval_ms == 0 {
            errors.push("sync.sync_interval_ms must be greater than 0".to_string());
        }
        if self.latency_interval_ms == 0 {
            errors.push("sync.latency_interval_ms must be greater than 0".to_string());
        }
        if self.snapshot_ttl_secs == 0 {
            errors.push("sync.snapshot_ttl_secs must be greater than 0".to_string());
        }
        if self.latency_window == 0 {
            errors.push("sync.latency_window must be at least 1".to_string());
        }
        for (name, value) in [
            ("stable_jitter_ms", self.stable_jitter_ms),
            ("audio_latency_default_ms", self.audio_latency_default_ms),
            ("audio_platform_overhead_ms", self.audio_platform_overhead_ms),
            ("audio_latency_min_ms", self.audio_latency_min_ms),
            ("audio_latency_max_ms", self.audio_latency_max_ms),
            ("base_tolerance_ms", self.base_tolerance_ms),
            ("min_tolerance_ms", self.min_tolerance_ms),
            ("max_tolerance_ms", self.max_tolerance_ms),
        ] {
            if !value.is_finite() {
                errors.push(format!("sync.{name} must be a finite number, got {value}"));
            }
        }
        if self.audio_latency_min_ms > self.audio_latency_max_ms {
            errors.push(format!(
                "sync.audio_latency_min_ms ({}) exceeds sync.audio_latency_max_ms ({})",
                self.audio_latency_min_ms, self.audio_latency_max_ms
            ));
        }
        if self.min_tolerance_ms > self.max_tolerance_ms {
            errors.push(format!(
                "sync.min_tolerance_ms ({}) exceeds sync.max_tolerance_ms ({})",
                self.min_tolerance_ms, self.max_tolerance_ms
            ));
        }
        if self.smoothing_weights.is_empty()
            || self.smoothing_weights[0] <= 0.0
            || self
                .smoothing_weights
                .iter()
                .any(|w| !w.is_finite() || *w < 0.0)
        {
            errors.push(
                "sync.smoothing_weights must be non-empty, non-negative, with a positive first weight"
                    .to_string(),
            );
        }
        if self.max_recent_errors == 0 {
            errors.push("sync.max_recent_errors must be at least 1".to_string());
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (TUNESYNC_SYNC__SYNC_INTERVAL_MS, etc.)
        builder = builder.add_source(
            Environment::with_prefix("TUNESYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check the configuration for values the sync loop cannot run with.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.redis.url.is_empty() {
            errors.push("redis.url must not be empty".to_string());
        }
        if self.redis.key_prefix.is_empty() {
            errors.push("redis.key_prefix must not be empty".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }
        self.sync.validate_into(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
