//! Prometheus metrics for the sync loop
//!
//! Metrics live in a crate-local registry; embedders expose them with
//! [`gather_metrics`].

use prometheus::{
    register_counter_vec_with_registry, register_gauge_with_registry,
    register_histogram_with_registry, CounterVec, Encoder, Gauge, Histogram, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Sync ticks by role and outcome (synced, idle, failed)
pub static SYNC_TICKS_TOTAL: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
    register_counter_vec_with_registry!(
        "tunesync_ticks_total",
        "Total number of sync ticks",
        &["role", "outcome"],
        REGISTRY.clone()
    )
    .expect("Failed to register SYNC_TICKS_TOTAL")
});

/// Corrections issued to the local playback driver (seek, play, pause)
pub static CORRECTIONS_TOTAL: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
    register_counter_vec_with_registry!(
        "tunesync_corrections_total",
        "Total number of playback corrections issued by the reconciler",
        &["kind"],
        REGISTRY.clone()
    )
    .expect("Failed to register CORRECTIONS_TOTAL")
});

/// Absolute distance between local position and smoothed target
pub static DRIFT_MS: std::sync::LazyLock<Histogram> = std::sync::LazyLock::new(|| {
    register_histogram_with_registry!(
        "tunesync_drift_ms",
        "Absolute member drift from the smoothed target in milliseconds",
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0],
        REGISTRY.clone()
    )
    .expect("Failed to register DRIFT_MS")
});

/// Most recent averaged round trip to the shared store
pub static ROUND_TRIP_MS: std::sync::LazyLock<Gauge> = std::sync::LazyLock::new(|| {
    register_gauge_with_registry!(
        "tunesync_round_trip_ms",
        "Averaged round-trip time to the shared store in milliseconds",
        REGISTRY.clone()
    )
    .expect("Failed to register ROUND_TRIP_MS")
});

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
