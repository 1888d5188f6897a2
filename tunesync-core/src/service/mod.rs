pub mod driver;
pub mod latency;
pub mod publisher;
pub mod reconciler;
pub mod smoothing;
pub mod sync_loop;

pub use driver::{PlaybackDriver, PlaybackState};
pub use latency::{
    AudioLatencySource, LatencyEstimator, ReportedAudioLatency, RoundTripProber, StoreProber,
    UnreportedAudioLatency,
};
pub use publisher::SnapshotPublisher;
pub use reconciler::{PlayCommand, PositionReconciler, ReconcileOutcome};
pub use smoothing::JitterSmoother;
pub use sync_loop::SyncLoopController;
