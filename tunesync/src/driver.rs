//! Simulated local player
//!
//! Stands in for a real media engine: position advances with the monotonic
//! clock at a configurable rate while playing. A rate slightly off 1.0
//! makes a member drift so the reconciler has something to correct.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tunesync_core::service::{
    AudioLatencySource, PlaybackDriver, PlaybackState, ReportedAudioLatency,
};
use tunesync_core::Result;

#[derive(Debug, Clone, Copy)]
struct Anchor {
    position_ms: f64,
    at: Instant,
    paused: bool,
}

#[derive(Debug)]
pub struct SimulatedDriver {
    track_id: String,
    rate: f64,
    audio: Option<ReportedAudioLatency>,
    anchor: Mutex<Anchor>,
}

impl SimulatedDriver {
    pub fn new(track_id: impl Into<String>, start_position_ms: u64, paused: bool, rate: f64) -> Self {
        Self {
            track_id: track_id.into(),
            rate: if rate.is_finite() && rate > 0.0 { rate } else { 1.0 },
            audio: None,
            anchor: Mutex::new(Anchor {
                position_ms: start_position_ms as f64,
                at: Instant::now(),
                paused,
            }),
        }
    }

    /// Report a fixed output pipeline latency to the estimator
    #[must_use]
    pub fn with_audio_latency(mut self, base_ms: f64, output_ms: f64) -> Self {
        self.audio = Some(ReportedAudioLatency { base_ms, output_ms });
        self
    }

    fn position_at(&self, anchor: &Anchor, now: Instant) -> f64 {
        if anchor.paused {
            anchor.position_ms
        } else {
            let elapsed_ms = now.duration_since(anchor.at).as_secs_f64() * 1000.0;
            anchor.position_ms + elapsed_ms * self.rate
        }
    }

    fn reanchor(&self, position_ms: Option<f64>, paused: bool) {
        let now = Instant::now();
        let mut anchor = self.anchor.lock();
        let position_ms = position_ms.unwrap_or_else(|| self.position_at(&anchor, now));
        *anchor = Anchor {
            position_ms,
            at: now,
            paused,
        };
    }
}

#[async_trait]
impl PlaybackDriver for SimulatedDriver {
    async fn current_state(&self) -> Result<Option<PlaybackState>> {
        let anchor = *self.anchor.lock();
        let position = self.position_at(&anchor, Instant::now());
        Ok(Some(PlaybackState {
            position_ms: position.max(0.0).round() as u64,
            is_paused: anchor.paused,
            track_id: Some(self.track_id.clone()),
        }))
    }

    async fn seek(&self, position_ms: u64) -> Result<()> {
        let paused = self.anchor.lock().paused;
        self.reanchor(Some(position_ms as f64), paused);
        tracing::info!(position_ms, "Simulated player seeked");
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        self.reanchor(None, false);
        tracing::info!("Simulated player resumed");
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.reanchor(None, true);
        tracing::info!("Simulated player paused");
        Ok(())
    }
}

impl AudioLatencySource for SimulatedDriver {
    fn reported_latency(&self) -> Option<ReportedAudioLatency> {
        self.audio
    }
}
