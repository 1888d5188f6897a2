//! Jitter smoothing of member target positions
//!
//! Blends the newest raw target with the previous few so a single late or
//! early sample does not trigger a seek. Older targets were computed at an
//! earlier wall-clock instant, so each is projected forward by the time
//! elapsed since it was computed before blending; otherwise the blend would
//! trail a playing stream by a fraction of the tick interval.

use std::collections::VecDeque;

/// Newest first: current, previous, the one before
pub const DEFAULT_WEIGHTS: [f64; 3] = [0.6, 0.3, 0.1];

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    target_ms: f64,
    computed_at_ms: i64,
}

#[derive(Debug, Clone)]
pub struct JitterSmoother {
    weights: Vec<f64>,
    history: VecDeque<HistoryEntry>,
    /// A raw target this far from the projected history is a real jump
    /// (owner seek, track change), not jitter.
    discontinuity_ms: f64,
}

fn weights_are_usable(weights: &[f64]) -> bool {
    !weights.is_empty()
        && weights[0] > 0.0
        && weights.iter().all(|w| w.is_finite() && *w >= 0.0)
}

impl JitterSmoother {
    /// Unusable weights fall back to [`DEFAULT_WEIGHTS`].
    #[must_use]
    pub fn new(weights: &[f64], discontinuity_ms: f64) -> Self {
        let weights = if weights_are_usable(weights) {
            weights.to_vec()
        } else {
            tracing::warn!(?weights, "Unusable smoothing weights, using defaults");
            DEFAULT_WEIGHTS.to_vec()
        };
        let depth = weights.len() - 1;
        Self {
            weights,
            history: VecDeque::with_capacity(depth),
            discontinuity_ms,
        }
    }

    /// Number of past targets blended into each result
    #[must_use]
    pub fn depth(&self) -> usize {
        self.weights.len() - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Blend `raw_target_ms` (computed at `now_ms`) with the recent history
    /// and remember it for the following calls.
    pub fn smooth(&mut self, raw_target_ms: f64, now_ms: i64) -> f64 {
        let projected: Vec<f64> = self
            .history
            .iter()
            .map(|entry| entry.target_ms + (now_ms - entry.computed_at_ms) as f64)
            .collect();

        if projected
            .first()
            .is_some_and(|prev| (raw_target_ms - prev).abs() > self.discontinuity_ms)
        {
            tracing::debug!(
                raw_target_ms,
                "Target jumped beyond smoothing range, discarding history"
            );
            self.history.clear();
        }

        let mut weighted = self.weights[0] * raw_target_ms;
        let mut total = self.weights[0];
        let kept = self.history.len();
        for (weight, past) in self.weights[1..].iter().zip(projected.iter().take(kept)) {
            weighted += weight * past;
            total += weight;
        }

        self.history.push_front(HistoryEntry {
            target_ms: raw_target_ms,
            computed_at_ms: now_ms,
        });
        self.history.truncate(self.depth());

        weighted / total
    }
}

impl Default for JitterSmoother {
    fn default() -> Self {
        Self::new(&DEFAULT_WEIGHTS, 5000.0)
    }
}
