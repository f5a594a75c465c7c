use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace};

use crate::belief::BeliefState;
use crate::error::ValidationError;
use crate::math::mean_std;

pub const DEFAULT_GAIN_THRESHOLD: f64 = 0.3;
pub const DEFAULT_HISTORY_WINDOW: usize = 20;
const ADAPTIVE_FLOOR: f64 = 0.1;
const ADAPTIVE_CEILING: f64 = 0.9;

/// A belief update that reduced entropy by a significant fraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpistemicGainEvent {
    /// Fractional entropy reduction in `[0, 1]`.
    pub magnitude: f64,
    pub prior_entropy: f64,
    pub posterior_entropy: f64,
    /// Precision grew out of proportion to the entropy reduction.
    pub noetic_quality: bool,
    /// `KL(posterior || prior)` in nats.
    pub kl_gain: f64,
    pub threshold: f64,
    pub detected_at: DateTime<Utc>,
}

/// How the detection threshold is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMode {
    Fixed,
    /// `mean + std` of recent magnitudes, clamped to `[0.1, 0.9]`.
    Adaptive,
}

/// Flags belief updates that constitute significant learning.
#[derive(Debug, Clone)]
pub struct EpistemicGainDetector {
    threshold: f64,
    mode: ThresholdMode,
    window: usize,
    history: VecDeque<f64>,
}

impl Default for EpistemicGainDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_GAIN_THRESHOLD,
            mode: ThresholdMode::Fixed,
            window: DEFAULT_HISTORY_WINDOW,
            history: VecDeque::with_capacity(DEFAULT_HISTORY_WINDOW),
        }
    }
}

impl EpistemicGainDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed threshold, also the fallback while adaptive history is short.
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Switch to adaptive thresholding over the last `window` magnitudes.
    pub fn adaptive(mut self, window: usize) -> Self {
        self.mode = ThresholdMode::Adaptive;
        self.window = window.max(1);
        self
    }

    pub fn mode(&self) -> ThresholdMode {
        self.mode
    }

    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    /// Threshold the next check will use when none is passed explicitly.
    pub fn effective_threshold(&self) -> f64 {
        match self.mode {
            ThresholdMode::Fixed => self.threshold,
            ThresholdMode::Adaptive if self.history.len() < 2 => self.threshold,
            ThresholdMode::Adaptive => {
                let values: Vec<f64> = self.history.iter().copied().collect();
                let (mean, std) = mean_std(&values);
                (mean + std).clamp(ADAPTIVE_FLOOR, ADAPTIVE_CEILING)
            }
        }
    }

    /// Compare two beliefs and emit an event when entropy dropped by more
    /// than the threshold.
    ///
    /// Returns `None` when the prior entropy is not positive and finite, when
    /// the posterior entropy is infinite, or when the gain is too small. Every
    /// measurable magnitude is recorded in the history.
    pub fn check(
        &mut self,
        prior: &BeliefState,
        posterior: &BeliefState,
        threshold: Option<f64>,
    ) -> Option<EpistemicGainEvent> {
        let prior_entropy = prior.entropy();
        let posterior_entropy = posterior.entropy();
        if !prior_entropy.is_finite() || prior_entropy <= 0.0 {
            trace!(prior_entropy, "prior entropy unusable; skipping gain check");
            return None;
        }

        let threshold = threshold.unwrap_or_else(|| self.effective_threshold());
        let magnitude = if posterior_entropy.is_finite() {
            ((prior_entropy - posterior_entropy) / prior_entropy).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.record(magnitude);

        if magnitude < threshold || magnitude == 0.0 {
            trace!(magnitude, threshold, "belief update below gain threshold");
            return None;
        }

        let prior_trace = prior.precision_trace();
        let precision_increase = if prior_trace > 0.0 {
            (posterior.precision_trace() - prior_trace) / prior_trace
        } else {
            0.0
        };
        let noetic_quality = precision_increase > 2.0 * magnitude;
        let kl_gain = kl_gain(prior, posterior).unwrap_or(0.0);

        debug!(magnitude, threshold, noetic_quality, kl_gain, "epistemic gain detected");
        Some(EpistemicGainEvent {
            magnitude,
            prior_entropy,
            posterior_entropy,
            noetic_quality,
            kl_gain,
            threshold,
            detected_at: Utc::now(),
        })
    }

    fn record(&mut self, magnitude: f64) {
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(magnitude);
    }
}

/// Information gained by moving from `prior` to `posterior`, measured as
/// `KL(posterior || prior)` and clamped at zero.
pub fn kl_gain(prior: &BeliefState, posterior: &BeliefState) -> Result<f64, ValidationError> {
    posterior.kl_divergence(prior)
}
