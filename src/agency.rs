use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::ValidationError;

pub const DEFAULT_BINS: usize = 20;
pub const DEFAULT_HIGH_THRESHOLD: f64 = 0.7;
pub const DEFAULT_LOW_THRESHOLD: f64 = 0.3;
const SMOOTHING: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgencyCategory {
    /// The action was caused by the agent itself.
    SelfCaused,
    External,
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgencyAttribution {
    /// Mean mutual information per dimension pair, in nats.
    pub score: f64,
    pub category: AgencyCategory,
    pub confidence: f64,
    /// Mean histogram entropy of the internal samples, in nats.
    pub internal_entropy: f64,
    /// Mean histogram entropy of the active samples, in nats.
    pub active_entropy: f64,
}

/// Estimates how strongly internal states drive active states.
///
/// Each sample is a vector of dimensions. Every (internal dimension, active
/// dimension) pair is binned into a `bins × bins` histogram and the mutual
/// information of the pair is averaged over all pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct AgencyDetector {
    bins: usize,
    high_threshold: f64,
    low_threshold: f64,
}

impl Default for AgencyDetector {
    fn default() -> Self {
        Self {
            bins: DEFAULT_BINS,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            low_threshold: DEFAULT_LOW_THRESHOLD,
        }
    }
}

impl AgencyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Histogram resolution per axis. At least one bin is used.
    pub fn bins(mut self, bins: usize) -> Self {
        self.bins = bins.max(1);
        self
    }

    /// Scores at or above `high` are self-caused, at or below `low` external.
    pub fn thresholds(mut self, low: f64, high: f64) -> Self {
        self.low_threshold = low;
        self.high_threshold = high;
        self
    }

    /// Mutual-information agency score, never negative.
    ///
    /// Fewer than two samples score `0.0`.
    ///
    /// # Errors
    ///
    /// Fails when the two sample arrays differ in length or when the samples
    /// within one array have differing dimensions.
    pub fn score(
        &self,
        internal: &[Vec<f64>],
        active: &[Vec<f64>],
    ) -> Result<f64, ValidationError> {
        if internal.len() != active.len() {
            return Err(ValidationError::SampleLengthMismatch {
                internal: internal.len(),
                active: active.len(),
            });
        }
        let internal_dims = dimensions(internal, "internal")?;
        let active_dims = dimensions(active, "active")?;
        if internal.len() < 2 || internal_dims == 0 || active_dims == 0 {
            return Ok(0.0);
        }

        let internal_bins: Vec<Vec<usize>> = (0..internal_dims)
            .map(|d| self.bin_column(internal, d))
            .collect();
        let active_bins: Vec<Vec<usize>> = (0..active_dims)
            .map(|d| self.bin_column(active, d))
            .collect();

        let mut total = 0.0;
        for x in &internal_bins {
            for y in &active_bins {
                total += self.mutual_information(x, y);
            }
        }
        let pairs = (internal_dims * active_dims) as f64;
        let score = (total / pairs).max(0.0);
        trace!(pairs, score, "agency mutual information");
        Ok(score)
    }

    /// Score `before` against `after` and label the result.
    pub fn attribute(
        &self,
        before: &[Vec<f64>],
        after: &[Vec<f64>],
    ) -> Result<AgencyAttribution, ValidationError> {
        let score = self.score(before, after)?;
        let (category, confidence) = self.categorize(score);
        let attribution = AgencyAttribution {
            score,
            category,
            confidence,
            internal_entropy: self.mean_entropy(before),
            active_entropy: self.mean_entropy(after),
        };
        debug!(score, ?category, confidence, "agency attributed");
        Ok(attribution)
    }

    /// Map a score to a category with a confidence that grows with the
    /// distance from the deciding threshold.
    pub fn categorize(&self, score: f64) -> (AgencyCategory, f64) {
        let high = self.high_threshold;
        let low = self.low_threshold;
        if score >= high {
            let span = (1.0 - high).max(f64::EPSILON);
            (
                AgencyCategory::SelfCaused,
                (0.5 + 0.5 * (score - high) / span).clamp(0.0, 1.0),
            )
        } else if score <= low {
            let span = low.max(f64::EPSILON);
            (
                AgencyCategory::External,
                (0.5 + 0.5 * (low - score) / span).clamp(0.0, 1.0),
            )
        } else {
            let half = ((high - low) / 2.0).max(f64::EPSILON);
            let nearest = (score - low).min(high - score);
            (AgencyCategory::Ambiguous, (nearest / half).clamp(0.0, 1.0))
        }
    }

    fn bin_column(&self, samples: &[Vec<f64>], dim: usize) -> Vec<usize> {
        let values = samples.iter().map(|s| s[dim]);
        let (min, max) = values.clone().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let range = max - min;
        values
            .map(|v| {
                if !(range > 0.0) || !v.is_finite() {
                    0
                } else {
                    let idx = ((v - min) / range * self.bins as f64).floor() as usize;
                    idx.min(self.bins - 1)
                }
            })
            .collect()
    }

    fn mutual_information(&self, x: &[usize], y: &[usize]) -> f64 {
        let n = x.len() as f64;
        let b = self.bins;
        let mut joint = vec![0.0; b * b];
        let mut px = vec![0.0; b];
        let mut py = vec![0.0; b];
        for (&i, &j) in x.iter().zip(y) {
            joint[i * b + j] += 1.0;
            px[i] += 1.0;
            py[j] += 1.0;
        }
        let mut mi = 0.0;
        for i in 0..b {
            let pi = px[i] / n + SMOOTHING;
            for j in 0..b {
                let pj = py[j] / n + SMOOTHING;
                let pij = joint[i * b + j] / n + SMOOTHING;
                mi += pij * (pij / (pi * pj)).ln();
            }
        }
        mi
    }

    fn mean_entropy(&self, samples: &[Vec<f64>]) -> f64 {
        let Some(dims) = samples.first().map(Vec::len) else {
            return 0.0;
        };
        if dims == 0 {
            return 0.0;
        }
        let n = samples.len() as f64;
        let total: f64 = (0..dims)
            .map(|d| {
                let mut counts = vec![0.0; self.bins];
                for idx in self.bin_column(samples, d) {
                    counts[idx] += 1.0;
                }
                counts
                    .iter()
                    .filter(|c| **c > 0.0)
                    .map(|c| {
                        let p = c / n;
                        -p * p.ln()
                    })
                    .sum::<f64>()
            })
            .sum();
        total / dims as f64
    }
}

fn dimensions(samples: &[Vec<f64>], which: &'static str) -> Result<usize, ValidationError> {
    let dims = samples.first().map_or(0, Vec::len);
    if samples.iter().any(|s| s.len() != dims) {
        return Err(ValidationError::RaggedSamples { which });
    }
    Ok(dims)
}
