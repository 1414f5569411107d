//! Empirical single-leg estimator and inverse ECDF.
//!
//! P(X >= t) is read straight off the player's history. The inverse ECDF maps
//! copula-space uniforms back onto a leg's native value distribution.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};

/// Note attached to estimates built from an empty history.
pub const NO_HISTORY_NOTE: &str = "no history";

/// Smoothing applied to a marginal sample before thresholding.
///
/// Box-score counts are discrete and tie-heavy; a small symmetric jitter keeps
/// probabilities off hard step boundaries once the sample is large enough.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Smoothing {
    Off,
    Jitter { std_dev: f64, min_samples: usize },
}

impl Default for Smoothing {
    fn default() -> Self {
        Smoothing::Jitter {
            std_dev: 0.05,
            min_samples: 10,
        }
    }
}

impl Smoothing {
    /// Apply the policy in place. No-op when off, below `min_samples`, or
    /// when `std_dev` is not a usable standard deviation.
    fn apply<R: Rng + ?Sized>(self, sample: &mut [f64], rng: &mut R) {
        let Smoothing::Jitter { std_dev, min_samples } = self else {
            return;
        };
        if sample.len() < min_samples {
            return;
        }
        let Ok(noise) = Normal::new(0.0, std_dev) else {
            return;
        };
        for x in sample.iter_mut() {
            *x += noise.sample(rng);
        }
    }
}

/// Summary attached to a marginal estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarginalDetails {
    Summary { mean: f64, std: f64, median: f64 },
    NoHistory { note: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginalEstimate {
    pub probability: f64,
    pub sample_size: usize,
    pub details: MarginalDetails,
}

impl MarginalEstimate {
    fn no_history() -> Self {
        MarginalEstimate {
            probability: 0.0,
            sample_size: 0,
            details: MarginalDetails::NoHistory {
                note: NO_HISTORY_NOTE.to_string(),
            },
        }
    }
}

/// Estimate P(X >= threshold) from a historical sample.
///
/// Non-finite values are dropped. An empty sample is not an error: it yields
/// probability 0.0 with `sample_size` 0 and a "no history" note.
pub fn estimate_marginal<R: Rng + ?Sized>(
    sample: &[f64],
    threshold: f64,
    smoothing: Smoothing,
    rng: &mut R,
) -> MarginalEstimate {
    let mut x: Vec<f64> = sample.iter().copied().filter(|v| v.is_finite()).collect();
    if x.is_empty() {
        return MarginalEstimate::no_history();
    }

    smoothing.apply(&mut x, rng);

    let n = x.len();
    let probability = exceedance_fraction(&x, threshold);
    let mean = x.iter().mean();
    let std = if n > 1 { x.iter().std_dev() } else { 0.0 };
    let median = Data::new(x).median();

    MarginalEstimate {
        probability,
        sample_size: n,
        details: MarginalDetails::Summary {
            mean,
            std,
            median,
        },
    }
}

/// Plain fraction of finite sample points >= threshold; 0.0 for an empty
/// sample.
pub fn exceedance_fraction(sample: &[f64], threshold: f64) -> f64 {
    let mut n = 0usize;
    let mut hits = 0usize;
    for &v in sample.iter().filter(|v| v.is_finite()) {
        n += 1;
        if v >= threshold {
            hits += 1;
        }
    }
    if n == 0 {
        0.0
    } else {
        hits as f64 / n as f64
    }
}

/// Empirical quantile function of a sample.
///
/// The i-th order statistic (0-based) sits at plotting position
/// `(i + 1) / (n + 1)`; values in between are linearly interpolated and
/// positions outside `[1/(n+1), n/(n+1)]` clamp to the extremes.
#[derive(Debug, Clone)]
pub struct EmpiricalQuantile {
    sorted: Vec<f64>,
}

impl EmpiricalQuantile {
    /// `None` when the sample has no finite values.
    pub fn new(sample: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = sample.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);
        Some(EmpiricalQuantile { sorted })
    }

    pub fn quantile(&self, u: f64) -> f64 {
        let n = self.sorted.len();
        let pos = u * (n as f64 + 1.0) - 1.0;
        if pos.is_nan() || pos <= 0.0 {
            return self.sorted[0];
        }
        if pos >= (n - 1) as f64 {
            return self.sorted[n - 1];
        }
        let lo = pos.floor() as usize;
        let frac = pos - lo as f64;
        self.sorted[lo] + frac * (self.sorted[lo + 1] - self.sorted[lo])
    }
}

/// Map each probability in `u` to the sample's empirical quantile.
/// Returns an empty vector when the sample has no finite values.
pub fn ecdf_inverse_quantile(sample: &[f64], u: &[f64]) -> Vec<f64> {
    match EmpiricalQuantile::new(sample) {
        Some(q) => u.iter().map(|&p| q.quantile(p)).collect(),
        None => Vec::new(),
    }
}
