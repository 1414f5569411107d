//! Joint exceedance probability for same-game parlays.
//!
//! With enough shared games the legs are coupled through a Gaussian copula:
//! the dependence comes from the normal-score correlation of the joint sample,
//! each leg keeps its own empirical distribution, and the joint figure is a
//! Monte Carlo estimate. With too few shared games every leg is estimated from
//! its own history and the marginals are multiplied.

use anyhow::Result;
use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, warn};

use super::correlation::{
    identity_rows, kendall_tau_matrix, normal_score_correlation, repair_psd, EIGEN_FLOOR,
};
use super::error::PropError;
use super::leg::Leg;
use super::marginal::{ecdf_inverse_quantile, exceedance_fraction};
use super::source::{JointSample, SampleSource};

/// Fewer shared games than this and the copula is not fitted.
pub const MIN_JOINT_ROWS: usize = 5;

pub const DEFAULT_N_SAMPLES: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointMethod {
    Copula,
    Independence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointEstimate {
    pub joint_probability: f64,
    /// Per-leg marginal probabilities, in leg order.
    pub marginals: Vec<f64>,
    /// Kendall's tau between legs; identity when no joint data was usable.
    pub kendall_tau: Vec<Vec<f64>>,
    /// Shared games behind the estimate.
    pub sample_size: usize,
    pub method: JointMethod,
    /// Monte Carlo standard error of `joint_probability` (0 when exact).
    pub std_error: f64,
}

/// Estimate P(every leg hits) for a parlay.
///
/// `table` must hold one column per leg (or no rows at all). Below
/// [`MIN_JOINT_ROWS`] shared games each leg's own history is pulled from
/// `source` and the legs are treated as independent.
pub fn estimate_joint<S, R>(
    legs: &[Leg],
    table: &JointSample,
    source: &S,
    n_samples: usize,
    rng: &mut R,
) -> Result<JointEstimate>
where
    S: SampleSource + ?Sized,
    R: Rng + ?Sized,
{
    if legs.is_empty() {
        return Err(PropError::NoLegs.into());
    }
    if n_samples == 0 {
        return Err(PropError::NoDraws.into());
    }
    if table.rows() > 0 && table.width() != legs.len() {
        return Err(PropError::ColumnMismatch {
            columns: table.width(),
            legs: legs.len(),
        }
        .into());
    }

    if table.rows() < MIN_JOINT_ROWS {
        debug!(
            "joint sample has {} row(s) (< {}), using independence fallback",
            table.rows(),
            MIN_JOINT_ROWS
        );
        let samples = legs
            .iter()
            .map(|leg| source.marginal_sample(leg))
            .collect::<Result<Vec<_>>>()?;
        return Ok(independence_joint(legs, &samples, table.rows()));
    }

    gaussian_copula_joint(legs, table, n_samples, rng)
}

/// Copula path, regardless of how many shared games there are.
pub fn gaussian_copula_joint<R: Rng + ?Sized>(
    legs: &[Leg],
    table: &JointSample,
    n_samples: usize,
    rng: &mut R,
) -> Result<JointEstimate> {
    let columns = table.columns();
    let k = legs.len();
    if table.width() != k {
        return Err(PropError::ColumnMismatch {
            columns: table.width(),
            legs: k,
        }
        .into());
    }
    if n_samples == 0 {
        return Err(PropError::NoDraws.into());
    }
    if table.rows() == 0 {
        return Err(PropError::EmptyJointSample.into());
    }
    let std_normal = Normal::new(0.0, 1.0)?;

    let corr = repair_psd(normal_score_correlation(columns, &std_normal), EIGEN_FLOOR);
    let l = cholesky_lower(corr);

    // Correlated uniforms, one vector per leg
    let mut uniforms = vec![Vec::with_capacity(n_samples); k];
    let mut eps = vec![0.0f64; k];
    for _ in 0..n_samples {
        for e in eps.iter_mut() {
            *e = StandardNormal.sample(rng);
        }
        for (j, u) in uniforms.iter_mut().enumerate() {
            let z: f64 = (0..=j).map(|m| l[(j, m)] * eps[m]).sum();
            u.push(std_normal.cdf(z));
        }
    }

    let draws: Vec<Vec<f64>> = columns
        .iter()
        .zip(&uniforms)
        .map(|(col, u)| ecdf_inverse_quantile(col, u))
        .collect();
    let hits = (0..n_samples)
        .filter(|&i| legs.iter().zip(&draws).all(|(leg, x)| leg.is_met(x[i])))
        .count();

    let joint = hits as f64 / n_samples as f64;
    let marginals = legs
        .iter()
        .zip(columns)
        .map(|(leg, col)| exceedance_fraction(col, leg.threshold()))
        .collect();

    debug!(
        "copula: {} legs, {} rows, {} draws, joint={:.4}",
        k,
        table.rows(),
        n_samples,
        joint
    );

    Ok(JointEstimate {
        joint_probability: joint,
        marginals,
        kendall_tau: kendall_tau_matrix(columns),
        sample_size: table.rows(),
        method: JointMethod::Copula,
        std_error: (joint * (1.0 - joint) / n_samples as f64).sqrt(),
    })
}

/// Independence fallback: product of each leg's own empirical marginal.
///
/// The identity tau matrix means "no dependence information", not "the legs
/// are independent".
pub fn independence_joint(legs: &[Leg], samples: &[Vec<f64>], joint_rows: usize) -> JointEstimate {
    let marginals: Vec<f64> = legs
        .iter()
        .zip(samples)
        .map(|(leg, s)| exceedance_fraction(s, leg.threshold()))
        .collect();

    JointEstimate {
        joint_probability: marginals.iter().product(),
        kendall_tau: identity_rows(legs.len()),
        marginals,
        sample_size: joint_rows,
        method: JointMethod::Independence,
        std_error: 0.0,
    }
}

/// Lower Cholesky factor, nudging the diagonal if round-off left the matrix
/// just short of positive definite.
fn cholesky_lower(mut corr: DMatrix<f64>) -> DMatrix<f64> {
    let k = corr.nrows();
    let mut jitter = EIGEN_FLOOR;
    for _ in 0..8 {
        if let Some(chol) = corr.clone().cholesky() {
            return chol.l();
        }
        for i in 0..k {
            corr[(i, i)] += jitter;
        }
        jitter *= 10.0;
    }

    warn!("cholesky failed after jitter; dropping cross-leg correlation");
    DMatrix::from_fn(k, k, |i, j| {
        if i == j {
            corr[(i, i)].max(EIGEN_FLOOR).sqrt()
        } else {
            0.0
        }
    })
}
