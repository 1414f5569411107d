//! Dependence estimation between legs.
//!
//! Sampling uses the Pearson correlation of normal scores (ranks pushed
//! through Φ⁻¹), which ignores each leg's marginal shape. Kendall's tau on the
//! raw values is computed alongside for reporting only.

use nalgebra::{DMatrix, SymmetricEigen};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

/// Smallest eigenvalue allowed in a repaired correlation matrix.
pub const EIGEN_FLOOR: f64 = 1e-6;

/// 1-based ranks, ties sharing the average of the ranks they span.
pub fn average_ranks(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && x[order[j + 1]] == x[order[i]] {
            j += 1;
        }
        // positions i..=j share ranks (i+1)..=(j+1)
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Rank/(n+1) pseudo-observations pushed through the standard normal
/// quantile function.
pub fn normal_scores(x: &[f64], std_normal: &Normal) -> Vec<f64> {
    let denom = x.len() as f64 + 1.0;
    average_ranks(x)
        .into_iter()
        .map(|r| std_normal.inverse_cdf(r / denom))
        .collect()
}

/// Pearson correlation matrix of equal-length columns.
///
/// A column with zero variance carries no dependence information; its
/// off-diagonal entries are 0.
pub fn pearson_matrix(columns: &[Vec<f64>]) -> DMatrix<f64> {
    let k = columns.len();
    let centred: Vec<(Vec<f64>, f64)> = columns
        .iter()
        .map(|c| {
            let n = c.len().max(1) as f64;
            let mean = c.iter().sum::<f64>() / n;
            let dev: Vec<f64> = c.iter().map(|v| v - mean).collect();
            let norm = dev.iter().map(|d| d * d).sum::<f64>().sqrt();
            (dev, norm)
        })
        .collect();

    let mut r = DMatrix::<f64>::identity(k, k);
    for i in 0..k {
        for j in (i + 1)..k {
            let (di, ni) = &centred[i];
            let (dj, nj) = &centred[j];
            let rho = if *ni > 0.0 && *nj > 0.0 {
                let dot: f64 = di.iter().zip(dj).map(|(a, b)| a * b).sum();
                (dot / (ni * nj)).clamp(-1.0, 1.0)
            } else {
                0.0
            };
            r[(i, j)] = rho;
            r[(j, i)] = rho;
        }
    }
    r
}

/// Correlation matrix of the normal-score transforms of each column.
pub fn normal_score_correlation(columns: &[Vec<f64>], std_normal: &Normal) -> DMatrix<f64> {
    let z: Vec<Vec<f64>> = columns.iter().map(|c| normal_scores(c, std_normal)).collect();
    pearson_matrix(&z)
}

/// Kendall's tau-b. `None` when undefined (fewer than two points, or either
/// series constant).
pub fn kendall_tau(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }

    let mut concordant = 0i64;
    let mut discordant = 0i64;
    let mut tied_x_only = 0i64;
    let mut tied_y_only = 0i64;
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[i] - x[j];
            let dy = y[i] - y[j];
            if dx.is_nan() || dy.is_nan() {
                continue;
            }
            match (dx == 0.0, dy == 0.0) {
                (true, true) => {}
                (true, false) => tied_x_only += 1,
                (false, true) => tied_y_only += 1,
                (false, false) => {
                    if (dx > 0.0) == (dy > 0.0) {
                        concordant += 1;
                    } else {
                        discordant += 1;
                    }
                }
            }
        }
    }

    let untied_x = (concordant + discordant + tied_y_only) as f64;
    let untied_y = (concordant + discordant + tied_x_only) as f64;
    let denom = (untied_x * untied_y).sqrt();
    if denom <= 0.0 {
        return None;
    }
    let tau = (concordant - discordant) as f64 / denom;
    tau.is_finite().then_some(tau)
}

/// Pairwise Kendall's tau on raw columns; undefined pairs are reported as 0.0.
pub fn kendall_tau_matrix(columns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let k = columns.len();
    let mut taus = identity_rows(k);
    for i in 0..k {
        for j in (i + 1)..k {
            let tau = kendall_tau(&columns[i], &columns[j]).unwrap_or(0.0);
            taus[i][j] = tau;
            taus[j][i] = tau;
        }
    }
    taus
}

/// k×k identity as nested rows (the "no dependence information" matrix).
pub fn identity_rows(k: usize) -> Vec<Vec<f64>> {
    (0..k)
        .map(|i| (0..k).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect()
}

/// Clip eigenvalues below `floor` and rebuild the matrix from the input
/// eigenvectors. The result is symmetric with every eigenvalue >= `floor`,
/// so it always admits a Cholesky factor.
pub fn repair_psd(matrix: DMatrix<f64>, floor: f64) -> DMatrix<f64> {
    let eig = SymmetricEigen::new(matrix);
    let mut clipped = 0usize;
    let lambdas = eig.eigenvalues.map(|l| {
        if l < floor || l.is_nan() {
            clipped += 1;
            floor
        } else {
            l
        }
    });
    if clipped > 0 {
        debug!("repair_psd: clipped {} eigenvalue(s) to {:e}", clipped, floor);
    }
    let v = eig.eigenvectors;
    let rebuilt = &v * DMatrix::from_diagonal(&lambdas) * v.transpose();
    symmetrize(rebuilt)
}

fn symmetrize(m: DMatrix<f64>) -> DMatrix<f64> {
    let t = m.transpose();
    (m + t) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn std_normal() -> Normal {
        Normal::new(0.0, 1.0).unwrap()
    }

    #[test]
    fn average_ranks_share_ties() {
        let r = average_ranks(&[10.0, 20.0, 10.0, 30.0]);
        assert_eq!(r, vec![1.5, 3.0, 1.5, 4.0]);
    }

    #[test]
    fn normal_scores_are_symmetric_around_zero() {
        let z = normal_scores(&[1.0, 2.0, 3.0], &std_normal());
        assert_relative_eq!(z[1], 0.0, epsilon = 1e-9);
        assert_relative_eq!(z[0], -z[2], epsilon = 1e-9);
    }

    #[test]
    fn pearson_matrix_handles_constant_column() {
        let cols = vec![vec![1.0, 2.0, 3.0, 4.0], vec![2.0, 4.0, 6.0, 8.0], vec![5.0; 4]];
        let r = pearson_matrix(&cols);
        assert_relative_eq!(r[(0, 1)], 1.0, epsilon = 1e-12);
        assert_eq!(r[(0, 2)], 0.0);
        assert_eq!(r[(2, 2)], 1.0);
    }

    #[test]
    fn normal_score_correlation_of_monotone_transform_is_one() {
        let x: Vec<f64> = (1..=50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| v.powi(3)).collect();
        let r = normal_score_correlation(&[x, y], &std_normal());
        assert_relative_eq!(r[(0, 1)], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn kendall_tau_matches_known_values() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(kendall_tau(&x, &x).unwrap(), 1.0, epsilon = 1e-12);
        let rev = [5.0, 4.0, 3.0, 2.0, 1.0];
        assert_relative_eq!(kendall_tau(&x, &rev).unwrap(), -1.0, epsilon = 1e-12);
        // 8 concordant, 2 discordant
        let y = [1.0, 3.0, 2.0, 5.0, 4.0];
        assert_relative_eq!(kendall_tau(&x, &y).unwrap(), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn kendall_tau_undefined_for_constant_series() {
        assert!(kendall_tau(&[1.0, 2.0, 3.0], &[4.0, 4.0, 4.0]).is_none());
        let m = kendall_tau_matrix(&[vec![1.0, 2.0, 3.0], vec![4.0, 4.0, 4.0]]);
        assert_eq!(m, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn repair_fixes_indefinite_matrix() {
        let bad = DMatrix::from_row_slice(
            3,
            3,
            &[1.0, 0.95, 0.95, 0.95, 1.0, -0.95, 0.95, -0.95, 1.0],
        );
        assert!(bad.clone().cholesky().is_none());

        let fixed = repair_psd(bad, EIGEN_FLOOR);
        assert_relative_eq!(fixed.clone(), fixed.transpose(), epsilon = 1e-12);
        let eig = SymmetricEigen::new(fixed.clone());
        for l in eig.eigenvalues.iter() {
            assert!(*l >= EIGEN_FLOOR - 1e-9, "eigenvalue {} below floor", l);
        }
        assert!(fixed.cholesky().is_some());
    }

    #[test]
    fn repair_leaves_valid_matrix_unchanged() {
        let good = DMatrix::from_row_slice(2, 2, &[1.0, 0.3, 0.3, 1.0]);
        let fixed = repair_psd(good.clone(), EIGEN_FLOOR);
        assert_relative_eq!(fixed, good, epsilon = 1e-12);
    }
}
