//! Multivariate Gaussian log-densities via Cholesky factors

use crate::error::{RiskError, RiskResult};
use nalgebra::{DMatrix, DVector};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// A mixture component with its covariance factorized once
#[derive(Debug, Clone)]
pub(crate) struct PreparedComponent {
    log_weight: f64,
    mean: DVector<f64>,
    /// Lower Cholesky factor of the covariance
    chol_l: DMatrix<f64>,
    /// -0.5 * (d ln 2π + ln |Σ|)
    log_norm: f64,
}

impl PreparedComponent {
    pub(crate) fn new(
        index: usize,
        weight: f64,
        mean: &[f64],
        covariance: &[Vec<f64>],
    ) -> RiskResult<Self> {
        let d = mean.len();
        if covariance.len() != d || covariance.iter().any(|row| row.len() != d) {
            return Err(RiskError::NumericalFailure(format!(
                "component {index}: covariance is not {d}x{d}"
            )));
        }

        let cov = DMatrix::from_fn(d, d, |i, j| covariance[i][j]);
        let chol = cov.cholesky().ok_or_else(|| {
            RiskError::NumericalFailure(format!(
                "component {index}: covariance is not positive definite"
            ))
        })?;
        let chol_l = chol.l();
        let log_det = 2.0 * chol_l.diagonal().iter().map(|v| v.ln()).sum::<f64>();

        Ok(Self {
            log_weight: weight.ln(),
            mean: DVector::from_column_slice(mean),
            chol_l,
            log_norm: -0.5 * (d as f64 * LN_2PI + log_det),
        })
    }

    /// ln N(x | μ, Σ)
    pub(crate) fn log_density(&self, x: &[f64]) -> f64 {
        let diff = DVector::from_column_slice(x) - &self.mean;
        match self.chol_l.solve_lower_triangular(&diff) {
            Some(y) => self.log_norm - 0.5 * y.norm_squared(),
            None => f64::NEG_INFINITY,
        }
    }

    /// ln w + ln N(x | μ, Σ)
    pub(crate) fn weighted_log_density(&self, x: &[f64]) -> f64 {
        self.log_weight + self.log_density(x)
    }
}

/// Numerically stable ln Σ exp(v)
pub(crate) fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Index of the largest value; ties resolve to the lowest index
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_normal_density() {
        let c = PreparedComponent::new(0, 1.0, &[0.0, 0.0], &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        // ln N(0 | 0, I_2) = -ln(2π)
        assert!((c.log_density(&[0.0, 0.0]) + LN_2PI).abs() < 1e-12);
        assert!((c.log_density(&[1.0, 0.0]) + LN_2PI + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_correlated_density_matches_closed_form() {
        // Σ = [[2, 1], [1, 2]], |Σ| = 3, Σ⁻¹ = [[2, -1], [-1, 2]] / 3
        let c = PreparedComponent::new(0, 0.5, &[1.0, -1.0], &[vec![2.0, 1.0], vec![1.0, 2.0]])
            .unwrap();
        let x = [2.0, 0.0];
        let maha = (2.0 * 1.0 - 2.0 * 1.0 + 2.0 * 1.0) / 3.0;
        let expected = -0.5 * (2.0 * LN_2PI + 3.0_f64.ln() + maha);
        assert!((c.log_density(&x) - expected).abs() < 1e-12);
        assert!((c.weighted_log_density(&x) - (expected + 0.5_f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_indefinite_covariance() {
        let err = PreparedComponent::new(3, 1.0, &[0.0, 0.0], &[vec![1.0, 2.0], vec![2.0, 1.0]]);
        assert!(matches!(err, Err(RiskError::NumericalFailure(_))));
    }

    #[test]
    fn test_log_sum_exp() {
        let v = [1000.0, 1000.0];
        assert!((log_sum_exp(&v) - (1000.0 + 2.0_f64.ln())).abs() < 1e-9);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_argmax_ties_pick_lowest() {
        assert_eq!(argmax(&[0.2, 0.7, 0.7]), 1);
        assert_eq!(argmax(&[f64::NEG_INFINITY, -3.0]), 1);
    }
}
