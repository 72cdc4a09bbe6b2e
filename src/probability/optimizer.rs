//! Damped Newton solver for L2-regularized logistic regression
//!
//! Minimizes `mean(log-loss) + (λ/2)·‖w‖²`; the intercept is not penalized.
//! Each step solves `H s = g` through a Cholesky factorization and backtracks
//! until the Armijo condition holds. When the Hessian cannot be factorized
//! the step falls back to the plain gradient.

use super::sigmoid;
use nalgebra::{DMatrix, DVector};
use tracing::debug;

const ARMIJO_C: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 40;

#[derive(Debug, Clone)]
pub(crate) struct SolverSettings {
    pub l2: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct Solution {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub converged: bool,
    pub iterations: usize,
    /// Mean log-loss on the training rows, without the penalty
    pub log_loss: f64,
}

/// ln(1 + e^z) without overflow
fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

/// Parameter vector layout: `[w_0 .. w_{d-1}, b]`
fn linear(theta: &DVector<f64>, x: &[f64]) -> f64 {
    let d = x.len();
    x.iter().zip(theta.iter()).map(|(a, b)| a * b).sum::<f64>() + theta[d]
}

fn mean_log_loss(theta: &DVector<f64>, data: &[Vec<f64>], labels: &[bool]) -> f64 {
    let total: f64 = data
        .iter()
        .zip(labels)
        .map(|(x, &y)| {
            let z = linear(theta, x);
            softplus(z) - if y { z } else { 0.0 }
        })
        .sum();
    total / data.len() as f64
}

fn objective(theta: &DVector<f64>, data: &[Vec<f64>], labels: &[bool], l2: f64) -> f64 {
    let d = theta.len() - 1;
    let penalty: f64 = theta.iter().take(d).map(|w| w * w).sum();
    mean_log_loss(theta, data, labels) + 0.5 * l2 * penalty
}

fn gradient_and_hessian(
    theta: &DVector<f64>,
    data: &[Vec<f64>],
    labels: &[bool],
    l2: f64,
) -> (DVector<f64>, DMatrix<f64>) {
    let p = theta.len();
    let d = p - 1;
    let n = data.len() as f64;
    let mut grad = DVector::zeros(p);
    let mut hess = DMatrix::zeros(p, p);

    for (x, &y) in data.iter().zip(labels) {
        let prob = sigmoid(linear(theta, x));
        let residual = prob - if y { 1.0 } else { 0.0 };
        let curvature = prob * (1.0 - prob);
        for a in 0..p {
            let xa = if a < d { x[a] } else { 1.0 };
            grad[a] += residual * xa;
            for b in 0..=a {
                let xb = if b < d { x[b] } else { 1.0 };
                hess[(a, b)] += curvature * xa * xb;
            }
        }
    }

    for a in 0..p {
        grad[a] /= n;
        for b in 0..=a {
            let v = hess[(a, b)] / n;
            hess[(a, b)] = v;
            hess[(b, a)] = v;
        }
    }
    for a in 0..d {
        grad[a] += l2 * theta[a];
        hess[(a, a)] += l2;
    }

    (grad, hess)
}

pub(crate) fn solve(data: &[Vec<f64>], labels: &[bool], settings: &SolverSettings) -> Solution {
    let d = data[0].len();
    let mut theta = DVector::zeros(d + 1);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=settings.max_iterations {
        iterations = iter;
        let (grad, hess) = gradient_and_hessian(&theta, data, labels, settings.l2);
        if grad.amax() < settings.tolerance {
            converged = true;
            break;
        }

        let step = match hess.cholesky() {
            Some(chol) => chol.solve(&grad),
            None => grad.clone(),
        };

        let current = objective(&theta, data, labels, settings.l2);
        let slope = grad.dot(&step);
        // Near the optimum the decrease drops below what f64 can resolve
        let noise = 4.0 * f64::EPSILON * current.abs().max(1.0);
        let mut t = 1.0;
        let mut accepted = false;
        for _ in 0..MAX_BACKTRACKS {
            let candidate = &theta - &step * t;
            let value = objective(&candidate, data, labels, settings.l2);
            if value <= current - ARMIJO_C * t * slope + noise {
                theta = candidate;
                accepted = true;
                break;
            }
            t *= 0.5;
        }
        debug!("Newton iteration {}: objective {:.8}, step {:.3e}", iter, current, t);

        if !accepted {
            // No descent left at machine precision
            converged = grad.amax() < settings.tolerance.sqrt();
            break;
        }
    }

    Solution {
        coefficients: theta.iter().take(d).copied().collect(),
        intercept: theta[d],
        converged,
        iterations,
        log_loss: mean_log_loss(&theta, data, labels),
    }
}
