//! Expectation-maximization for a full-covariance Gaussian mixture
//!
//! Seeding: k-means++ over the standardized rows using
//! `ChaCha8Rng::seed_from_u64(seed)`, then every row is hard-assigned to its
//! nearest seed (ties to the lowest index). That partition is the
//! responsibility matrix for the first M-step, so the same rows and seed
//! always produce the same fit.
//!
//! The E-step runs per row on the rayon pool; all sums over rows are taken
//! sequentially in row order, so the result does not depend on thread count.

use super::gaussian::{log_sum_exp, PreparedComponent};
use crate::error::{RiskError, RiskResult};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, warn};

/// Keeps empty components from dividing by zero in the M-step
const MIN_COMPONENT_MASS: f64 = 10.0 * f64::EPSILON;

#[derive(Debug, Clone)]
pub(crate) struct EmSettings {
    pub components: usize,
    pub tolerance: f64,
    pub max_iterations: usize,
    pub covariance_regularization: f64,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct MixtureParams {
    pub weights: Vec<f64>,
    pub means: Vec<Vec<f64>>,
    pub covariances: Vec<Vec<Vec<f64>>>,
}

impl MixtureParams {
    pub(crate) fn prepare(&self) -> RiskResult<Vec<PreparedComponent>> {
        self.weights
            .iter()
            .zip(&self.means)
            .zip(&self.covariances)
            .enumerate()
            .map(|(k, ((&w, mean), cov))| PreparedComponent::new(k, w, mean, cov))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EmFit {
    pub params: MixtureParams,
    pub converged: bool,
    pub iterations: usize,
}

/// Fit the mixture to `data` (rows of equal length)
pub(crate) fn fit_mixture(data: &[Vec<f64>], settings: &EmSettings) -> RiskResult<EmFit> {
    let n = data.len();
    let k = settings.components;
    if n < k.max(2) {
        return Err(RiskError::InsufficientData(format!(
            "{k} mixture components need at least {} rows, got {n}",
            k.max(2)
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);
    let centers = seed_centers(data, k, &mut rng);
    let resp = partition(data, &centers);
    let mut params = m_step(data, &resp, settings.covariance_regularization);

    let mut prev_ll = f64::NEG_INFINITY;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=settings.max_iterations {
        iterations = iter;
        let prepared = params.prepare()?;
        let (resp, ll) = e_step(data, &prepared)?;
        params = m_step(data, &resp, settings.covariance_regularization);

        let change = (ll - prev_ll).abs();
        debug!("EM iteration {}: mean log-likelihood {:.6}", iter, ll);
        if change < settings.tolerance {
            converged = true;
            break;
        }
        prev_ll = ll;
    }

    if !converged {
        warn!(
            "EM did not converge within {} iterations (tolerance {})",
            settings.max_iterations, settings.tolerance
        );
    }

    Ok(EmFit {
        params,
        converged,
        iterations,
    })
}

/// k-means++ seeding; returns `k` distinct row indices
fn seed_centers(data: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let n = data.len();
    let mut centers = Vec::with_capacity(k);
    centers.push(rng.random_range(0..n));

    let mut nearest: Vec<f64> = data
        .iter()
        .map(|x| squared_distance(x, &data[centers[0]]))
        .collect();

    while centers.len() < k {
        let total: f64 = nearest.iter().sum();
        let next = if total > 0.0 {
            let target = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = None;
            for (i, &d) in nearest.iter().enumerate() {
                cumulative += d;
                if cumulative > target {
                    chosen = Some(i);
                    break;
                }
            }
            // Rounding can leave the target just past the last bucket
            chosen.unwrap_or_else(|| nearest.iter().rposition(|&d| d > 0.0).unwrap_or(0))
        } else {
            // Every row coincides with a center: pick any unused row
            let unused: Vec<usize> = (0..n).filter(|i| !centers.contains(i)).collect();
            unused[rng.random_range(0..unused.len())]
        };

        centers.push(next);
        for (d, x) in nearest.iter_mut().zip(data) {
            *d = d.min(squared_distance(x, &data[next]));
        }
    }

    centers
}

/// One-hot responsibilities from nearest-center assignment
fn partition(data: &[Vec<f64>], centers: &[usize]) -> Vec<Vec<f64>> {
    data.iter()
        .map(|x| {
            let mut best = 0;
            let mut best_d = f64::INFINITY;
            for (j, &c) in centers.iter().enumerate() {
                let d = squared_distance(x, &data[c]);
                if d < best_d {
                    best = j;
                    best_d = d;
                }
            }
            let mut row = vec![0.0; centers.len()];
            row[best] = 1.0;
            row
        })
        .collect()
}

fn m_step(data: &[Vec<f64>], resp: &[Vec<f64>], reg: f64) -> MixtureParams {
    let n = data.len();
    let d = data[0].len();
    let k = resp[0].len();

    let mut weights = Vec::with_capacity(k);
    let mut means = Vec::with_capacity(k);
    let mut covariances = Vec::with_capacity(k);

    for j in 0..k {
        let nk: f64 = resp.iter().map(|r| r[j]).sum::<f64>() + MIN_COMPONENT_MASS;

        let mut mean = vec![0.0; d];
        for (x, r) in data.iter().zip(resp) {
            for (m, &xi) in mean.iter_mut().zip(x) {
                *m += r[j] * xi;
            }
        }
        for m in &mut mean {
            *m /= nk;
        }

        let mut cov = vec![vec![0.0; d]; d];
        for (x, r) in data.iter().zip(resp) {
            if r[j] == 0.0 {
                continue;
            }
            for a in 0..d {
                let da = x[a] - mean[a];
                for b in 0..=a {
                    cov[a][b] += r[j] * da * (x[b] - mean[b]);
                }
            }
        }
        for a in 0..d {
            for b in 0..=a {
                let v = cov[a][b] / nk;
                cov[a][b] = v;
                cov[b][a] = v;
            }
            cov[a][a] += reg;
        }

        weights.push(nk / n as f64);
        means.push(mean);
        covariances.push(cov);
    }

    MixtureParams {
        weights,
        means,
        covariances,
    }
}

/// Responsibilities and mean per-row log-likelihood under `prepared`
fn e_step(data: &[Vec<f64>], prepared: &[PreparedComponent]) -> RiskResult<(Vec<Vec<f64>>, f64)> {
    let rows: Vec<(f64, Vec<f64>)> = data
        .par_iter()
        .map(|x| {
            let log_probs: Vec<f64> = prepared.iter().map(|c| c.weighted_log_density(x)).collect();
            let lse = log_sum_exp(&log_probs);
            let resp = log_probs.iter().map(|lp| (lp - lse).exp()).collect();
            (lse, resp)
        })
        .collect();

    let mut total = 0.0;
    let mut resp = Vec::with_capacity(rows.len());
    for (i, (lse, r)) in rows.into_iter().enumerate() {
        if !lse.is_finite() {
            return Err(RiskError::NumericalFailure(format!(
                "row {i} has zero density under every mixture component"
            )));
        }
        total += lse;
        resp.push(r);
    }

    Ok((resp, total / data.len() as f64))
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
