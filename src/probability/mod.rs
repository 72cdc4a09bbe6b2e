//! Probability risk model (supervised)
//!
//! L2-regularized logistic regression on standardized features, predicting
//! the probability that a batch fails QC.

pub mod metrics;
mod optimizer;

use crate::config::TrainingConfig;
use crate::error::{RiskError, RiskResult};
use optimizer::{solve, SolverSettings};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use metrics::{EvaluationReport, EvaluationSplit};

/// Immutable fitted state: coefficients in standardized feature space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityModelState {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub l2_regularization_strength: f64,
    pub converged: bool,
    pub iterations: usize,
    /// Mean log-loss on the fitted rows
    pub training_log_loss: f64,
}

impl ProbabilityModelState {
    /// P(fail | x) for a standardized vector of the fitted dimension
    fn probability(&self, x: &[f64]) -> f64 {
        let z = self
            .coefficients
            .iter()
            .zip(x)
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + self.intercept;
        sigmoid(z)
    }
}

/// Logistic function that saturates to 0 or 1 instead of overflowing
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

#[derive(Debug, Clone)]
pub struct ProbabilitySettings {
    pub l2_regularization_strength: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl From<&TrainingConfig> for ProbabilitySettings {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            l2_regularization_strength: config.l2_regularization_strength,
            max_iterations: config.optimizer_max_iterations,
            tolerance: config.optimizer_tolerance,
        }
    }
}

/// Logistic regression risk model; scoring requires a fit or restored state
pub struct ProbabilityRiskModel {
    /// `None` for a model restored from stored state, which can only score
    settings: Option<ProbabilitySettings>,
    state: Option<ProbabilityModelState>,
}

impl ProbabilityRiskModel {
    pub fn new(settings: ProbabilitySettings) -> Self {
        Self {
            settings: Some(settings),
            state: None,
        }
    }

    pub fn from_state(state: ProbabilityModelState) -> Self {
        Self {
            settings: None,
            state: Some(state),
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> RiskResult<&ProbabilityModelState> {
        self.state
            .as_ref()
            .ok_or(RiskError::ModelNotFitted("probability risk model"))
    }

    /// Fit on standardized rows; `labels[i]` is true when row `i` failed QC
    pub fn fit(&mut self, data: &[Vec<f64>], labels: &[bool]) -> RiskResult<&ProbabilityModelState> {
        let settings = self.settings.clone().ok_or_else(|| {
            RiskError::InvalidConfig("a restored probability model cannot be refitted".into())
        })?;
        if data.is_empty() || data.len() != labels.len() {
            return Err(RiskError::InsufficientData(format!(
                "logistic regression needs matching non-empty rows and labels ({} rows, {} labels)",
                data.len(),
                labels.len()
            )));
        }

        let fails = labels.iter().filter(|&&l| l).count();
        if fails == 0 || fails == labels.len() {
            return Err(RiskError::LabelImbalance {
                rows: labels.len(),
                label: if fails == 0 { "pass" } else { "fail" },
            });
        }

        let solution = solve(
            data,
            labels,
            &SolverSettings {
                l2: settings.l2_regularization_strength,
                max_iterations: settings.max_iterations,
                tolerance: settings.tolerance,
            },
        );

        if solution.converged {
            info!(
                "Logistic regression converged in {} iterations (log-loss {:.4})",
                solution.iterations, solution.log_loss
            );
        } else {
            warn!(
                "Logistic regression stopped after {} iterations without converging (log-loss {:.4})",
                solution.iterations, solution.log_loss
            );
        }

        if solution.coefficients.iter().any(|c| !c.is_finite()) || !solution.intercept.is_finite() {
            return Err(RiskError::NumericalFailure(
                "logistic regression produced non-finite coefficients".into(),
            ));
        }

        let state = ProbabilityModelState {
            coefficients: solution.coefficients,
            intercept: solution.intercept,
            l2_regularization_strength: settings.l2_regularization_strength,
            converged: solution.converged,
            iterations: solution.iterations,
            training_log_loss: solution.log_loss,
        };
        Ok(&*self.state.insert(state))
    }

    /// Probability of failure in [0, 1]
    pub fn score(&self, x: &[f64]) -> RiskResult<f64> {
        let state = self.state()?;
        if x.len() != state.coefficients.len() {
            return Err(RiskError::SchemaMismatch {
                batch_id: "<standardized>".into(),
                detail: format!(
                    "expected {} standardized features, got {}",
                    state.coefficients.len(),
                    x.len()
                ),
            });
        }
        Ok(state.probability(x))
    }
}
