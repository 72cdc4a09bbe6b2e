//! Cluster risk model (unsupervised)
//!
//! A Gaussian mixture over standardized training features. After EM
//! converges, every training batch is hard-assigned to its most probable
//! component and each component is labeled high- or low-risk from the share
//! of failed batches it received. New batches inherit the label of the
//! component they fall into.

mod em;
mod gaussian;

use crate::config::TrainingConfig;
use crate::error::{RiskError, RiskResult};
use crate::models::RiskLabel;
use em::{fit_mixture, EmSettings, MixtureParams};
use gaussian::{argmax, log_sum_exp, PreparedComponent};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Fitted parameters and risk statistics for one mixture component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    pub weight: f64,
    /// Mean in standardized feature space
    pub mean: Vec<f64>,
    /// Full covariance, row-major
    pub covariance: Vec<Vec<f64>>,
    /// Training batches hard-assigned to this component
    pub assigned_count: usize,
    pub fail_count: usize,
    pub fail_fraction: f64,
    pub risk_label: RiskLabel,
    /// Set when no training batch was assigned, so the label is a default
    pub low_confidence: bool,
}

/// Immutable fitted state of the cluster risk model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterModelState {
    pub components: Vec<ComponentState>,
    pub cluster_risk_threshold: f64,
    pub random_seed: u64,
    pub converged: bool,
    pub iterations: usize,
    /// Mean per-row log-likelihood of the training rows under the final fit
    pub mean_log_likelihood: f64,
}

/// Result of scoring one standardized feature vector
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterScore {
    pub component_id: usize,
    pub risk_label: RiskLabel,
    /// ln p(x) under the whole mixture
    pub log_likelihood: f64,
    pub fail_fraction: f64,
    /// Set when the most probable component saw no training batch, so the
    /// label comes from the nearest supported component
    pub low_confidence: bool,
}

/// Fit-time settings, taken from the training configuration
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub components: usize,
    pub cluster_risk_threshold: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
    pub covariance_regularization: f64,
    pub seed: u64,
}

impl From<&TrainingConfig> for ClusterSettings {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            components: config.cluster_count,
            cluster_risk_threshold: config.cluster_risk_threshold,
            tolerance: config.em_convergence_tolerance,
            max_iterations: config.em_max_iterations,
            covariance_regularization: config.covariance_regularization,
            seed: config.random_seed,
        }
    }
}

struct Fitted {
    state: ClusterModelState,
    prepared: Vec<PreparedComponent>,
}

/// Gaussian-mixture risk model; unusable for scoring until fitted or restored
pub struct ClusterRiskModel {
    /// `None` for a model restored from stored state, which can only score
    settings: Option<ClusterSettings>,
    fitted: Option<Fitted>,
}

impl ClusterRiskModel {
    pub fn new(settings: ClusterSettings) -> Self {
        Self {
            settings: Some(settings),
            fitted: None,
        }
    }

    /// Restore a model from persisted state
    pub fn from_state(state: ClusterModelState) -> RiskResult<Self> {
        if state.components.is_empty() {
            return Err(RiskError::ModelNotFitted("cluster risk model"));
        }
        let prepared = state
            .components
            .iter()
            .enumerate()
            .map(|(k, c)| PreparedComponent::new(k, c.weight, &c.mean, &c.covariance))
            .collect::<RiskResult<Vec<_>>>()?;

        Ok(Self {
            settings: None,
            fitted: Some(Fitted { state, prepared }),
        })
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn state(&self) -> RiskResult<&ClusterModelState> {
        self.fitted
            .as_ref()
            .map(|f| &f.state)
            .ok_or(RiskError::ModelNotFitted("cluster risk model"))
    }

    /// Fit the mixture and label its components.
    ///
    /// `data` holds standardized rows; `labels[i]` is true when row `i` failed QC.
    pub fn fit(&mut self, data: &[Vec<f64>], labels: &[bool]) -> RiskResult<&ClusterModelState> {
        let settings = self.settings.clone().ok_or_else(|| {
            RiskError::InvalidConfig("a restored cluster model cannot be refitted".into())
        })?;
        if data.len() != labels.len() {
            return Err(RiskError::InsufficientData(format!(
                "{} rows but {} labels",
                data.len(),
                labels.len()
            )));
        }

        let em = fit_mixture(
            data,
            &EmSettings {
                components: settings.components,
                tolerance: settings.tolerance,
                max_iterations: settings.max_iterations,
                covariance_regularization: settings.covariance_regularization,
                seed: settings.seed,
            },
        )?;

        let prepared = em.params.prepare()?;
        let (assignments, mean_log_likelihood) = assign(data, &prepared);
        let components = label_components(
            &em.params,
            &assignments,
            labels,
            settings.cluster_risk_threshold,
        );

        for (k, c) in components.iter().enumerate() {
            info!(
                "Cluster {}: weight={:.3}, assigned={}, fail_fraction={:.3}, label={}",
                k, c.weight, c.assigned_count, c.fail_fraction, c.risk_label
            );
            if c.low_confidence {
                warn!("Cluster {} received no training batches; labeled low-risk by default", k);
            }
        }

        let state = ClusterModelState {
            components,
            cluster_risk_threshold: settings.cluster_risk_threshold,
            random_seed: settings.seed,
            converged: em.converged,
            iterations: em.iterations,
            mean_log_likelihood,
        };

        let fitted = self.fitted.insert(Fitted { state, prepared });
        Ok(&fitted.state)
    }

    /// Assign a standardized vector to its most probable component
    pub fn score(&self, x: &[f64]) -> RiskResult<ClusterScore> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or(RiskError::ModelNotFitted("cluster risk model"))?;

        let dim = fitted.state.components[0].mean.len();
        if x.len() != dim {
            return Err(RiskError::SchemaMismatch {
                batch_id: "<standardized>".into(),
                detail: format!("expected {dim} standardized features, got {}", x.len()),
            });
        }

        let log_probs: Vec<f64> = fitted
            .prepared
            .iter()
            .map(|c| c.weighted_log_density(x))
            .collect();
        let nearest = argmax(&log_probs);

        // Components that received no training batch carry no risk evidence;
        // the batch takes the best supported component instead
        let supported: Vec<f64> = log_probs
            .iter()
            .zip(&fitted.state.components)
            .map(|(&lp, c)| if c.low_confidence { f64::NEG_INFINITY } else { lp })
            .collect();
        let component_id = if supported.iter().any(|lp| *lp > f64::NEG_INFINITY) {
            argmax(&supported)
        } else {
            nearest
        };
        let component = &fitted.state.components[component_id];

        Ok(ClusterScore {
            component_id,
            risk_label: component.risk_label,
            log_likelihood: log_sum_exp(&log_probs),
            fail_fraction: component.fail_fraction,
            low_confidence: component.low_confidence || component_id != nearest,
        })
    }
}

/// Hard assignments and mean per-row log-likelihood
fn assign(data: &[Vec<f64>], prepared: &[PreparedComponent]) -> (Vec<usize>, f64) {
    let mut total = 0.0;
    let assignments = data
        .iter()
        .map(|x| {
            let log_probs: Vec<f64> = prepared.iter().map(|c| c.weighted_log_density(x)).collect();
            total += log_sum_exp(&log_probs);
            argmax(&log_probs)
        })
        .collect();
    (assignments, total / data.len() as f64)
}

fn label_components(
    params: &MixtureParams,
    assignments: &[usize],
    labels: &[bool],
    threshold: f64,
) -> Vec<ComponentState> {
    let k = params.weights.len();
    let mut assigned = vec![0usize; k];
    let mut failed = vec![0usize; k];
    for (&c, &fail) in assignments.iter().zip(labels) {
        assigned[c] += 1;
        if fail {
            failed[c] += 1;
        }
    }

    (0..k)
        .map(|j| {
            let low_confidence = assigned[j] == 0;
            let fail_fraction = if low_confidence {
                0.0
            } else {
                failed[j] as f64 / assigned[j] as f64
            };
            let risk_label = if !low_confidence && fail_fraction >= threshold {
                RiskLabel::High
            } else {
                RiskLabel::Low
            };
            ComponentState {
                weight: params.weights[j],
                mean: params.means[j].clone(),
                covariance: params.covariances[j].clone(),
                assigned_count: assigned[j],
                fail_count: failed[j],
                fail_fraction,
                risk_label,
                low_confidence,
            }
        })
        .collect()
}
