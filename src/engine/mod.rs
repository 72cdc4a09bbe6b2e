//! Inference engine
//!
//! Scores new batches against one [`ModelVersion`]. Each batch is validated,
//! standardized and passed through both risk models; the decision policy then
//! combines the two signals into one flag.
//!
//! A malformed batch produces a [`BatchError`] and never blocks the rest of
//! the run. Verdicts keep the input order.

mod policy;
mod summary;

pub use policy::{CombinePolicy, DecisionPolicy};
pub use summary::{ComponentStats, VerdictSummary};

use crate::cluster::ClusterRiskModel;
use crate::error::{RiskError, RiskResult};
use crate::models::{BatchRecord, FeatureSchema, RiskLabel};
use crate::normalize::NormalizationParams;
use crate::probability::ProbabilityRiskModel;
use crate::version::ModelVersion;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Risk assessment for one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub batch_id: String,
    pub collected_at: DateTime<Utc>,
    pub cluster_component_id: usize,
    pub cluster_risk_label: RiskLabel,
    /// Historical fail fraction of the assigned component
    pub cluster_fail_fraction: f64,
    pub cluster_log_likelihood: f64,
    /// The batch fell nearest a component no training batch supported
    #[serde(default)]
    pub cluster_low_confidence: bool,
    pub predicted_probability_fail: f64,
    /// `predicted_probability_fail >= probability_threshold`
    pub probability_flag: bool,
    pub combined_risk_flag: bool,
}

/// A batch that could not be scored
#[derive(Debug)]
pub struct BatchError {
    /// Position in the input sequence
    pub index: usize,
    pub batch_id: String,
    pub error: RiskError,
}

/// Verdicts for the batches that scored, errors for those that did not
#[derive(Debug, Default)]
pub struct InferenceOutcome {
    pub verdicts: Vec<RiskVerdict>,
    pub errors: Vec<BatchError>,
}

impl InferenceOutcome {
    pub fn summary(&self) -> VerdictSummary {
        VerdictSummary::from_verdicts(&self.verdicts)
    }
}

/// Models restored from one version, ready to score from many threads
pub struct InferenceEngine {
    schema: FeatureSchema,
    normalization: NormalizationParams,
    cluster: ClusterRiskModel,
    probability: ProbabilityRiskModel,
    policy: DecisionPolicy,
}

impl InferenceEngine {
    pub fn new(version: &ModelVersion, policy: DecisionPolicy) -> RiskResult<Self> {
        let (cluster, probability) = version.restore_models()?;
        Ok(Self {
            schema: version.schema.clone(),
            normalization: version.normalization.clone(),
            cluster,
            probability,
            policy,
        })
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Score a single batch
    pub fn score(&self, batch: &BatchRecord) -> RiskResult<RiskVerdict> {
        let row = self.schema.validate(&batch.batch_id, &batch.features)?;
        let z = self.normalization.transform_row(&row);

        let cluster = self.cluster.score(&z)?;
        let probability = self.probability.score(&z)?;

        Ok(RiskVerdict {
            batch_id: batch.batch_id.clone(),
            collected_at: batch.collected_at,
            cluster_component_id: cluster.component_id,
            cluster_risk_label: cluster.risk_label,
            cluster_fail_fraction: cluster.fail_fraction,
            cluster_log_likelihood: cluster.log_likelihood,
            cluster_low_confidence: cluster.low_confidence,
            predicted_probability_fail: probability,
            probability_flag: self.policy.probability_flag(probability),
            combined_risk_flag: self.policy.decide(cluster.risk_label, probability),
        })
    }

    /// Score every batch in parallel.
    ///
    /// Schema errors are collected per batch; any other error means the
    /// models themselves are unusable and aborts the run.
    pub fn apply(&self, batches: &[BatchRecord]) -> RiskResult<InferenceOutcome> {
        let results: Vec<RiskResult<RiskVerdict>> =
            batches.par_iter().map(|b| self.score(b)).collect();

        let mut outcome = InferenceOutcome {
            verdicts: Vec::with_capacity(batches.len()),
            errors: Vec::new(),
        };
        for (index, (batch, result)) in batches.iter().zip(results).enumerate() {
            match result {
                Ok(verdict) => outcome.verdicts.push(verdict),
                Err(error) if error.is_per_batch() => {
                    warn!("Skipping batch {}: {}", batch.batch_id, error);
                    outcome.errors.push(BatchError {
                        index,
                        batch_id: batch.batch_id.clone(),
                        error,
                    });
                }
                Err(error) => return Err(error),
            }
        }

        let flagged = outcome
            .verdicts
            .iter()
            .filter(|v| v.combined_risk_flag)
            .count();
        info!(
            "Scored {} batches ({} flagged, {} rejected)",
            outcome.verdicts.len(),
            flagged,
            outcome.errors.len()
        );
        debug!("Decision policy: {:?}", self.policy);
        Ok(outcome)
    }
}

/// Score `batches` against `version` in one call
pub fn apply(
    version: &ModelVersion,
    batches: &[BatchRecord],
    policy: DecisionPolicy,
) -> RiskResult<InferenceOutcome> {
    InferenceEngine::new(version, policy)?.apply(batches)
}
