//! Immutable model versions
//!
//! A [`ModelVersion`] bundles everything a training run produced. It is
//! created once, published through the registry, and only ever read after
//! that; retraining yields a new version.

use crate::cluster::{ClusterModelState, ClusterRiskModel};
use crate::error::{RiskError, RiskResult};
use crate::models::FeatureSchema;
use crate::normalize::NormalizationParams;
use crate::probability::{EvaluationReport, ProbabilityModelState, ProbabilityRiskModel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub schema: FeatureSchema,
    pub normalization: NormalizationParams,
    pub cluster: ClusterModelState,
    pub probability: ProbabilityModelState,
    pub fit_timestamp: DateTime<Utc>,
    pub training_row_count: usize,
    /// Audit metrics from the training run; not used for scoring
    #[serde(default)]
    pub evaluation: Option<EvaluationReport>,
}

impl ModelVersion {
    /// Check that every part agrees on the feature dimension
    pub fn check_consistency(&self) -> RiskResult<()> {
        let d = self.schema.len();
        let names_match = self
            .schema
            .names()
            .eq(self.normalization.features.iter().map(String::as_str));
        if !names_match || self.normalization.mean.len() != d || self.normalization.scale.len() != d
        {
            return Err(RiskError::NumericalFailure(
                "normalization parameters do not match the feature schema".into(),
            ));
        }
        if self.cluster.components.iter().any(|c| c.mean.len() != d) {
            return Err(RiskError::NumericalFailure(
                "cluster components do not match the feature schema".into(),
            ));
        }
        if self.probability.coefficients.len() != d {
            return Err(RiskError::NumericalFailure(
                "probability coefficients do not match the feature schema".into(),
            ));
        }
        Ok(())
    }

    /// Rebuild scoring-ready models from the stored state
    pub fn restore_models(&self) -> RiskResult<(ClusterRiskModel, ProbabilityRiskModel)> {
        self.check_consistency()?;
        Ok((
            ClusterRiskModel::from_state(self.cluster.clone())?,
            ProbabilityRiskModel::from_state(self.probability.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::trained_version;

    #[test]
    fn test_json_roundtrip_is_exact() {
        let version = trained_version();
        let json = serde_json::to_string(&version).unwrap();
        let back: ModelVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, version);
    }

    #[test]
    fn test_dimension_disagreement_is_detected() {
        let mut version = trained_version();
        assert!(version.check_consistency().is_ok());
        version.probability.coefficients.push(0.0);
        assert!(matches!(
            version.restore_models(),
            Err(RiskError::NumericalFailure(_))
        ));
    }
}
