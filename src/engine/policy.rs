//! How the cluster and probability signals combine into one flag

use crate::models::RiskLabel;
use serde::{Deserialize, Serialize};

/// Combination rule for the two risk signals.
///
/// `Either` is the conservative default: one signal alone raises the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinePolicy {
    #[default]
    Either,
    Both,
    ClusterOnly,
    ProbabilityOnly,
}

impl CombinePolicy {
    pub fn combine(self, cluster_high: bool, probability_high: bool) -> bool {
        match self {
            CombinePolicy::Either => cluster_high || probability_high,
            CombinePolicy::Both => cluster_high && probability_high,
            CombinePolicy::ClusterOnly => cluster_high,
            CombinePolicy::ProbabilityOnly => probability_high,
        }
    }
}

/// Thresholds and combination rule applied at inference time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionPolicy {
    pub probability_threshold: f64,
    pub combine: CombinePolicy,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            probability_threshold: 0.5,
            combine: CombinePolicy::Either,
        }
    }
}

impl DecisionPolicy {
    pub fn probability_flag(&self, probability: f64) -> bool {
        probability >= self.probability_threshold
    }

    /// Combined flag for one batch
    pub fn decide(&self, cluster_label: RiskLabel, probability: f64) -> bool {
        self.combine.combine(
            cluster_label == RiskLabel::High,
            self.probability_flag(probability),
        )
    }
}
