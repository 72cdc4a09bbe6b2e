//! Core data models for batch risk scoring
//!
//! A [`BatchRecord`] is one manufacturing batch as handed over by the loader:
//! its inline process parameters and, for historical batches, the QC outcome.
//! A [`FeatureSchema`] fixes which parameters a model version consumes and in
//! which order.

use crate::error::{RiskError, RiskResult};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One manufacturing batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub collected_at: DateTime<Utc>,
    /// Feature name -> value, in the loader's column order
    pub features: IndexMap<String, f64>,
    /// QC viability result, only known for historical batches
    #[serde(default)]
    pub outcome_viability: Option<f64>,
    /// `outcome_viability < viability_threshold`
    #[serde(default)]
    pub label_fail: Option<bool>,
}

impl BatchRecord {
    /// A batch without a QC outcome (inference input)
    pub fn new(
        batch_id: impl Into<String>,
        collected_at: DateTime<Utc>,
        features: IndexMap<String, f64>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            collected_at,
            features,
            outcome_viability: None,
            label_fail: None,
        }
    }

    /// Attach a QC outcome and derive the fail label from it
    pub fn with_outcome(mut self, viability: f64, viability_threshold: f64) -> Self {
        self.outcome_viability = Some(viability);
        self.label_fail = Some(viability < viability_threshold);
        self
    }

    /// Resolve the fail label for training.
    ///
    /// Viability is the source of truth when present; an explicit `label_fail`
    /// is only used for records that carry no viability value.
    pub fn resolve_label(&self, viability_threshold: f64) -> Option<bool> {
        match self.outcome_viability {
            Some(v) => Some(v < viability_threshold),
            None => self.label_fail,
        }
    }
}

/// One declared feature and its valid range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl FeatureSpec {
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min: None,
            max: None,
        }
    }

    fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |lo| value >= lo) && self.max.map_or(true, |hi| value <= hi)
    }
}

/// Ordered feature set bound to a model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    features: Vec<FeatureSpec>,
}

impl FeatureSchema {
    /// Build a schema, rejecting empty or duplicated feature lists
    pub fn new(features: Vec<FeatureSpec>) -> RiskResult<Self> {
        if features.is_empty() {
            return Err(RiskError::InvalidConfig(
                "feature schema must declare at least one feature".into(),
            ));
        }
        for (i, spec) in features.iter().enumerate() {
            if features[..i].iter().any(|other| other.name == spec.name) {
                return Err(RiskError::InvalidConfig(format!(
                    "feature '{}' is declared more than once",
                    spec.name
                )));
            }
            if let (Some(lo), Some(hi)) = (spec.min, spec.max) {
                if lo > hi {
                    return Err(RiskError::InvalidConfig(format!(
                        "feature '{}' has min {} greater than max {}",
                        spec.name, lo, hi
                    )));
                }
            }
        }
        Ok(Self { features })
    }

    /// Infer an unbounded schema from a record's feature order
    pub fn infer(record: &BatchRecord) -> RiskResult<Self> {
        Self::new(
            record
                .features
                .keys()
                .map(|name| FeatureSpec::unbounded(name.clone()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn specs(&self) -> &[FeatureSpec] {
        &self.features
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.name.as_str())
    }

    /// Check a batch's features against the schema and return them in schema order.
    ///
    /// Missing names, unexpected names, non-finite values and values outside a
    /// declared range are all contract violations.
    pub fn validate(&self, batch_id: &str, features: &IndexMap<String, f64>) -> RiskResult<Vec<f64>> {
        let mut problems = Vec::new();

        let missing: Vec<&str> = self
            .names()
            .filter(|name| !features.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            problems.push(format!("missing features [{}]", missing.join(", ")));
        }

        let unexpected: Vec<&str> = features
            .keys()
            .map(String::as_str)
            .filter(|name| !self.features.iter().any(|f| f.name == *name))
            .collect();
        if !unexpected.is_empty() {
            problems.push(format!("unexpected features [{}]", unexpected.join(", ")));
        }

        let mut row = Vec::with_capacity(self.features.len());
        for spec in &self.features {
            let Some(&value) = features.get(&spec.name) else {
                continue;
            };
            if !value.is_finite() {
                problems.push(format!("feature '{}' is not finite ({})", spec.name, value));
            } else if !spec.contains(value) {
                problems.push(format!(
                    "feature '{}' = {} outside [{}, {}]",
                    spec.name,
                    value,
                    spec.min.map_or("-inf".to_string(), |v| v.to_string()),
                    spec.max.map_or("inf".to_string(), |v| v.to_string()),
                ));
            }
            row.push(value);
        }

        if problems.is_empty() {
            Ok(row)
        } else {
            Err(RiskError::SchemaMismatch {
                batch_id: batch_id.to_string(),
                detail: problems.join("; "),
            })
        }
    }
}

/// Risk label attached to a mixture component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLabel {
    High,
    Low,
}

impl std::fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLabel::High => write!(f, "high-risk"),
            RiskLabel::Low => write!(f, "low-risk"),
        }
    }
}
