//! Feature normalization
//!
//! Per-feature standardization `(x - mean) / scale` with parameters fitted on
//! the training rows. Both the training pipeline and the inference engine go
//! through [`NormalizationParams::transform_row`], so the same raw input maps
//! to the same standardized vector on both sides of the train/apply boundary.

use crate::error::{RiskError, RiskResult};
use crate::models::FeatureSchema;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-feature (mean, scale) pairs, in schema order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub features: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
    /// Features whose sample variance was zero; their scale is 1.0
    #[serde(default)]
    pub zero_variance: Vec<String>,
}

/// Fit mean and sample standard deviation for every schema feature.
///
/// `rows` must already be in schema order (see [`FeatureSchema::validate`]).
/// A constant feature gets scale 1.0 and a warning instead of an error.
pub fn fit(schema: &FeatureSchema, rows: &[Vec<f64>]) -> RiskResult<NormalizationParams> {
    if rows.len() < 2 {
        return Err(RiskError::InsufficientData(format!(
            "normalizer needs at least 2 rows, got {}",
            rows.len()
        )));
    }

    let d = schema.len();
    if let Some(bad) = rows.iter().find(|r| r.len() != d) {
        return Err(RiskError::InsufficientData(format!(
            "row has {} values but the schema declares {} features",
            bad.len(),
            d
        )));
    }

    let n = rows.len() as f64;
    let mut mean = vec![0.0; d];
    for row in rows {
        for (m, &x) in mean.iter_mut().zip(row) {
            *m += x;
        }
    }
    for m in &mut mean {
        *m /= n;
    }

    let mut var = vec![0.0; d];
    for row in rows {
        for ((v, &x), &m) in var.iter_mut().zip(row).zip(&mean) {
            *v += (x - m) * (x - m);
        }
    }

    let mut scale = Vec::with_capacity(d);
    let mut zero_variance = Vec::new();
    for (name, v) in schema.names().zip(var) {
        let sd = (v / (n - 1.0)).sqrt();
        if sd > 0.0 && sd.is_finite() {
            scale.push(sd);
        } else {
            warn!("Feature '{}' has zero variance; using scale 1.0", name);
            zero_variance.push(name.to_string());
            scale.push(1.0);
        }
    }

    Ok(NormalizationParams {
        features: schema.names().map(String::from).collect(),
        mean,
        scale,
        zero_variance,
    })
}

impl NormalizationParams {
    pub fn dimension(&self) -> usize {
        self.features.len()
    }

    /// Standardize a row already in schema order
    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((&x, &m), &s)| (x - m) / s)
            .collect()
    }

    /// Standardize a named feature mapping.
    ///
    /// The mapping must contain exactly the fitted feature names.
    pub fn transform(&self, batch_id: &str, features: &IndexMap<String, f64>) -> RiskResult<Vec<f64>> {
        let exact = features.len() == self.features.len()
            && self.features.iter().all(|name| features.contains_key(name));
        if !exact {
            let missing: Vec<&str> = self
                .features
                .iter()
                .filter(|name| !features.contains_key(*name))
                .map(String::as_str)
                .collect();
            let unexpected: Vec<&str> = features
                .keys()
                .filter(|name| !self.features.contains(name))
                .map(String::as_str)
                .collect();
            return Err(RiskError::SchemaMismatch {
                batch_id: batch_id.to_string(),
                detail: format!(
                    "missing features [{}]; unexpected features [{}]",
                    missing.join(", "),
                    unexpected.join(", ")
                ),
            });
        }

        let row: Vec<f64> = self.features.iter().map(|name| features[name]).collect();
        Ok(self.transform_row(&row))
    }
}
