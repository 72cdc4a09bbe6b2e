//! Risk model configuration support
//!
//! Loads configuration from `batchrisk.toml` in a working directory, then
//! applies environment overrides.
//!
//! # Configuration Format
//!
//! ```toml
//! # batchrisk.toml
//!
//! [training]
//! cluster_count = 2
//! cluster_risk_threshold = 0.5
//! viability_threshold = 0.90
//! l2_regularization_strength = 0.01
//! random_seed = 0
//!
//! [decision]
//! probability_threshold = 0.5
//! policy = "either"
//!
//! [registry]
//! path = "/var/lib/batchrisk/registry"
//!
//! [[features]]
//! name = "component_A"
//!
//! [[features]]
//! name = "avg_pH"
//! min = 0.0
//! max = 14.0
//! ```

use crate::engine::{CombinePolicy, DecisionPolicy};
use crate::error::{RiskError, RiskResult};
use crate::models::{FeatureSchema, FeatureSpec};
use crate::registry::default_registry_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name looked up by [`load_risk_config`]
pub const CONFIG_FILE_NAME: &str = "batchrisk.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub training: TrainingConfig,

    #[serde(default)]
    pub decision: DecisionConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    /// Declared features; inferred from the training data when empty
    #[serde(default)]
    pub features: Vec<FeatureSpec>,
}

/// Hyperparameters for a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of mixture components K (default: 2)
    #[serde(default = "default_cluster_count")]
    pub cluster_count: usize,

    /// Fail fraction at or above which a component is high-risk (default: 0.5)
    #[serde(default = "default_cluster_risk_threshold")]
    pub cluster_risk_threshold: f64,

    /// Viability below this value labels a historical batch as failed (default: 0.90)
    #[serde(default = "default_viability_threshold")]
    pub viability_threshold: f64,

    /// L2 penalty on the logistic coefficients (default: 0.01)
    #[serde(default = "default_l2_strength")]
    pub l2_regularization_strength: f64,

    /// EM stops once the mean log-likelihood moves less than this (default: 1e-3)
    #[serde(default = "default_em_tolerance")]
    pub em_convergence_tolerance: f64,

    #[serde(default = "default_em_max_iterations")]
    pub em_max_iterations: usize,

    /// Seed for component seeding and the holdout shuffle
    #[serde(default)]
    pub random_seed: u64,

    /// Fraction of rows held out for evaluation (default: 0.2)
    #[serde(default = "default_holdout_fraction")]
    pub holdout_fraction: f64,

    /// Added to every covariance diagonal (default: 1e-6)
    #[serde(default = "default_covariance_regularization")]
    pub covariance_regularization: f64,

    #[serde(default = "default_optimizer_max_iterations")]
    pub optimizer_max_iterations: usize,

    /// Max-norm of the gradient at which the optimizer stops (default: 1e-8)
    #[serde(default = "default_optimizer_tolerance")]
    pub optimizer_tolerance: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            cluster_count: default_cluster_count(),
            cluster_risk_threshold: default_cluster_risk_threshold(),
            viability_threshold: default_viability_threshold(),
            l2_regularization_strength: default_l2_strength(),
            em_convergence_tolerance: default_em_tolerance(),
            em_max_iterations: default_em_max_iterations(),
            random_seed: 0,
            holdout_fraction: default_holdout_fraction(),
            covariance_regularization: default_covariance_regularization(),
            optimizer_max_iterations: default_optimizer_max_iterations(),
            optimizer_tolerance: default_optimizer_tolerance(),
        }
    }
}

fn default_cluster_count() -> usize {
    2
}
fn default_cluster_risk_threshold() -> f64 {
    0.5
}
fn default_viability_threshold() -> f64 {
    0.90
}
fn default_l2_strength() -> f64 {
    0.01
}
fn default_em_tolerance() -> f64 {
    1e-3
}
fn default_em_max_iterations() -> usize {
    100
}
fn default_holdout_fraction() -> f64 {
    0.2
}
fn default_covariance_regularization() -> f64 {
    1e-6
}
fn default_optimizer_max_iterations() -> usize {
    100
}
fn default_optimizer_tolerance() -> f64 {
    1e-8
}

/// Inference-time decision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Probability at or above which the supervised signal raises the flag (default: 0.5)
    #[serde(default = "default_probability_threshold")]
    pub probability_threshold: f64,

    /// How the cluster and probability signals combine (default: either)
    #[serde(default)]
    pub policy: CombinePolicy,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            probability_threshold: default_probability_threshold(),
            policy: CombinePolicy::default(),
        }
    }
}

fn default_probability_threshold() -> f64 {
    0.5
}

/// Where model versions are stored
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry root; defaults to the platform data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl RegistryConfig {
    pub fn resolve_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_registry_dir)
    }
}

impl RiskConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(content: &str) -> RiskResult<Self> {
        let config: RiskConfig = toml::from_str(content)
            .map_err(|e| RiskError::InvalidConfig(format!("failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate it
    pub fn from_file(path: &Path) -> RiskResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Decision policy for the inference engine
    pub fn decision_policy(&self) -> DecisionPolicy {
        DecisionPolicy {
            probability_threshold: self.decision.probability_threshold,
            combine: self.decision.policy,
        }
    }

    /// Declared schema, if any features are configured
    pub fn declared_schema(&self) -> RiskResult<Option<FeatureSchema>> {
        if self.features.is_empty() {
            return Ok(None);
        }
        FeatureSchema::new(self.features.clone()).map(Some)
    }

    /// Apply `BATCHRISK_REGISTRY_DIR` and `BATCHRISK_SEED` overrides
    pub fn apply_env_overrides(&mut self) -> RiskResult<()> {
        if let Ok(dir) = std::env::var("BATCHRISK_REGISTRY_DIR") {
            if !dir.is_empty() {
                self.registry.path = Some(PathBuf::from(dir));
            }
        }
        if let Ok(seed) = std::env::var("BATCHRISK_SEED") {
            self.training.random_seed = seed.trim().parse().map_err(|_| {
                RiskError::InvalidConfig(format!("BATCHRISK_SEED is not an unsigned integer: {seed}"))
            })?;
        }
        Ok(())
    }

    /// Reject values that would make a fit or a decision undefined
    pub fn validate(&self) -> RiskResult<()> {
        let t = &self.training;
        if t.cluster_count == 0 {
            return Err(invalid("training.cluster_count must be at least 1"));
        }
        if !in_unit_interval(t.cluster_risk_threshold) {
            return Err(invalid("training.cluster_risk_threshold must be within [0, 1]"));
        }
        if !t.viability_threshold.is_finite() {
            return Err(invalid("training.viability_threshold must be finite"));
        }
        if !(t.l2_regularization_strength.is_finite() && t.l2_regularization_strength >= 0.0) {
            return Err(invalid("training.l2_regularization_strength must be >= 0"));
        }
        if !(t.em_convergence_tolerance.is_finite() && t.em_convergence_tolerance > 0.0) {
            return Err(invalid("training.em_convergence_tolerance must be > 0"));
        }
        if t.em_max_iterations == 0 {
            return Err(invalid("training.em_max_iterations must be at least 1"));
        }
        if !(t.holdout_fraction.is_finite() && (0.0..1.0).contains(&t.holdout_fraction)) {
            return Err(invalid("training.holdout_fraction must be within [0, 1)"));
        }
        if !(t.covariance_regularization.is_finite() && t.covariance_regularization > 0.0) {
            return Err(invalid("training.covariance_regularization must be > 0"));
        }
        if t.optimizer_max_iterations == 0 {
            return Err(invalid("training.optimizer_max_iterations must be at least 1"));
        }
        if !(t.optimizer_tolerance.is_finite() && t.optimizer_tolerance > 0.0) {
            return Err(invalid("training.optimizer_tolerance must be > 0"));
        }
        if !in_unit_interval(self.decision.probability_threshold) {
            return Err(invalid("decision.probability_threshold must be within [0, 1]"));
        }
        self.declared_schema()?;
        Ok(())
    }
}

fn in_unit_interval(v: f64) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

fn invalid(msg: &str) -> RiskError {
    RiskError::InvalidConfig(msg.to_string())
}

/// Load `batchrisk.toml` from `dir`, falling back to defaults when absent.
///
/// A file that exists but fails to parse or validate is an error, not a
/// silent fallback. Environment overrides are applied last.
pub fn load_risk_config(dir: &Path) -> RiskResult<RiskConfig> {
    let path = dir.join(CONFIG_FILE_NAME);
    let mut config = if path.exists() {
        let config = RiskConfig::from_file(&path)?;
        debug!("Loaded risk config from {}", path.display());
        config
    } else {
        debug!("No {} in {}, using defaults", CONFIG_FILE_NAME, dir.display());
        RiskConfig::default()
    };

    config.apply_env_overrides()?;
    if let Err(e) = config.validate() {
        warn!("Risk config invalid after environment overrides: {}", e);
        return Err(e);
    }
    Ok(config)
}

#[cfg(test)]
mod tests;
