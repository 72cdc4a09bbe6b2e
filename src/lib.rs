//! Batch risk scoring
//!
//! Trains two risk models on historical manufacturing batches, a Gaussian
//! mixture over standardized process parameters and an L2-regularized
//! logistic regression, publishes them as one immutable [`ModelVersion`],
//! and scores new batches against a published version.
//!
//! ```no_run
//! use batchrisk::{load_risk_config, train, ModelRegistry, VersionSelector, InferenceEngine};
//! # fn run(history: Vec<batchrisk::BatchRecord>, new: Vec<batchrisk::BatchRecord>) -> batchrisk::RiskResult<()> {
//! let config = load_risk_config(std::path::Path::new("."))?;
//! let registry = ModelRegistry::open(config.registry.resolve_path())?;
//!
//! let outcome = train(&history, &config)?;
//! registry.save(&outcome.version)?;
//!
//! let version = registry.load(&VersionSelector::Latest)?;
//! let engine = InferenceEngine::new(&version, config.decision_policy())?;
//! let scored = engine.apply(&new)?;
//! println!("{}", scored.summary());
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod probability;
pub mod registry;
pub mod training;
pub mod version;

#[cfg(test)]
mod test_support;

pub use config::{load_risk_config, RiskConfig};
pub use engine::{
    apply, BatchError, CombinePolicy, DecisionPolicy, InferenceEngine, InferenceOutcome,
    RiskVerdict, VerdictSummary,
};
pub use error::{RiskError, RiskResult};
pub use history::RiskLog;
pub use models::{BatchRecord, FeatureSchema, FeatureSpec, RiskLabel};
pub use registry::{ModelRegistry, VersionKey, VersionSelector};
pub use training::{train, TrainOutcome, TrainReport};
pub use version::ModelVersion;
