//! Configuration module for batchrisk
//!
//! This module handles:
//! - Training hyperparameters (cluster count, thresholds, regularization)
//! - Decision policy used at inference time
//! - Registry location
//! - Declared feature schema with valid ranges

mod risk_config;

pub use risk_config::{
    load_risk_config, DecisionConfig, RegistryConfig, RiskConfig, TrainingConfig, CONFIG_FILE_NAME,
};
