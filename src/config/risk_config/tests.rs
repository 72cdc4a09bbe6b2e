use super::*;
use std::sync::{Mutex, MutexGuard};
use tempfile::TempDir;

// Tests that read BATCHRISK_* variables must not interleave with the one that sets them
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[test]
fn test_defaults_are_valid() {
    let config = RiskConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.training.cluster_count, 2);
    assert!((config.training.viability_threshold - 0.90).abs() < f64::EPSILON);
    assert!((config.decision.probability_threshold - 0.5).abs() < f64::EPSILON);
    assert_eq!(config.decision.policy, CombinePolicy::Either);
}

#[test]
fn test_parse_full_document() {
    let toml = r#"
[training]
cluster_count = 3
cluster_risk_threshold = 0.4
viability_threshold = 0.85
l2_regularization_strength = 0.1
random_seed = 42

[decision]
probability_threshold = 0.75
policy = "both"

[registry]
path = "/tmp/batchrisk-registry"

[[features]]
name = "component_A"

[[features]]
name = "avg_pH"
min = 0.0
max = 14.0
"#;
    let config = RiskConfig::from_toml_str(toml).unwrap();
    assert_eq!(config.training.cluster_count, 3);
    assert_eq!(config.training.random_seed, 42);
    // Unspecified keys keep their defaults
    assert_eq!(config.training.em_max_iterations, 100);
    assert_eq!(config.decision.policy, CombinePolicy::Both);
    assert_eq!(
        config.registry.resolve_path(),
        PathBuf::from("/tmp/batchrisk-registry")
    );

    let schema = config.declared_schema().unwrap().unwrap();
    let names: Vec<&str> = schema.names().collect();
    assert_eq!(names, vec!["component_A", "avg_pH"]);
    assert_eq!(schema.specs()[1].max, Some(14.0));
}

#[test]
fn test_rejects_out_of_range_thresholds() {
    let err = RiskConfig::from_toml_str("[decision]\nprobability_threshold = 1.5\n").unwrap_err();
    assert!(matches!(err, RiskError::InvalidConfig(_)));

    let err = RiskConfig::from_toml_str("[training]\ncluster_count = 0\n").unwrap_err();
    assert!(err.to_string().contains("cluster_count"));

    let err = RiskConfig::from_toml_str("[training]\nholdout_fraction = 1.0\n").unwrap_err();
    assert!(err.to_string().contains("holdout_fraction"));
}

#[test]
fn test_rejects_unknown_policy() {
    let err = RiskConfig::from_toml_str("[decision]\npolicy = \"majority\"\n").unwrap_err();
    assert!(matches!(err, RiskError::InvalidConfig(_)));
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let _env = env_lock();
    let dir = TempDir::new().unwrap();
    let config = load_risk_config(dir.path()).unwrap();
    assert_eq!(config.training.cluster_count, 2);
}

#[test]
fn test_load_broken_file_is_an_error() {
    let _env = env_lock();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[training\ncluster_count = ").unwrap();
    assert!(load_risk_config(dir.path()).is_err());
}

#[test]
fn test_env_overrides_registry_dir_and_seed() {
    let _env = env_lock();
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "[training]\nrandom_seed = 7\n\n[registry]\npath = \"/from/file\"\n",
    )
    .unwrap();
    let registry_dir = dir.path().join("env-registry");

    std::env::set_var("BATCHRISK_REGISTRY_DIR", &registry_dir);
    std::env::set_var("BATCHRISK_SEED", " 42 ");
    let loaded = load_risk_config(dir.path());

    std::env::set_var("BATCHRISK_SEED", "abc");
    let bad_seed = load_risk_config(dir.path());

    std::env::set_var("BATCHRISK_REGISTRY_DIR", "");
    std::env::remove_var("BATCHRISK_SEED");
    let unset = load_risk_config(dir.path());
    std::env::remove_var("BATCHRISK_REGISTRY_DIR");

    let config = loaded.unwrap();
    assert_eq!(config.training.random_seed, 42);
    assert_eq!(config.registry.resolve_path(), registry_dir);

    let err = bad_seed.unwrap_err();
    assert!(matches!(err, RiskError::InvalidConfig(_)));
    assert!(err.to_string().contains("BATCHRISK_SEED"));

    // An empty directory override is ignored, so the file value stands
    let config = unset.unwrap();
    assert_eq!(config.training.random_seed, 7);
    assert_eq!(config.registry.resolve_path(), PathBuf::from("/from/file"));
}
