//! Integration tests for batchrisk
//!
//! These tests drive the public API end to end:
//! - Training on a synthetic history and scoring new batches
//! - Publishing through a registry and loading back
//! - Reproducibility under a fixed seed
//!
//! Each test uses its own temp directory for the registry.

use batchrisk::{
    apply, train, BatchRecord, CombinePolicy, DecisionPolicy, InferenceEngine, ModelRegistry,
    RiskConfig, RiskError, RiskLog, VersionSelector,
};
use chrono::{Duration, TimeZone, Utc};
use indexmap::IndexMap;
use tempfile::TempDir;

fn batch(id: &str, day: i64, component_a: f64, ph: f64) -> BatchRecord {
    let features: IndexMap<String, f64> = [
        ("component_A".to_string(), component_a),
        ("avg_pH".to_string(), ph),
    ]
    .into_iter()
    .collect();
    BatchRecord::new(
        id,
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::days(day),
        features,
    )
}

/// 100 historical batches; pH below 6.8 fails QC
fn history() -> Vec<BatchRecord> {
    (0..100)
        .map(|i| {
            let ph = 6.6 + ((i * 37) % 100) as f64 / 100.0;
            let viability = if ph < 6.8 { 0.82 } else { 0.96 };
            batch(
                &format!("H{:03}", i + 1),
                i as i64,
                1.2 + ((i * 7) % 11) as f64 * 0.01,
                ph,
            )
            .with_outcome(viability, 0.9)
        })
        .collect()
}

#[test]
fn test_low_ph_batch_is_flagged() {
    let config = RiskConfig::default();
    let outcome = train(&history(), &config).unwrap();

    let new = vec![
        batch("NEW-LOW", 200, 1.25, 6.5),
        batch("NEW-OK", 201, 1.25, 7.1),
    ];
    let scored = apply(&outcome.version, &new, config.decision_policy()).unwrap();
    assert!(scored.errors.is_empty());

    let low = &scored.verdicts[0];
    assert_eq!(low.batch_id, "NEW-LOW");
    assert!(low.predicted_probability_fail > 0.5);
    assert!(low.combined_risk_flag);

    let ok = &scored.verdicts[1];
    assert_eq!(ok.batch_id, "NEW-OK");
    assert!(ok.predicted_probability_fail < 0.5);
    assert!(!ok.combined_risk_flag);
}

#[test]
fn test_registry_roundtrip_preserves_verdicts() {
    let tmp = TempDir::new().unwrap();
    let config = RiskConfig::default();
    let registry = ModelRegistry::open(tmp.path()).unwrap();

    let outcome = train(&history(), &config).unwrap();
    let key = registry.save(&outcome.version).unwrap();
    let loaded = registry.load(&VersionSelector::Latest).unwrap();
    assert_eq!(loaded, outcome.version);

    let new: Vec<BatchRecord> = (0..25)
        .map(|i| batch(&format!("N{i}"), 300 + i, 1.21 + i as f64 * 0.003, 6.45 + i as f64 * 0.05))
        .collect();
    let before = apply(&outcome.version, &new, config.decision_policy()).unwrap();
    let after = apply(&loaded, &new, config.decision_policy()).unwrap();
    assert_eq!(before.verdicts, after.verdicts);

    let log = RiskLog::new(tmp.path().join("risk_log.jsonl"));
    log.append(&key, &after.verdicts).unwrap();
    assert_eq!(log.load_all().unwrap().len(), 25);
}

#[test]
fn test_same_seed_gives_identical_verdicts() {
    let config = RiskConfig::default();
    let new: Vec<BatchRecord> = (0..15)
        .map(|i| batch(&format!("D{i}"), i, 1.2 + i as f64 * 0.007, 6.5 + i as f64 * 0.07))
        .collect();

    let runs: Vec<_> = (0..2)
        .map(|_| {
            let tmp = TempDir::new().unwrap();
            let registry = ModelRegistry::open(tmp.path()).unwrap();
            let version = train(&history(), &config).unwrap().version;
            registry.save(&version).unwrap();
            let loaded = registry.load(&VersionSelector::Latest).unwrap();
            apply(&loaded, &new, config.decision_policy()).unwrap().verdicts
        })
        .collect();
    assert_eq!(runs[0], runs[1]);
}

#[test]
fn test_missing_feature_only_rejects_that_batch() {
    let outcome = train(&history(), &RiskConfig::default()).unwrap();
    let engine = InferenceEngine::new(&outcome.version, DecisionPolicy::default()).unwrap();

    let mut broken = batch("BROKEN", 2, 1.25, 7.0);
    broken.features.shift_remove("component_A");
    let batches = vec![batch("A", 1, 1.25, 6.9), broken, batch("C", 3, 1.25, 7.2)];

    let scored = engine.apply(&batches).unwrap();
    assert_eq!(scored.verdicts.len(), 2);
    assert_eq!(scored.errors.len(), 1);
    assert_eq!(scored.errors[0].batch_id, "BROKEN");
    assert!(matches!(scored.errors[0].error, RiskError::SchemaMismatch { .. }));

    let clean = engine.apply(&[batches[0].clone(), batches[2].clone()]).unwrap();
    assert_eq!(clean.verdicts, scored.verdicts);
}

#[test]
fn test_rollback_serves_previous_version() {
    let tmp = TempDir::new().unwrap();
    let registry = ModelRegistry::open(tmp.path()).unwrap();

    let mut config = RiskConfig::default();
    let first = train(&history(), &config).unwrap().version;
    let k1 = registry.save(&first).unwrap();

    config.training.l2_regularization_strength = 1.0;
    config.decision.policy = CombinePolicy::Both;
    let second = train(&history(), &config).unwrap().version;
    let k2 = registry.save(&second).unwrap();
    assert_ne!(first.probability, second.probability);
    assert_eq!(registry.latest_key().unwrap(), Some(k2));

    registry.activate(&k1).unwrap();
    assert_eq!(registry.load(&VersionSelector::Latest).unwrap(), first);
}
