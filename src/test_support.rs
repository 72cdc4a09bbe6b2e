//! Synthetic batch histories shared by unit tests

use crate::config::RiskConfig;
use crate::models::BatchRecord;
use crate::training::train;
use crate::version::ModelVersion;
use chrono::{Duration, TimeZone, Utc};
use indexmap::IndexMap;

pub(crate) fn batch(id: &str, day: i64, component_a: f64, ph: f64) -> BatchRecord {
    let features: IndexMap<String, f64> = [
        ("component_A".to_string(), component_a),
        ("avg_pH".to_string(), ph),
    ]
    .into_iter()
    .collect();
    BatchRecord::new(
        id,
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::days(day),
        features,
    )
}

/// `n` batches with pH spread over [6.6, 7.6); pH below 6.8 fails QC
pub(crate) fn history(n: usize) -> Vec<BatchRecord> {
    (0..n)
        .map(|i| {
            let ph = 6.6 + ((i * 37) % n) as f64 / n as f64;
            let viability = if ph < 6.8 { 0.85 } else { 0.95 };
            batch(
                &format!("B{:03}", i + 1),
                i as i64,
                1.2 + ((i * 7) % 11) as f64 * 0.01,
                ph,
            )
            .with_outcome(viability, 0.9)
        })
        .collect()
}

pub(crate) fn trained_version() -> ModelVersion {
    train(&history(60), &RiskConfig::default()).unwrap().version
}
