//! Risk history log
//!
//! Appends scored verdicts to a cumulative JSONL file so a reporting layer can
//! chart risk over time. The log is a reporting sink only; verdicts can always
//! be recomputed from the registry and the raw batches.

use crate::engine::RiskVerdict;
use crate::registry::VersionKey;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One line of the history log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedVerdict {
    /// Version that produced the verdict
    pub model_key: VersionKey,
    pub scored_at: DateTime<Utc>,
    #[serde(flatten)]
    pub verdict: RiskVerdict,
}

/// Append-only JSONL log of verdicts
pub struct RiskLog {
    path: PathBuf,
}

impl RiskLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one inference run; returns the number of lines written
    pub fn append(&self, model_key: &VersionKey, verdicts: &[RiskVerdict]) -> Result<usize> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open risk log {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);

        let scored_at = Utc::now();
        for verdict in verdicts {
            let entry = LoggedVerdict {
                model_key: model_key.clone(),
                scored_at,
                verdict: verdict.clone(),
            };
            let line = serde_json::to_string(&entry).context("Failed to serialize verdict")?;
            writeln!(writer, "{line}").context("Failed to write risk log")?;
        }
        writer.flush().context("Failed to flush risk log")?;

        debug!("Appended {} verdicts to {}", verdicts.len(), self.path.display());
        Ok(verdicts.len())
    }

    /// Load every logged verdict; malformed lines are skipped with a warning
    pub fn load_all(&self) -> Result<Vec<LoggedVerdict>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open risk log {}", self.path.display()))?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.context("Failed to read risk log")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LoggedVerdict>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping malformed risk log line {}: {}", lineno + 1, e),
            }
        }
        Ok(entries)
    }

    /// Most recent verdict per batch, ordered by collection time
    pub fn latest_per_batch(&self) -> Result<Vec<LoggedVerdict>> {
        let mut latest: BTreeMap<String, LoggedVerdict> = BTreeMap::new();
        for entry in self.load_all()? {
            match latest.get(&entry.verdict.batch_id) {
                Some(existing) if existing.scored_at > entry.scored_at => {}
                _ => {
                    latest.insert(entry.verdict.batch_id.clone(), entry);
                }
            }
        }
        let mut entries: Vec<LoggedVerdict> = latest.into_values().collect();
        entries.sort_by(|a, b| {
            a.verdict
                .collected_at
                .cmp(&b.verdict.collected_at)
                .then_with(|| a.verdict.batch_id.cmp(&b.verdict.batch_id))
        });
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLabel;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn verdict(id: &str, day: u32, p: f64) -> RiskVerdict {
        RiskVerdict {
            batch_id: id.into(),
            collected_at: Utc.with_ymd_and_hms(2025, 3, day, 0, 0, 0).unwrap(),
            cluster_component_id: 0,
            cluster_risk_label: RiskLabel::Low,
            cluster_fail_fraction: 0.1,
            cluster_log_likelihood: -2.5,
            cluster_low_confidence: false,
            predicted_probability_fail: p,
            probability_flag: p >= 0.5,
            combined_risk_flag: p >= 0.5,
        }
    }

    fn key() -> VersionKey {
        "20250301T000000000Z-abcdef01".parse().unwrap()
    }

    #[test]
    fn test_append_and_load() {
        let tmp = TempDir::new().unwrap();
        let log = RiskLog::new(tmp.path().join("nested").join("risk_log.jsonl"));
        assert!(log.load_all().unwrap().is_empty());

        let verdicts = vec![verdict("B1", 1, 0.2), verdict("B2", 2, 0.8)];
        assert_eq!(log.append(&key(), &verdicts).unwrap(), 2);
        assert_eq!(log.append(&key(), &verdicts[..1]).unwrap(), 1);

        let entries = log.load_all().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].verdict, verdicts[1]);
        assert_eq!(entries[0].model_key, key());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("risk_log.jsonl");
        let log = RiskLog::new(&path);
        log.append(&key(), &[verdict("B1", 1, 0.2)]).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file).unwrap();

        assert_eq!(log.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_latest_per_batch_orders_by_collection() {
        let tmp = TempDir::new().unwrap();
        let log = RiskLog::new(tmp.path().join("risk_log.jsonl"));
        log.append(&key(), &[verdict("B2", 5, 0.3), verdict("B1", 2, 0.4)])
            .unwrap();
        log.append(&key(), &[verdict("B2", 5, 0.9)]).unwrap();

        let latest = log.latest_per_batch().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].verdict.batch_id, "B1");
        assert_eq!(latest[1].verdict.predicted_probability_fail, 0.9);
    }
}
