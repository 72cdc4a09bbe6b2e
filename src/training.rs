//! Training pipeline
//!
//! Turns labeled historical batches into one immutable [`ModelVersion`]:
//! schema resolution → label derivation → stratified holdout split →
//! normalizer → probability model → cluster model → evaluation.
//!
//! Any failure aborts the run; a partially fitted version is never returned.

use crate::cluster::{ClusterRiskModel, ClusterSettings};
use crate::config::RiskConfig;
use crate::error::{RiskError, RiskResult};
use crate::models::{BatchRecord, FeatureSchema, RiskLabel};
use crate::normalize;
use crate::probability::{
    EvaluationReport, EvaluationSplit, ProbabilityRiskModel, ProbabilitySettings,
};
use crate::version::ModelVersion;
use chrono::Utc;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

/// ChaCha stream for the holdout shuffle, distinct from the EM seeding stream
const SPLIT_STREAM: u64 = 1;

/// Result of a successful training run
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub version: ModelVersion,
    pub report: TrainReport,
}

/// Per-component summary for the training report
#[derive(Debug, Clone)]
pub struct ClusterSummary {
    pub component_id: usize,
    pub assigned: usize,
    pub fail_fraction: f64,
    pub risk_label: RiskLabel,
    pub low_confidence: bool,
}

/// Human-readable summary of a training run
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub total_rows: usize,
    pub training_rows: usize,
    pub holdout_rows: usize,
    pub training_fail_count: usize,
    pub zero_variance_features: Vec<String>,
    pub em_converged: bool,
    pub em_iterations: usize,
    pub clusters: Vec<ClusterSummary>,
    pub optimizer_converged: bool,
    pub evaluation: EvaluationReport,
}

impl std::fmt::Display for TrainReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Training Summary:")?;
        writeln!(
            f,
            "  Rows: {} total, {} training, {} holdout",
            self.total_rows, self.training_rows, self.holdout_rows
        )?;
        writeln!(
            f,
            "  Training fails: {} ({:.1}%)",
            self.training_fail_count,
            if self.training_rows > 0 {
                self.training_fail_count as f64 / self.training_rows as f64 * 100.0
            } else {
                0.0
            }
        )?;
        if !self.zero_variance_features.is_empty() {
            writeln!(
                f,
                "  Zero-variance features: {}",
                self.zero_variance_features.join(", ")
            )?;
        }
        writeln!(
            f,
            "  EM: {} after {} iterations",
            if self.em_converged { "converged" } else { "not converged" },
            self.em_iterations
        )?;
        for c in &self.clusters {
            writeln!(
                f,
                "    cluster {}: {} batches, fail fraction {:.2}, {}{}",
                c.component_id,
                c.assigned,
                c.fail_fraction,
                c.risk_label,
                if c.low_confidence { " (low confidence)" } else { "" }
            )?;
        }
        writeln!(
            f,
            "  Logistic regression: {}",
            if self.optimizer_converged { "converged" } else { "not converged" }
        )?;
        let e = &self.evaluation;
        writeln!(
            f,
            "  Evaluation ({:?}, {} rows): AUC {}, accuracy {:.3} @ {:.2}, Brier {:.4}",
            e.split,
            e.rows,
            e.auc.map_or("n/a".to_string(), |a| format!("{a:.3}")),
            e.accuracy,
            e.probability_threshold,
            e.brier_score
        )?;
        Ok(())
    }
}

/// Fit all risk models on historical batches
pub fn train(batches: &[BatchRecord], config: &RiskConfig) -> RiskResult<TrainOutcome> {
    config.validate()?;
    let training = &config.training;

    if batches.len() < 2 {
        return Err(RiskError::InsufficientData(format!(
            "training needs at least 2 batches, got {}",
            batches.len()
        )));
    }

    let schema = match config.declared_schema()? {
        Some(schema) => schema,
        None => FeatureSchema::infer(&batches[0])?,
    };

    let mut rows = Vec::with_capacity(batches.len());
    let mut labels = Vec::with_capacity(batches.len());
    for batch in batches {
        rows.push(schema.validate(&batch.batch_id, &batch.features)?);
        let label = batch
            .resolve_label(training.viability_threshold)
            .ok_or_else(|| {
                RiskError::InsufficientData(format!(
                    "batch {} has neither outcome_viability nor label_fail",
                    batch.batch_id
                ))
            })?;
        labels.push(label);
    }

    info!(
        "Training on {} batches with {} features ({} failed QC)",
        batches.len(),
        schema.len(),
        labels.iter().filter(|&&l| l).count()
    );

    let (train_idx, holdout_idx) =
        stratified_split(&labels, training.holdout_fraction, training.random_seed);
    let train_rows: Vec<Vec<f64>> = train_idx.iter().map(|&i| rows[i].clone()).collect();
    let train_labels: Vec<bool> = train_idx.iter().map(|&i| labels[i]).collect();

    let normalization = normalize::fit(&schema, &train_rows)?;
    let z_train: Vec<Vec<f64>> = train_rows
        .iter()
        .map(|r| normalization.transform_row(r))
        .collect();

    // Probability model first: a single-class history fails fast here
    let mut probability_model = ProbabilityRiskModel::new(ProbabilitySettings::from(training));
    let probability = probability_model.fit(&z_train, &train_labels)?.clone();

    let mut cluster_model = ClusterRiskModel::new(ClusterSettings::from(training));
    let cluster = cluster_model.fit(&z_train, &train_labels)?.clone();

    let evaluation = evaluate(
        &probability_model,
        &normalization,
        &rows,
        &labels,
        &train_idx,
        &holdout_idx,
        config.decision.probability_threshold,
    )?;

    let report = TrainReport {
        total_rows: batches.len(),
        training_rows: train_idx.len(),
        holdout_rows: holdout_idx.len(),
        training_fail_count: train_labels.iter().filter(|&&l| l).count(),
        zero_variance_features: normalization.zero_variance.clone(),
        em_converged: cluster.converged,
        em_iterations: cluster.iterations,
        clusters: cluster
            .components
            .iter()
            .enumerate()
            .map(|(k, c)| ClusterSummary {
                component_id: k,
                assigned: c.assigned_count,
                fail_fraction: c.fail_fraction,
                risk_label: c.risk_label,
                low_confidence: c.low_confidence,
            })
            .collect(),
        optimizer_converged: probability.converged,
        evaluation: evaluation.clone(),
    };

    let version = ModelVersion {
        schema,
        normalization,
        cluster,
        probability,
        fit_timestamp: Utc::now(),
        training_row_count: train_idx.len(),
        evaluation: Some(evaluation),
    };
    version.check_consistency()?;

    info!("Training complete: {} training rows", version.training_row_count);
    Ok(TrainOutcome { version, report })
}

/// Split row indices into (training, holdout), stratified by label.
///
/// Each class contributes `floor(count * fraction)` rows to the holdout but
/// always keeps at least one row in training. Both index lists are returned
/// in ascending order.
fn stratified_split(labels: &[bool], fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    if fraction <= 0.0 {
        return ((0..labels.len()).collect(), Vec::new());
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(SPLIT_STREAM);

    let mut train = Vec::new();
    let mut holdout = Vec::new();
    for class in [true, false] {
        let mut idx: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        idx.shuffle(&mut rng);
        let take = ((idx.len() as f64 * fraction).floor() as usize).min(idx.len().saturating_sub(1));
        holdout.extend_from_slice(&idx[..take]);
        train.extend_from_slice(&idx[take..]);
    }

    if train.len() < 2 {
        return ((0..labels.len()).collect(), Vec::new());
    }

    train.sort_unstable();
    holdout.sort_unstable();
    (train, holdout)
}

fn evaluate(
    model: &ProbabilityRiskModel,
    normalization: &normalize::NormalizationParams,
    rows: &[Vec<f64>],
    labels: &[bool],
    train_idx: &[usize],
    holdout_idx: &[usize],
    threshold: f64,
) -> RiskResult<EvaluationReport> {
    let has_both = |idx: &[usize]| {
        let fails = idx.iter().filter(|&&i| labels[i]).count();
        fails > 0 && fails < idx.len()
    };

    let (split, idx) = if has_both(holdout_idx) {
        (EvaluationSplit::Holdout, holdout_idx)
    } else {
        if !holdout_idx.is_empty() {
            warn!("Holdout split holds a single class; evaluating on training rows");
        }
        (EvaluationSplit::Training, train_idx)
    };

    let mut probabilities = Vec::with_capacity(idx.len());
    for &i in idx {
        probabilities.push(model.score(&normalization.transform_row(&rows[i]))?);
    }
    let eval_labels: Vec<bool> = idx.iter().map(|&i| labels[i]).collect();

    let report = EvaluationReport::compute(split, &probabilities, &eval_labels, threshold);
    info!(
        "Logistic model ({:?}) - AUC: {}, Accuracy: {:.3}",
        report.split,
        report.auc.map_or("n/a".to_string(), |a| format!("{a:.3}")),
        report.accuracy
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{batch, history};

    #[test]
    fn test_stratified_split_keeps_both_classes() {
        let labels: Vec<bool> = (0..50).map(|i| i % 5 == 0).collect();
        let (train, holdout) = stratified_split(&labels, 0.2, 9);
        assert_eq!(train.len() + holdout.len(), 50);
        assert_eq!(holdout.len(), 10);
        assert_eq!(holdout.iter().filter(|&&i| labels[i]).count(), 2);
        assert!(train.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(stratified_split(&labels, 0.2, 9), (train, holdout));
    }

    #[test]
    fn test_split_disabled_with_zero_fraction() {
        let labels = vec![true, false, true];
        let (train, holdout) = stratified_split(&labels, 0.0, 1);
        assert_eq!(train, vec![0, 1, 2]);
        assert!(holdout.is_empty());
    }

    #[test]
    fn test_train_produces_consistent_version() {
        let outcome = train(&history(60), &RiskConfig::default()).unwrap();
        let v = &outcome.version;
        assert_eq!(v.schema.len(), 2);
        assert_eq!(v.cluster.components.len(), 2);
        assert_eq!(v.probability.coefficients.len(), 2);
        assert_eq!(v.training_row_count, outcome.report.training_rows);
        assert_eq!(outcome.report.training_rows + outcome.report.holdout_rows, 60);
        assert!(v.check_consistency().is_ok());
        let eval = v.evaluation.as_ref().unwrap();
        assert_eq!(eval.split, EvaluationSplit::Holdout);
        assert!(eval.auc.unwrap() > 0.9);
        assert!(outcome.report.to_string().contains("Training Summary"));
    }

    #[test]
    fn test_single_class_history_is_rejected() {
        let batches: Vec<BatchRecord> = (0..20)
            .map(|i| batch(&format!("B{i}"), i, 1.2, 7.0).with_outcome(0.95, 0.9))
            .collect();
        let err = train(&batches, &RiskConfig::default()).unwrap_err();
        assert!(matches!(err, RiskError::LabelImbalance { .. }));
    }

    #[test]
    fn test_unlabeled_batch_aborts_training() {
        let mut batches = history(10);
        batches[3].outcome_viability = None;
        batches[3].label_fail = None;
        let err = train(&batches, &RiskConfig::default()).unwrap_err();
        assert!(matches!(err, RiskError::InsufficientData(msg) if msg.contains("B004")));
    }

    #[test]
    fn test_schema_mismatch_aborts_training() {
        let mut batches = history(10);
        batches[5].features.shift_remove("avg_pH");
        let err = train(&batches, &RiskConfig::default()).unwrap_err();
        assert!(matches!(err, RiskError::SchemaMismatch { batch_id, .. } if batch_id == "B006"));
    }

    #[test]
    fn test_constant_feature_trains() {
        let mut batches = history(40);
        for b in &mut batches {
            b.features.insert("component_A".into(), 1.25);
        }
        let outcome = train(&batches, &RiskConfig::default()).unwrap();
        assert_eq!(
            outcome.version.normalization.zero_variance,
            vec!["component_A".to_string()]
        );
        assert_eq!(outcome.version.normalization.scale[0], 1.0);
    }
}
