//! Evaluation metrics for the probability model
//!
//! Reporting only: nothing in scoring depends on these values.

use serde::{Deserialize, Serialize};

/// Which rows an evaluation was computed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationSplit {
    Holdout,
    /// Used when the holdout is empty or holds a single class
    Training,
}

/// Audit metrics stored alongside a model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub split: EvaluationSplit,
    pub rows: usize,
    /// `None` when the evaluated rows contain a single class
    pub auc: Option<f64>,
    pub accuracy: f64,
    pub brier_score: f64,
    pub probability_threshold: f64,
}

impl EvaluationReport {
    pub fn compute(
        split: EvaluationSplit,
        probabilities: &[f64],
        labels: &[bool],
        probability_threshold: f64,
    ) -> Self {
        Self {
            split,
            rows: labels.len(),
            auc: roc_auc(probabilities, labels),
            accuracy: accuracy(probabilities, labels, probability_threshold),
            brier_score: brier_score(probabilities, labels),
            probability_threshold,
        }
    }
}

/// Area under the ROC curve with `true` as the positive class.
///
/// Computed from the Mann-Whitney rank statistic with tied scores sharing
/// their average rank.
pub fn roc_auc(scores: &[f64], labels: &[bool]) -> Option<f64> {
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; i..=j share the average rank
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] {
                rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Share of rows where `score >= threshold` agrees with the label
pub fn accuracy(scores: &[f64], labels: &[bool], threshold: f64) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = scores
        .iter()
        .zip(labels)
        .filter(|(&s, &l)| (s >= threshold) == l)
        .count();
    correct as f64 / labels.len() as f64
}

/// Mean squared error between probabilities and 0/1 outcomes
pub fn brier_score(scores: &[f64], labels: &[bool]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let total: f64 = scores
        .iter()
        .zip(labels)
        .map(|(&s, &l)| {
            let y = if l { 1.0 } else { 0.0 };
            (s - y) * (s - y)
        })
        .sum();
    total / labels.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auc_perfect_and_inverted() {
        let labels = [false, false, true, true];
        assert_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &labels), Some(1.0));
        assert_eq!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &labels), Some(0.0));
    }

    #[test]
    fn test_auc_with_ties() {
        // One positive tied with one negative contributes one half
        let auc = roc_auc(&[0.1, 0.5, 0.5, 0.9], &[false, false, true, true]).unwrap();
        assert!((auc - 0.875).abs() < 1e-12);
        assert_eq!(roc_auc(&[0.5; 4], &[false, true, false, true]), Some(0.5));
    }

    #[test]
    fn test_auc_undefined_for_single_class() {
        assert_eq!(roc_auc(&[0.1, 0.2], &[true, true]), None);
    }

    #[test]
    fn test_accuracy_and_brier() {
        let scores = [0.2, 0.6, 0.5, 0.9];
        let labels = [false, false, true, true];
        assert!((accuracy(&scores, &labels, 0.5) - 0.75).abs() < 1e-12);
        let brier = brier_score(&scores, &labels);
        let expected = (0.04 + 0.36 + 0.25 + 0.01) / 4.0;
        assert!((brier - expected).abs() < 1e-12);
    }
}
