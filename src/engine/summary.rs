use super::RiskVerdict;
use std::collections::BTreeMap;

/// Aggregate counts over one inference run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerdictSummary {
    pub total: usize,
    pub cluster_flagged: usize,
    pub probability_flagged: usize,
    pub combined_flagged: usize,
    /// Flagged by exactly one of the two signals
    pub disagreements: usize,
    /// Batches whose cluster label came from a fallback component
    pub low_confidence: usize,
    pub by_component: BTreeMap<usize, ComponentStats>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentStats {
    pub total: usize,
    pub combined_flagged: usize,
}

impl VerdictSummary {
    pub fn from_verdicts(verdicts: &[RiskVerdict]) -> Self {
        let mut summary = Self {
            total: verdicts.len(),
            ..Self::default()
        };

        for v in verdicts {
            let cluster_high = v.cluster_risk_label == crate::models::RiskLabel::High;
            if cluster_high {
                summary.cluster_flagged += 1;
            }
            if v.probability_flag {
                summary.probability_flagged += 1;
            }
            if v.combined_risk_flag {
                summary.combined_flagged += 1;
            }
            if v.cluster_low_confidence {
                summary.low_confidence += 1;
            }
            if cluster_high != v.probability_flag {
                summary.disagreements += 1;
            }

            let stats = summary.by_component.entry(v.cluster_component_id).or_default();
            stats.total += 1;
            if v.combined_risk_flag {
                stats.combined_flagged += 1;
            }
        }

        summary
    }

    pub fn flag_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.combined_flagged as f64 / self.total as f64
        }
    }
}

impl std::fmt::Display for VerdictSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Risk Summary:")?;
        writeln!(f, "  Batches scored: {}", self.total)?;
        writeln!(
            f,
            "  Flagged: {} ({:.1}%)",
            self.combined_flagged,
            self.flag_rate() * 100.0
        )?;
        writeln!(f, "    by cluster: {}", self.cluster_flagged)?;
        writeln!(f, "    by probability: {}", self.probability_flagged)?;
        writeln!(f, "    signals disagree: {}", self.disagreements)?;
        if self.low_confidence > 0 {
            writeln!(f, "  Low-confidence cluster labels: {}", self.low_confidence)?;
        }
        for (id, stats) in &self.by_component {
            writeln!(
                f,
                "  cluster {}: {} batches, {} flagged",
                id, stats.total, stats.combined_flagged
            )?;
        }
        Ok(())
    }
}
