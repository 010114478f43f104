//! # Complexity Scores
//!
//! Output of the complexity scorer: a scalar in [0, 1] combining four
//! weighted component signals. The weights are part of the scoring contract
//! and are exported so tests can verify the arithmetic independently.

use serde::{Deserialize, Serialize};

/// Weight of the file-count component
pub const FILE_COUNT_WEIGHT: f64 = 0.25;
/// Weight of the kind component (worst-case violation dominates)
pub const KIND_WEIGHT: f64 = 0.40;
/// Weight of the dependency-breadth component
pub const DEPENDENCY_WEIGHT: f64 = 0.20;
/// Weight of the churn component
pub const CHURN_WEIGHT: f64 = 0.15;

/// Complexity score for a single batch. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Weighted total in [0, 1]
    pub total: f64,
    pub file_count_score: f64,
    pub kind_score: f64,
    pub dependency_score: f64,
    pub churn_score: f64,
    /// The winning per-kind intrinsic cost (max over the batch)
    pub kind_weight: f64,
    /// Version tag of the scorer that produced this score
    pub scorer_version: String,
    /// Set when a raw component fell outside [0, 1] and was clamped.
    ///
    /// A coerced score is a scorer bug; the daemon reports it on
    /// `qa.monitor.invariant_violation` and continues with the clamped value.
    #[serde(default)]
    pub coerced: bool,
}

impl Score {
    /// Combine component scores with the contract weights
    pub fn weighted_total(
        file_count_score: f64,
        kind_score: f64,
        dependency_score: f64,
        churn_score: f64,
    ) -> f64 {
        FILE_COUNT_WEIGHT * file_count_score
            + KIND_WEIGHT * kind_score
            + DEPENDENCY_WEIGHT * dependency_score
            + CHURN_WEIGHT * churn_score
    }

    /// Whether every component and the total sit inside [0, 1]
    pub fn in_range(&self) -> bool {
        [
            self.total,
            self.file_count_score,
            self.kind_score,
            self.dependency_score,
            self.churn_score,
        ]
        .iter()
        .all(|v| (0.0..=1.0).contains(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        let sum = FILE_COUNT_WEIGHT + KIND_WEIGHT + DEPENDENCY_WEIGHT + CHURN_WEIGHT;
        assert!((sum - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_weighted_total_arithmetic() {
        let total = Score::weighted_total(0.26, 0.60, 0.5, 0.0);
        assert!((total - (0.25 * 0.26 + 0.40 * 0.60 + 0.20 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_in_range() {
        let score = Score {
            total: 0.5,
            file_count_score: 0.2,
            kind_score: 0.8,
            dependency_score: 0.0,
            churn_score: 1.0,
            kind_weight: 0.8,
            scorer_version: "v1".to_string(),
            coerced: false,
        };
        assert!(score.in_range());

        let bad = Score {
            total: 1.2,
            ..score
        };
        assert!(!bad.in_range());
    }
}
