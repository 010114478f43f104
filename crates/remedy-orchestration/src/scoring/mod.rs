//! # Complexity Scorer
//!
//! Produces a [`Score`] in [0, 1] for a batch from four weighted signals:
//! file count, worst-case violation kind, dependency breadth, and churn.
//! The scorer is pure (no I/O, no clock) so every scoring decision is
//! reproducible from the batch alone.

use std::collections::HashSet;
use std::path::PathBuf;

use remedy_shared::types::batch::Batch;
use remedy_shared::types::score::Score;

/// Version tag recorded on every score this implementation produces
pub const SCORER_VERSION: &str = "v1";

/// File counts at or above this saturate the file-count component at 1.0
const FILE_COUNT_SATURATION: usize = 20;

/// Pure batch scorer. The churn watchlist is supplied by the caller;
/// an empty watchlist zeroes the churn component.
#[derive(Debug, Clone, Default)]
pub struct ComplexityScorer {
    churn_watchlist: HashSet<PathBuf>,
}

impl ComplexityScorer {
    pub fn new(churn_watchlist: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            churn_watchlist: churn_watchlist.into_iter().collect(),
        }
    }

    /// Score a batch.
    ///
    /// Components are each clamped to [0, 1]; a raw value outside that
    /// range marks the score `coerced` so the daemon can report the bug on
    /// the monitor topic without crashing.
    pub fn score(&self, batch: &Batch) -> Score {
        let raw_file_count = file_count_score(batch.distinct_file_count());
        let raw_kind = kind_score(batch);
        let raw_dependency = dependency_score(batch);
        let raw_churn = self.churn_score(batch);

        let raw_total = Score::weighted_total(raw_file_count, raw_kind, raw_dependency, raw_churn);

        let components = [raw_file_count, raw_kind, raw_dependency, raw_churn, raw_total];
        let coerced = components.iter().any(|v| !(0.0..=1.0).contains(v));

        Score {
            total: clamp_unit(raw_total),
            file_count_score: clamp_unit(raw_file_count),
            kind_score: clamp_unit(raw_kind),
            dependency_score: clamp_unit(raw_dependency),
            churn_score: clamp_unit(raw_churn),
            kind_weight: clamp_unit(raw_kind),
            scorer_version: SCORER_VERSION.to_string(),
            coerced,
        }
    }

    /// Fraction of violations whose file is on the churn watchlist
    fn churn_score(&self, batch: &Batch) -> f64 {
        if batch.is_empty() || self.churn_watchlist.is_empty() {
            return 0.0;
        }
        let hot = batch
            .violations
            .iter()
            .filter(|v| self.churn_watchlist.contains(&v.file_path))
            .count();
        hot as f64 / batch.len() as f64
    }
}

/// Linear interpolation: 1 file → 0.0, 20+ files → 1.0
fn file_count_score(distinct_files: usize) -> f64 {
    if distinct_files <= 1 {
        return 0.0;
    }
    let span = (FILE_COUNT_SATURATION - 1) as f64;
    (((distinct_files - 1) as f64) / span).min(1.0)
}

/// Worst-case intrinsic kind cost over the batch
fn kind_score(batch: &Batch) -> f64 {
    batch
        .violations
        .iter()
        .map(|v| v.kind.intrinsic_cost())
        .fold(0.0, f64::max)
}

/// Fraction of violations in the import family or outside the batch's modal
/// directory
fn dependency_score(batch: &Batch) -> f64 {
    if batch.is_empty() {
        return 0.0;
    }
    let Some(modal) = batch.modal_directory() else {
        return 0.0;
    };
    let dependency_like = batch
        .violations
        .iter()
        .filter(|v| v.kind.is_import_family() || v.directory() != modal)
        .count();
    dependency_like as f64 / batch.len() as f64
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    use remedy_shared::types::batch::BatchStrategy;
    use remedy_shared::types::score::{
        CHURN_WEIGHT, DEPENDENCY_WEIGHT, FILE_COUNT_WEIGHT, KIND_WEIGHT,
    };
    use remedy_shared::types::violation::{Violation, ViolationKind};
    use uuid::Uuid;

    fn batch_of(violations: Vec<Violation>) -> Batch {
        Batch::new(Uuid::now_v7(), Uuid::now_v7(), BatchStrategy::Mixed, violations)
    }

    fn style_violation(id: &str, path: &str) -> Violation {
        Violation::new(id, ViolationKind::LineLength, path, 1)
    }

    #[test]
    fn test_file_count_interpolation() {
        assert_eq!(file_count_score(0), 0.0);
        assert_eq!(file_count_score(1), 0.0);
        assert!((file_count_score(6) - 5.0 / 19.0).abs() < 1e-9);
        assert_eq!(file_count_score(20), 1.0);
        assert_eq!(file_count_score(50), 1.0);
    }

    #[test]
    fn test_kind_score_is_max() {
        let batch = batch_of(vec![
            style_violation("a", "x.py"),
            Violation::new("b", ViolationKind::ConfigMigration, "y.py", 2),
            Violation::new("c", ViolationKind::ConfigPolicy, "z.py", 3),
        ]);
        assert!((kind_score(&batch) - 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_pure_style_single_file_scores_low() {
        // Five line-length violations in one file: total ≈ 0.02
        let violations = (0..5)
            .map(|i| style_violation(&format!("v{i}"), "a/b.py"))
            .collect();
        let score = ComplexityScorer::default().score(&batch_of(violations));

        assert!((score.file_count_score - 0.0).abs() < 1e-9);
        assert!((score.kind_score - 0.05).abs() < 1e-9);
        assert!((score.dependency_score - 0.0).abs() < 1e-9);
        assert!((score.churn_score - 0.0).abs() < 1e-9);
        assert!((score.total - 0.02).abs() < 1e-9);
        assert!(!score.coerced);
        assert_eq!(score.scorer_version, SCORER_VERSION);
    }

    #[test]
    fn test_weighted_total_invariant() {
        let violations = vec![
            Violation::new("a", ViolationKind::CrossFileImport, "pkg/a/m.py", 1),
            Violation::new("b", ViolationKind::ConfigMigration, "pkg/b/n.py", 2),
            style_violation("c", "pkg/a/o.py"),
        ];
        let score = ComplexityScorer::default().score(&batch_of(violations));

        let recomputed = FILE_COUNT_WEIGHT * score.file_count_score
            + KIND_WEIGHT * score.kind_score
            + DEPENDENCY_WEIGHT * score.dependency_score
            + CHURN_WEIGHT * score.churn_score;
        assert!((score.total - recomputed).abs() < 1e-9);
        assert!(score.in_range());
    }

    #[test]
    fn test_dependency_counts_imports_and_outside_modal() {
        // Two in pkg/a (modal), one import violation inside modal, one plain
        // style violation in pkg/b
        let batch = batch_of(vec![
            Violation::new("a", ViolationKind::CrossFileImport, "pkg/a/m.py", 1),
            style_violation("b", "pkg/a/n.py"),
            style_violation("c", "pkg/b/o.py"),
        ]);
        // import (a) + outside-modal (c) = 2 of 3
        assert!((dependency_score(&batch) - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_churn_fraction() {
        let scorer = ComplexityScorer::new([PathBuf::from("hot.py")]);
        let batch = batch_of(vec![
            style_violation("a", "hot.py"),
            style_violation("b", "cold.py"),
        ]);
        let score = scorer.score(&batch);
        assert!((score.churn_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_watchlist_zeroes_churn() {
        let batch = batch_of(vec![style_violation("a", "hot.py")]);
        let score = ComplexityScorer::default().score(&batch);
        assert_eq!(score.churn_score, 0.0);
    }

    #[test]
    fn test_scorer_is_deterministic() {
        let batch = batch_of(vec![
            Violation::new("a", ViolationKind::Security, "auth/login.py", 10),
            Violation::new("b", ViolationKind::CrossFileImport, "auth/session.py", 20),
        ]);
        let scorer = ComplexityScorer::default();
        assert_eq!(scorer.score(&batch), scorer.score(&batch));
    }

    #[test]
    fn test_mixed_architectural_scenario() {
        // 8 violations: 4 imports + 4 config-migration across 6 files.
        // kind max 0.60, file-count (6-1)/19, dependency 0.5 by construction
        let violations = vec![
            Violation::new("i1", ViolationKind::CrossFileImport, "app/a.py", 1),
            Violation::new("i2", ViolationKind::CrossFileImport, "app/b.py", 1),
            Violation::new("i3", ViolationKind::CrossFileImport, "app/c.py", 1),
            Violation::new("i4", ViolationKind::CrossFileImport, "app/d.py", 1),
            Violation::new("m1", ViolationKind::ConfigMigration, "app/a.py", 9),
            Violation::new("m2", ViolationKind::ConfigMigration, "app/b.py", 9),
            Violation::new("m3", ViolationKind::ConfigMigration, "app/e.py", 9),
            Violation::new("m4", ViolationKind::ConfigMigration, "app/f.py", 9),
        ];
        let score = ComplexityScorer::default().score(&batch_of(violations));

        assert!((score.kind_score - 0.60).abs() < 1e-9);
        assert!((score.file_count_score - 5.0 / 19.0).abs() < 1e-9);
        assert!((score.dependency_score - 0.5).abs() < 1e-9);
        let expected = 0.25 * (5.0 / 19.0) + 0.40 * 0.60 + 0.20 * 0.5;
        assert!((score.total - expected).abs() < 1e-9);
        // Medium complexity band: the low-confidence routing rule applies
        assert!(score.total >= 0.40 && score.total < 0.70);
    }

    #[test]
    fn test_empty_batch_scores_zero() {
        let score = ComplexityScorer::default().score(&batch_of(vec![]));
        assert_eq!(score.total, 0.0);
        assert!(!score.coerced);
    }
}
