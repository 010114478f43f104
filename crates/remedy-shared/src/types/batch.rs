//! # Batches
//!
//! A [`Batch`] is the bounded, routable unit the orchestrator dispatches:
//! an ordered slice of violations obeying the configured size and file caps,
//! tagged with the strategy that formed it.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::violation::Violation;

/// How a batch was formed by the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchStrategy {
    ByType,
    ByFile,
    ByComplexity,
    Mixed,
}

/// An ordered, bounded collection of violations routed as one unit.
///
/// Created by the batch optimizer and consumed by exactly one dispatch.
/// Carries the originating queue task and correlation ids so every
/// downstream event can be traced back to its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: Uuid,
    /// Queue task this batch was partitioned from
    pub task_id: Uuid,
    /// Correlation id echoed in every event and worker handoff
    pub correlation_id: Uuid,
    pub strategy_tag: BatchStrategy,
    pub violations: Vec<Violation>,
}

impl Batch {
    /// Create a batch for a set of violations partitioned from a task
    pub fn new(
        task_id: Uuid,
        correlation_id: Uuid,
        strategy_tag: BatchStrategy,
        violations: Vec<Violation>,
    ) -> Self {
        Self {
            batch_id: Uuid::now_v7(),
            task_id,
            correlation_id,
            strategy_tag,
            violations,
        }
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Number of distinct files this batch touches
    pub fn distinct_file_count(&self) -> usize {
        let mut files: Vec<&PathBuf> = self.violations.iter().map(|v| &v.file_path).collect();
        files.sort();
        files.dedup();
        files.len()
    }

    /// Whether any violation carries critical severity
    pub fn has_critical(&self) -> bool {
        self.violations.iter().any(Violation::is_critical)
    }

    /// The most common parent directory among the batch's files.
    ///
    /// Ties break toward the lexicographically smallest directory so the
    /// dependency heuristic stays deterministic.
    pub fn modal_directory(&self) -> Option<PathBuf> {
        if self.violations.is_empty() {
            return None;
        }

        let mut counts: HashMap<PathBuf, usize> = HashMap::new();
        for violation in &self.violations {
            *counts.entry(violation.directory().to_path_buf()).or_insert(0) += 1;
        }

        counts
            .into_iter()
            .max_by(|(dir_a, count_a), (dir_b, count_b)| {
                count_a.cmp(count_b).then_with(|| dir_b.cmp(dir_a))
            })
            .map(|(dir, _)| dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::violation::ViolationKind;

    fn violation(id: &str, path: &str) -> Violation {
        Violation::new(id, ViolationKind::LineLength, path, 1)
    }

    fn batch_of(violations: Vec<Violation>) -> Batch {
        Batch::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            BatchStrategy::Mixed,
            violations,
        )
    }

    #[test]
    fn test_distinct_file_count() {
        let batch = batch_of(vec![
            violation("a", "src/x.py"),
            violation("b", "src/x.py"),
            violation("c", "src/y.py"),
        ]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.distinct_file_count(), 2);
    }

    #[test]
    fn test_modal_directory_majority() {
        let batch = batch_of(vec![
            violation("a", "src/core/x.py"),
            violation("b", "src/core/y.py"),
            violation("c", "src/util/z.py"),
        ]);
        assert_eq!(batch.modal_directory(), Some(PathBuf::from("src/core")));
    }

    #[test]
    fn test_modal_directory_tie_breaks_lexicographically() {
        let batch = batch_of(vec![
            violation("a", "src/b/x.py"),
            violation("b", "src/a/y.py"),
        ]);
        assert_eq!(batch.modal_directory(), Some(PathBuf::from("src/a")));
    }

    #[test]
    fn test_modal_directory_empty_batch() {
        let batch = batch_of(vec![]);
        assert!(batch.modal_directory().is_none());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_has_critical() {
        use crate::types::violation::Severity;

        let mut violations = vec![violation("a", "x.py")];
        assert!(!batch_of(violations.clone()).has_critical());

        violations.push(
            Violation::new("b", ViolationKind::Security, "y.py", 5)
                .with_severity(Severity::Critical),
        );
        assert!(batch_of(violations).has_critical());
    }

    #[test]
    fn test_batch_serialization_round_trip() {
        let batch = batch_of(vec![violation("a", "src/x.py")]);
        let json = serde_json::to_string(&batch).unwrap();
        let parsed: Batch = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, batch);
    }

    #[test]
    fn test_strategy_tag_serialization() {
        assert_eq!(
            serde_json::to_string(&BatchStrategy::ByComplexity).unwrap(),
            "\"by-complexity\""
        );
    }
}
