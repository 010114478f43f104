//! # Batch Optimizer
//!
//! Partitions a raw violation stream into bounded, routable batches. Every
//! input violation lands in exactly one output batch, every batch obeys the
//! configured caps, and output order is deterministic (grouping key
//! lexicographic, input order within a group) so downstream routing is
//! reproducible from identical input.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::debug;
use uuid::Uuid;

use remedy_shared::config::BatchingConfig;
use remedy_shared::types::batch::{Batch, BatchStrategy};
use remedy_shared::types::violation::Violation;

/// Kind costs below this go to the "simple" stream in by-complexity mode
const SIMPLE_COST_THRESHOLD: f64 = 0.30;

/// Share of a single kind (or directory) above which the mixed heuristic
/// commits to by-type (or by-file) grouping
const DOMINANCE_SHARE: f64 = 0.80;

/// Partitions violation streams into batches obeying the configured caps
#[derive(Debug, Clone)]
pub struct BatchOptimizer {
    config: BatchingConfig,
}

impl BatchOptimizer {
    pub fn new(config: BatchingConfig) -> Self {
        Self { config }
    }

    /// Partition `violations` into batches for one queue task.
    ///
    /// With no hint (or an explicit `mixed` hint) the optimizer inspects the
    /// stream: a dominant kind selects by-type, a dominant directory selects
    /// by-file, anything else splits by per-violation complexity. Batches
    /// formed through the inspection carry the `mixed` tag; an explicit
    /// grouping hint is recorded as given.
    pub fn partition(
        &self,
        task_id: Uuid,
        correlation_id: Uuid,
        violations: &[Violation],
        strategy_hint: Option<BatchStrategy>,
    ) -> Vec<Batch> {
        if violations.is_empty() {
            return Vec::new();
        }

        let (effective, tag) = match strategy_hint {
            Some(BatchStrategy::Mixed) | None => (inspect_stream(violations), BatchStrategy::Mixed),
            Some(explicit) => (explicit, explicit),
        };

        let groups = match effective {
            BatchStrategy::ByType => group_by_type(violations),
            BatchStrategy::ByFile => group_by_file(violations),
            BatchStrategy::ByComplexity => group_by_complexity(violations),
            // inspect_stream never returns Mixed; an explicit Mixed hint was
            // already resolved above
            BatchStrategy::Mixed => group_by_complexity(violations),
        };

        let mut batches = Vec::new();
        for (_key, group) in groups {
            for chunk in self.chunk_with_caps(group) {
                batches.push(Batch::new(task_id, correlation_id, tag, chunk));
            }
        }

        debug!(
            task_id = %task_id,
            violation_count = violations.len(),
            batch_count = batches.len(),
            strategy = ?effective,
            "Partitioned violations"
        );
        batches
    }

    /// Split one ordered group into chunks of ≤ max_violations touching
    /// ≤ max_files distinct files
    fn chunk_with_caps(&self, group: Vec<Violation>) -> Vec<Vec<Violation>> {
        let mut chunks = Vec::new();
        let mut current: Vec<Violation> = Vec::new();
        let mut current_files: HashSet<PathBuf> = HashSet::new();

        for violation in group {
            let new_file = !current_files.contains(&violation.file_path);
            let would_overflow = current.len() >= self.config.batch_max_violations
                || (new_file && current_files.len() >= self.config.batch_max_files);

            if would_overflow && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_files.clear();
            }

            current_files.insert(violation.file_path.clone());
            current.push(violation);
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

/// Mixed-mode inspection: dominant kind → by-type, dominant directory →
/// by-file, otherwise by-complexity
fn inspect_stream(violations: &[Violation]) -> BatchStrategy {
    let total = violations.len() as f64;

    let mut kind_counts: HashMap<&'static str, usize> = HashMap::new();
    for v in violations {
        *kind_counts.entry(v.kind.group_key()).or_insert(0) += 1;
    }
    let max_kind_share = kind_counts.values().copied().max().unwrap_or(0) as f64 / total;
    if max_kind_share > DOMINANCE_SHARE {
        return BatchStrategy::ByType;
    }

    let mut dir_counts: HashMap<PathBuf, usize> = HashMap::new();
    for v in violations {
        *dir_counts.entry(v.directory().to_path_buf()).or_insert(0) += 1;
    }
    let max_dir_share = dir_counts.values().copied().max().unwrap_or(0) as f64 / total;
    if max_dir_share > DOMINANCE_SHARE {
        return BatchStrategy::ByFile;
    }

    BatchStrategy::ByComplexity
}

/// Group by kind, keys lexicographic, input order within a group
fn group_by_type(violations: &[Violation]) -> Vec<(String, Vec<Violation>)> {
    let mut groups: HashMap<String, Vec<Violation>> = HashMap::new();
    for v in violations {
        groups
            .entry(v.kind.group_key().to_string())
            .or_default()
            .push(v.clone());
    }
    into_sorted(groups)
}

/// Group by file path, keys lexicographic, input order within a group
fn group_by_file(violations: &[Violation]) -> Vec<(String, Vec<Violation>)> {
    let mut groups: HashMap<String, Vec<Violation>> = HashMap::new();
    for v in violations {
        groups
            .entry(v.file_path.to_string_lossy().into_owned())
            .or_default()
            .push(v.clone());
    }
    into_sorted(groups)
}

/// Two streams: simple (kind cost < 0.30) first, then complex
fn group_by_complexity(violations: &[Violation]) -> Vec<(String, Vec<Violation>)> {
    let mut simple = Vec::new();
    let mut complex = Vec::new();
    for v in violations {
        if v.kind.intrinsic_cost() < SIMPLE_COST_THRESHOLD {
            simple.push(v.clone());
        } else {
            complex.push(v.clone());
        }
    }

    let mut groups = Vec::new();
    if !simple.is_empty() {
        groups.push(("0-simple".to_string(), simple));
    }
    if !complex.is_empty() {
        groups.push(("1-complex".to_string(), complex));
    }
    groups
}

fn into_sorted(groups: HashMap<String, Vec<Violation>>) -> Vec<(String, Vec<Violation>)> {
    let mut sorted: Vec<(String, Vec<Violation>)> = groups.into_iter().collect();
    sorted.sort_by(|(a, _), (b, _)| a.cmp(b));
    sorted
}
