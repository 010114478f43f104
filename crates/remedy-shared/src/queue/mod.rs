//! # Task Queue
//!
//! Narrow facade over the external violation-task queue. The queue offers
//! at-least-once delivery with claim-with-lease semantics; the orchestrator
//! tolerates redelivery by keeping `mark_done` idempotent. The in-memory
//! implementation mirrors those semantics (lease expiry redelivers) so the
//! daemon can be exercised end-to-end without external storage.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{RemedyError, RemedyResult};
use crate::types::batch::BatchStrategy;
use crate::types::violation::Violation;

/// A violation batch task as stored in the external queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationTask {
    pub task_id: Uuid,
    /// Correlation id echoed through batches, workers, and events
    pub correlation_id: Uuid,
    pub violations: Vec<Violation>,
    /// Delivery attempt, incremented on republish
    pub attempt: u32,
    /// Optional partitioning hint from the producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_hint: Option<BatchStrategy>,
    pub enqueued_at: DateTime<Utc>,
}

impl ViolationTask {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self {
            task_id: Uuid::now_v7(),
            correlation_id: Uuid::now_v7(),
            violations,
            attempt: 0,
            strategy_hint: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_strategy_hint(mut self, hint: BatchStrategy) -> Self {
        self.strategy_hint = Some(hint);
        self
    }
}

/// Final disposition reported back to the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum TaskOutcome {
    Completed,
    /// Terminal, but the work did not succeed (escalated or fatal)
    CompletedWithFailure { reason: String },
}

/// A task claimed under a lease
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: ViolationTask,
    pub lease_expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct LeasedEntry {
    task: ViolationTask,
    lease_expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<ViolationTask>,
    leased: HashMap<Uuid, LeasedEntry>,
    outcomes: HashMap<Uuid, TaskOutcome>,
    failures: HashMap<Uuid, String>,
}

/// In-memory task queue with lease semantics
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RemedyResult<std::sync::MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|e| RemedyError::QueueError(format!("queue lock poisoned: {e}")))
    }

    pub fn enqueue(&self, task: ViolationTask) -> RemedyResult<()> {
        self.lock()?.ready.push_back(task);
        Ok(())
    }

    /// Claim up to `max_n` tasks under a lease.
    ///
    /// Expired leases are redelivered first: their tasks rejoin the ready
    /// queue before the claim pops, which is what gives the at-least-once
    /// behavior the daemon is written against.
    pub fn claim_next(&self, max_n: usize, lease: Duration) -> RemedyResult<Vec<ClaimedTask>> {
        let now = Utc::now();
        let mut state = self.lock()?;

        let expired: Vec<Uuid> = state
            .leased
            .iter()
            .filter(|(_, entry)| entry.lease_expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        if !expired.is_empty() {
            debug!(count = expired.len(), "Redelivering tasks with expired leases");
        }
        for id in expired {
            if let Some(entry) = state.leased.remove(&id) {
                state.ready.push_back(entry.task);
            }
        }

        let lease_expires_at = now
            + chrono::Duration::from_std(lease)
                .map_err(|e| RemedyError::QueueError(format!("lease duration overflow: {e}")))?;

        let mut claimed = Vec::new();
        while claimed.len() < max_n {
            let Some(task) = state.ready.pop_front() else {
                break;
            };
            state.leased.insert(
                task.task_id,
                LeasedEntry {
                    task: task.clone(),
                    lease_expires_at,
                },
            );
            claimed.push(ClaimedTask {
                task,
                lease_expires_at,
            });
        }

        Ok(claimed)
    }

    pub fn extend_lease(&self, task_id: Uuid, extension: Duration) -> RemedyResult<()> {
        let mut state = self.lock()?;
        let entry = state.leased.get_mut(&task_id).ok_or_else(|| {
            RemedyError::QueueError(format!("extend_lease: task {task_id} is not leased"))
        })?;
        entry.lease_expires_at = Utc::now()
            + chrono::Duration::from_std(extension)
                .map_err(|e| RemedyError::QueueError(format!("lease duration overflow: {e}")))?;
        Ok(())
    }

    /// Record a terminal outcome. Idempotent: duplicate deliveries of the
    /// same task id are acknowledged without effect.
    pub fn mark_done(&self, task_id: Uuid, outcome: TaskOutcome) -> RemedyResult<()> {
        let mut state = self.lock()?;
        if state.outcomes.contains_key(&task_id) {
            return Ok(());
        }
        state.leased.remove(&task_id);
        state.ready.retain(|t| t.task_id != task_id);
        state.outcomes.insert(task_id, outcome);
        Ok(())
    }

    pub fn mark_failed(&self, task_id: Uuid, reason: impl Into<String>) -> RemedyResult<()> {
        let mut state = self.lock()?;
        state.leased.remove(&task_id);
        state.ready.retain(|t| t.task_id != task_id);
        state.failures.entry(task_id).or_insert_with(|| reason.into());
        Ok(())
    }

    /// Return a leased task to the queue unchanged (tick-level error path)
    pub fn release(&self, task_id: Uuid) -> RemedyResult<()> {
        let mut state = self.lock()?;
        if let Some(entry) = state.leased.remove(&task_id) {
            state.ready.push_front(entry.task);
        }
        Ok(())
    }

    /// Re-enqueue a leased task with its attempt counter incremented,
    /// returning the new attempt number
    pub fn republish(&self, task_id: Uuid) -> RemedyResult<u32> {
        let mut state = self.lock()?;
        let entry = state.leased.remove(&task_id).ok_or_else(|| {
            RemedyError::QueueError(format!("republish: task {task_id} is not leased"))
        })?;
        let mut task = entry.task;
        task.attempt += 1;
        let attempt = task.attempt;
        state.ready.push_back(task);
        Ok(attempt)
    }

    pub fn ready_depth(&self) -> usize {
        self.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    pub fn leased_count(&self) -> usize {
        self.lock().map(|s| s.leased.len()).unwrap_or(0)
    }

    pub fn outcome_of(&self, task_id: Uuid) -> Option<TaskOutcome> {
        self.lock().ok()?.outcomes.get(&task_id).cloned()
    }

    pub fn failure_of(&self, task_id: Uuid) -> Option<String> {
        self.lock().ok()?.failures.get(&task_id).cloned()
    }
}

/// Enum-dispatched task queue provider
#[derive(Debug)]
pub enum TaskQueueProvider {
    InMemory(InMemoryTaskQueue),
}

impl TaskQueueProvider {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryTaskQueue::new())
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::InMemory(_) => "in_memory",
        }
    }

    pub async fn enqueue(&self, task: ViolationTask) -> RemedyResult<()> {
        match self {
            Self::InMemory(q) => q.enqueue(task),
        }
    }

    pub async fn claim_next(
        &self,
        max_n: usize,
        lease: Duration,
    ) -> RemedyResult<Vec<ClaimedTask>> {
        match self {
            Self::InMemory(q) => q.claim_next(max_n, lease),
        }
    }

    pub async fn extend_lease(&self, task_id: Uuid, extension: Duration) -> RemedyResult<()> {
        match self {
            Self::InMemory(q) => q.extend_lease(task_id, extension),
        }
    }

    pub async fn mark_done(&self, task_id: Uuid, outcome: TaskOutcome) -> RemedyResult<()> {
        match self {
            Self::InMemory(q) => q.mark_done(task_id, outcome),
        }
    }

    pub async fn mark_failed(&self, task_id: Uuid, reason: impl Into<String>) -> RemedyResult<()> {
        match self {
            Self::InMemory(q) => q.mark_failed(task_id, reason),
        }
    }

    pub async fn release(&self, task_id: Uuid) -> RemedyResult<()> {
        match self {
            Self::InMemory(q) => q.release(task_id),
        }
    }

    pub async fn republish(&self, task_id: Uuid) -> RemedyResult<u32> {
        match self {
            Self::InMemory(q) => q.republish(task_id),
        }
    }

    /// Access the in-memory backend, when that is what this provider wraps
    pub fn as_in_memory(&self) -> Option<&InMemoryTaskQueue> {
        match self {
            Self::InMemory(q) => Some(q),
        }
    }
}
