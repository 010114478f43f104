//! # Fast Worker Channel
//!
//! In-process cooperative fixers. The supervisor drives the lifecycle and
//! heartbeats; the actual fix is behind the [`FastFix`] seam because the
//! linters and formatters it delegates to are external collaborators.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use remedy_shared::types::batch::Batch;
use remedy_shared::types::retrieval::RetrievalContext;
use remedy_shared::types::routing::RoutingDecision;
use remedy_shared::types::worker::{WorkerOutcome, WorkerState};

use super::SupervisorInner;

/// The fix a fast worker performs or delegates.
///
/// Implementations must be cooperative: long work should check `cancel`
/// between steps and return promptly once it fires.
#[async_trait]
pub trait FastFix: Send + Sync + std::fmt::Debug {
    async fn apply(
        &self,
        batch: &Batch,
        retrieval: &RetrievalContext,
        cancel: &CancellationToken,
    ) -> WorkerOutcome;
}

/// Records dispatched batches and reports success. Stands in for the real
/// fixer pipeline in tests and smoke deployments.
#[derive(Debug, Default)]
pub struct NoopFastFix {
    applied: Mutex<Vec<Uuid>>,
}

impl NoopFastFix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch ids this fixer has been asked to apply, in dispatch order
    pub fn applied_batches(&self) -> Vec<Uuid> {
        self.applied.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FastFix for NoopFastFix {
    async fn apply(
        &self,
        batch: &Batch,
        _retrieval: &RetrievalContext,
        cancel: &CancellationToken,
    ) -> WorkerOutcome {
        if cancel.is_cancelled() {
            return WorkerOutcome::RetryableFailure {
                reason: "cancelled before apply".to_string(),
            };
        }
        if let Ok(mut applied) = self.applied.lock() {
            applied.push(batch.batch_id);
        }
        WorkerOutcome::Completed
    }
}

/// Body of one fast worker task. Owns the pool permit for its lifetime and
/// ticks the in-process heartbeat while the fix runs.
pub(crate) async fn run_fast_worker(
    inner: Arc<SupervisorInner>,
    worker_id: Uuid,
    decision: RoutingDecision,
    cancel: CancellationToken,
    permit: OwnedSemaphorePermit,
) {
    inner.transition(worker_id, WorkerState::Running, None);

    let heartbeat_interval =
        std::time::Duration::from_secs(inner.config.fast_heartbeat_interval_s.max(1));
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let fixer = inner.fixer.clone();
    let fix = fixer.apply(&decision.batch, &decision.retrieval, &cancel);
    tokio::pin!(fix);

    let outcome = loop {
        tokio::select! {
            outcome = &mut fix => break Some(outcome),
            _ = cancel.cancelled() => break None,
            _ = heartbeat.tick() => {
                inner.touch_heartbeat(worker_id).await;
            }
        }
    };

    match outcome {
        Some(WorkerOutcome::Completed) => {
            inner.transition(
                worker_id,
                WorkerState::Completed,
                Some(WorkerOutcome::Completed),
            );
        }
        Some(failure) => {
            inner.transition(worker_id, WorkerState::Failed, Some(failure));
        }
        // Cancellation may have come from cancel()/sweep, in which case the
        // handle is already terminal and this transition is a no-op
        None => {
            inner.transition(worker_id, WorkerState::Cancelled, None);
        }
    }

    inner.cleanup_worker(worker_id).await;
    drop(permit);
}
