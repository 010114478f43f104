//! # Daemon
//!
//! The top-level orchestrator: owns the poll loop and wires intake,
//! partitioning, scoring, retrieval, routing, dispatch, escalation, and
//! completion handling together. Errors never cross the loop boundary:
//! each task is processed behind a result and a failed task is released
//! back to the queue while the tick continues.

pub mod snapshot;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use remedy_shared::config::RemedyConfig;
use remedy_shared::messaging::{topics, BusEvent, EventBusProvider};
use remedy_shared::queue::{ClaimedTask, TaskOutcome, TaskQueueProvider};
use remedy_shared::registry::WorkerRegistryProvider;
use remedy_shared::types::routing::{Channel, ReasonCode};
use remedy_shared::types::worker::{WorkerOutcome, WorkerState};
use remedy_shared::{RemedyError, RemedyResult};
use tokio_util::sync::CancellationToken;

use crate::batching::BatchOptimizer;
use crate::escalation::{EscalationManager, EscalationStats};
use crate::pattern_index::PatternIndex;
use crate::routing::DecisionEngine;
use crate::scoring::ComplexityScorer;
use crate::supervisor::{FastFix, WorkerEvent, WorkerSupervisor};

use snapshot::{CounterSnapshot, DaemonSnapshot, WorkerSnapshot};

/// Matches requested from the pattern index per batch
const RETRIEVAL_TOP_K: usize = 5;

/// Progress of one claimed task across its batches
#[derive(Debug)]
struct TaskProgress {
    claimed: ClaimedTask,
    total_batches: usize,
    completed: usize,
    escalated: usize,
    retryable: usize,
    fatal: usize,
    timed_out: usize,
    cancelled: usize,
    /// Batch/worker behind the most recent retryable failure, kept so an
    /// exhausted-retries case can reference real ids
    last_retryable: Option<(Uuid, Option<Uuid>)>,
}

impl TaskProgress {
    fn new(claimed: ClaimedTask) -> Self {
        Self {
            claimed,
            total_batches: 0,
            completed: 0,
            escalated: 0,
            retryable: 0,
            fatal: 0,
            timed_out: 0,
            cancelled: 0,
            last_retryable: None,
        }
    }

    fn resolved(&self) -> usize {
        self.completed + self.escalated + self.retryable + self.fatal + self.timed_out + self.cancelled
    }

    fn is_settled(&self) -> bool {
        self.resolved() >= self.total_batches
    }
}

#[derive(Debug, Default)]
struct DaemonCounters {
    tasks_processed: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_retried: AtomicU64,
    fast_dispatched: AtomicU64,
    heavy_dispatched: AtomicU64,
    human_escalated: AtomicU64,
}

impl DaemonCounters {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            tasks_processed: self.tasks_processed.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            fast_dispatched: self.fast_dispatched.load(Ordering::Relaxed),
            heavy_dispatched: self.heavy_dispatched.load(Ordering::Relaxed),
            human_escalated: self.human_escalated.load(Ordering::Relaxed),
        }
    }
}

/// The orchestration daemon. One instance owns all long-lived resources;
/// nothing reaches into process globals.
#[derive(Debug)]
pub struct Daemon {
    config: RemedyConfig,
    queue: Arc<TaskQueueProvider>,
    bus: Arc<EventBusProvider>,
    index: Arc<PatternIndex>,
    scorer: ComplexityScorer,
    optimizer: BatchOptimizer,
    engine: DecisionEngine,
    supervisor: Arc<WorkerSupervisor>,
    escalations: Arc<EscalationManager>,
    in_flight: Mutex<HashMap<Uuid, TaskProgress>>,
    counters: DaemonCounters,
    root_token: CancellationToken,
    shutdown_done: AtomicBool,
}

impl Daemon {
    /// Wire a daemon from its collaborators. The supervisor and escalation
    /// manager are constructed here so ownership stays one-way: the daemon
    /// owns them, and they report back only through polled events.
    pub fn new(
        config: RemedyConfig,
        queue: Arc<TaskQueueProvider>,
        bus: Arc<EventBusProvider>,
        registry: Arc<WorkerRegistryProvider>,
        index: Arc<PatternIndex>,
        fixer: Arc<dyn FastFix>,
    ) -> Self {
        let root_token = CancellationToken::new();
        let supervisor = Arc::new(WorkerSupervisor::new(
            config.supervisor.clone(),
            registry,
            fixer,
            root_token.child_token(),
        ));
        let escalations = Arc::new(EscalationManager::new(bus.clone()));

        Self {
            scorer: ComplexityScorer::default(),
            optimizer: BatchOptimizer::new(config.batching.clone()),
            engine: DecisionEngine::new(config.routing.clone()),
            config,
            queue,
            bus,
            index,
            supervisor,
            escalations,
            in_flight: Mutex::new(HashMap::new()),
            counters: DaemonCounters::default(),
            root_token,
            shutdown_done: AtomicBool::new(false),
        }
    }

    /// Replace the churn watchlist the scorer consults
    pub fn with_churn_watchlist(
        mut self,
        watchlist: impl IntoIterator<Item = std::path::PathBuf>,
    ) -> Self {
        self.scorer = ComplexityScorer::new(watchlist);
        self
    }

    /// Token external callers cancel to stop the daemon
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root_token.clone()
    }

    pub fn escalations(&self) -> &Arc<EscalationManager> {
        &self.escalations
    }

    pub fn supervisor(&self) -> &Arc<WorkerSupervisor> {
        &self.supervisor
    }

    /// Main loop: poll ticks, health sweeps, and event drains until the
    /// root token fires, then shut down.
    pub async fn run(&self) -> RemedyResult<()> {
        info!(
            poll_interval_s = self.config.daemon.poll_interval_s,
            fast_pool = self.config.supervisor.fast_pool_size,
            heavy_pool = self.config.supervisor.heavy_pool_size,
            "Daemon starting"
        );

        let mut poll = tokio::time::interval(self.config.daemon.poll_interval());
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut sweep = tokio::time::interval(self.config.supervisor.health_sweep_interval());
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.root_token.cancelled() => break,
                _ = poll.tick() => {
                    self.tick().await;
                }
                _ = sweep.tick() => {
                    self.supervisor.sweep_health().await;
                    self.drain_worker_events().await;
                    self.extend_inflight_leases().await;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One poll-loop iteration: drain completions, compute the admission
    /// budget, claim, and process.
    #[instrument(skip(self))]
    async fn tick(&self) {
        self.drain_worker_events().await;

        let fast_free = self.supervisor.free_fast_slots();
        let heavy_free = self.supervisor.free_heavy_slots();
        if fast_free + heavy_free == 0 {
            debug!("Both pools at capacity, skipping tick");
            return;
        }

        let budget = (fast_free + heavy_free).min(self.config.daemon.claim_batch_size);
        let claimed = match tokio::time::timeout(
            self.config.daemon.queue_poll_timeout(),
            self.queue
                .claim_next(budget, self.config.daemon.claim_lease()),
        )
        .await
        {
            Err(_) => {
                warn!(
                    timeout_s = self.config.daemon.queue_poll_timeout_s,
                    "Queue poll timed out, aborting tick"
                );
                return;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Queue claim failed, backing off until next tick");
                return;
            }
            Ok(Ok(claimed)) => claimed,
        };

        if claimed.is_empty() {
            return;
        }
        debug!(claimed = claimed.len(), budget = budget, "Claimed tasks");

        for task in claimed {
            let task_id = task.task.task_id;
            if let Err(e) = self.process_task(task).await {
                error!(task_id = %task_id, error = %e, "Task processing failed, releasing task");
                self.remove_progress(task_id);
                if let Err(release_err) = self.queue.release(task_id).await {
                    warn!(task_id = %task_id, error = %release_err, "Failed to release task");
                }
            }
        }
    }

    /// Partition, score, enrich, route, and dispatch one claimed task
    #[instrument(skip(self, claimed), fields(task_id = %claimed.task.task_id))]
    async fn process_task(&self, claimed: ClaimedTask) -> RemedyResult<()> {
        let task = claimed.task.clone();
        self.counters.tasks_processed.fetch_add(1, Ordering::Relaxed);

        let batches = self.optimizer.partition(
            task.task_id,
            task.correlation_id,
            &task.violations,
            task.strategy_hint,
        );

        if batches.is_empty() {
            // Empty violation list: done with no side effects beyond the ack
            self.queue
                .mark_done(task.task_id, TaskOutcome::Completed)
                .await?;
            self.counters.tasks_completed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        {
            let mut in_flight = self.lock_in_flight()?;
            let mut progress = TaskProgress::new(claimed);
            progress.total_batches = batches.len();
            in_flight.insert(task.task_id, progress);
        }

        for batch in batches {
            let score = self.scorer.score(&batch);
            if score.coerced {
                self.report_invariant_violation(&batch, &score).await;
            }

            let retrieval = self.index.retrieve_for_batch(&batch, RETRIEVAL_TOP_K);
            let decision = self.engine.decide(batch, score, retrieval);

            match decision.channel {
                Channel::Human => {
                    self.counters.human_escalated.fetch_add(1, Ordering::Relaxed);
                    self.escalations
                        .open(&decision.batch, None, decision.reason)
                        .await?;
                    self.record_batch_outcome(
                        decision.batch.task_id,
                        BatchOutcome::Escalated,
                        decision.batch.batch_id,
                        None,
                    )
                    .await;
                }
                Channel::Fast | Channel::Heavy => {
                    let channel = decision.channel;
                    let batch_id = decision.batch.batch_id;
                    let correlation_id = decision.batch.correlation_id;
                    let reason = decision.reason;
                    let worker_id = self.supervisor.dispatch(decision).await?;

                    match channel {
                        Channel::Fast => {
                            self.counters.fast_dispatched.fetch_add(1, Ordering::Relaxed)
                        }
                        _ => self.counters.heavy_dispatched.fetch_add(1, Ordering::Relaxed),
                    };
                    self.publish(
                        topics::TASK_DISPATCHED,
                        correlation_id,
                        json!({
                            "task_id": task.task_id,
                            "batch_id": batch_id,
                            "worker_id": worker_id,
                            "channel": channel.to_string(),
                            "reason": reason.to_string(),
                        }),
                    )
                    .await;
                }
            }
        }

        Ok(())
    }

    /// Drain supervisor lifecycle events: publish them, map terminal states
    /// to escalations, and settle tasks whose batches are all resolved.
    async fn drain_worker_events(&self) {
        for event in self.supervisor.poll_events() {
            self.publish(
                topics::MONITOR_WORKER_LIFECYCLE,
                event.correlation_id,
                json!({
                    "worker_id": event.worker_id,
                    "kind": event.kind.to_string(),
                    "batch_id": event.batch_id,
                    "task_id": event.task_id,
                    "from": event.from.map(|s| s.to_string()),
                    "to": event.to.to_string(),
                    "outcome": event.outcome,
                }),
            )
            .await;

            if event.to.is_terminal() {
                self.handle_terminal_event(event).await;
            }
        }
        self.supervisor.prune_terminal_handles();
    }

    async fn handle_terminal_event(&self, event: WorkerEvent) {
        let outcome = match event.to {
            WorkerState::Completed => {
                // Security-kind work needs post-hoc human sign-off even on
                // success
                if event.requires_sign_off {
                    self.open_case_for_event(&event, ReasonCode::SecurityKind).await;
                }
                BatchOutcome::Completed
            }
            WorkerState::Failed => match event.outcome {
                Some(WorkerOutcome::RetryableFailure { .. }) => BatchOutcome::Retryable,
                _ => {
                    self.open_case_for_event(&event, ReasonCode::WorkerFatal).await;
                    BatchOutcome::Fatal
                }
            },
            WorkerState::TimedOut => {
                self.open_case_for_event(&event, ReasonCode::Timeout).await;
                BatchOutcome::TimedOut
            }
            WorkerState::Cancelled => {
                self.open_case_for_event(&event, ReasonCode::Cancelled).await;
                BatchOutcome::Cancelled
            }
            _ => return,
        };

        self.record_batch_outcome(event.task_id, outcome, event.batch_id, Some(event.worker_id))
            .await;
    }

    async fn open_case_for_event(&self, event: &WorkerEvent, reason: ReasonCode) {
        if let Err(e) = self
            .escalations
            .open_ref(
                event.batch_id,
                event.task_id,
                event.correlation_id,
                Some(event.worker_id),
                reason,
            )
            .await
        {
            error!(
                worker_id = %event.worker_id,
                batch_id = %event.batch_id,
                error = %e,
                "Failed to open escalation case"
            );
        }
    }

    /// Fold one batch outcome into its task's progress; settle the task
    /// when every batch is resolved.
    async fn record_batch_outcome(
        &self,
        task_id: Uuid,
        outcome: BatchOutcome,
        batch_id: Uuid,
        worker_id: Option<Uuid>,
    ) {
        let settled = {
            let Ok(mut in_flight) = self.lock_in_flight() else {
                return;
            };
            let Some(progress) = in_flight.get_mut(&task_id) else {
                // Task already settled (e.g. late cancel event after retry)
                return;
            };
            match outcome {
                BatchOutcome::Completed => progress.completed += 1,
                BatchOutcome::Escalated => progress.escalated += 1,
                BatchOutcome::Retryable => {
                    progress.retryable += 1;
                    progress.last_retryable = Some((batch_id, worker_id));
                }
                BatchOutcome::Fatal => progress.fatal += 1,
                BatchOutcome::TimedOut => progress.timed_out += 1,
                BatchOutcome::Cancelled => progress.cancelled += 1,
            }
            if progress.is_settled() {
                in_flight.remove(&task_id)
            } else {
                None
            }
        };

        if let Some(progress) = settled {
            self.settle_task(task_id, progress).await;
        }
    }

    /// Decide the final queue disposition for a fully-resolved task
    async fn settle_task(&self, task_id: Uuid, progress: TaskProgress) {
        let correlation_id = progress.claimed.task.correlation_id;

        if progress.fatal > 0 {
            self.finish_failed(
                task_id,
                correlation_id,
                TaskOutcome::CompletedWithFailure {
                    reason: "worker reported a fatal failure".to_string(),
                },
                "worker-fatal",
            )
            .await;
        } else if progress.timed_out > 0 || progress.cancelled > 0 {
            let reason = if progress.timed_out > 0 { "timeout" } else { "cancelled" };
            if let Err(e) = self.queue.mark_failed(task_id, reason).await {
                warn!(task_id = %task_id, error = %e, "Failed to mark task failed");
            }
            self.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
            self.publish(
                topics::TASK_FAILED,
                correlation_id,
                json!({"task_id": task_id, "reason": reason}),
            )
            .await;
        } else if progress.retryable > 0 {
            self.retry_or_exhaust(task_id, progress).await;
        } else {
            // Only completions and human escalations remain
            let outcome = if progress.escalated > 0 {
                TaskOutcome::CompletedWithFailure {
                    reason: "escalated to human review".to_string(),
                }
            } else {
                TaskOutcome::Completed
            };
            let fully_fixed = progress.escalated == 0;
            if let Err(e) = self.queue.mark_done(task_id, outcome).await {
                warn!(task_id = %task_id, error = %e, "Failed to mark task done");
            }
            if fully_fixed {
                self.counters.tasks_completed.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
            }
            self.publish(
                topics::TASK_COMPLETED,
                correlation_id,
                json!({
                    "task_id": task_id,
                    "batches": progress.total_batches,
                    "completed": progress.completed,
                    "escalated": progress.escalated,
                }),
            )
            .await;
            info!(
                task_id = %task_id,
                batches = progress.total_batches,
                escalated = progress.escalated,
                "Task settled"
            );
        }
    }

    /// Republish a retryable task, or escalate once the attempt budget is
    /// spent
    async fn retry_or_exhaust(&self, task_id: Uuid, progress: TaskProgress) {
        let task = &progress.claimed.task;
        let attempts_used = task.attempt + 1;

        if attempts_used < self.config.daemon.max_attempts {
            match self.queue.republish(task_id).await {
                Ok(attempt) => {
                    self.counters.tasks_retried.fetch_add(1, Ordering::Relaxed);
                    info!(task_id = %task_id, attempt = attempt, "Task republished for retry");
                    self.publish(
                        topics::TASK_RETRIED,
                        task.correlation_id,
                        json!({"task_id": task_id, "attempt": attempt}),
                    )
                    .await;
                }
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Republish failed, marking task failed");
                    let _ = self.queue.mark_failed(task_id, "republish failed").await;
                    self.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        } else {
            warn!(
                task_id = %task_id,
                attempts = attempts_used,
                "Retry budget exhausted, escalating"
            );
            let (batch_id, worker_id) = progress
                .last_retryable
                .unwrap_or((task.task_id, None));
            if let Err(e) = self
                .escalations
                .open_ref(
                    batch_id,
                    task.task_id,
                    task.correlation_id,
                    worker_id,
                    ReasonCode::ExhaustedRetries,
                )
                .await
            {
                error!(task_id = %task_id, error = %e, "Failed to open exhausted-retries case");
            }
            self.finish_failed(
                task_id,
                task.correlation_id,
                TaskOutcome::CompletedWithFailure {
                    reason: "retry budget exhausted".to_string(),
                },
                "exhausted-retries",
            )
            .await;
        }
    }

    async fn finish_failed(
        &self,
        task_id: Uuid,
        correlation_id: Uuid,
        outcome: TaskOutcome,
        reason: &str,
    ) {
        if let Err(e) = self.queue.mark_done(task_id, outcome).await {
            warn!(task_id = %task_id, error = %e, "Failed to mark task done-with-failure");
        }
        self.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.publish(
            topics::TASK_FAILED,
            correlation_id,
            json!({"task_id": task_id, "reason": reason}),
        )
        .await;
    }

    /// Report a scorer bug on the monitor topic and keep running
    async fn report_invariant_violation(
        &self,
        batch: &remedy_shared::types::batch::Batch,
        score: &remedy_shared::types::score::Score,
    ) {
        error!(
            batch_id = %batch.batch_id,
            total = score.total,
            "Scorer produced out-of-range components; values coerced"
        );
        self.publish(
            topics::MONITOR_INVARIANT_VIOLATION,
            batch.correlation_id,
            json!({
                "component": "complexity_scorer",
                "batch_id": batch.batch_id,
                "score": score,
            }),
        )
        .await;
    }

    /// Keep queue leases alive for tasks whose workers are still running.
    /// A lost extension is transient: the lease is long relative to the
    /// sweep cadence, so the next pass retries well before expiry.
    async fn extend_inflight_leases(&self) {
        let task_ids: Vec<Uuid> = match self.lock_in_flight() {
            Ok(in_flight) => in_flight.keys().copied().collect(),
            Err(_) => return,
        };
        for task_id in task_ids {
            if let Err(e) = self
                .queue
                .extend_lease(task_id, self.config.daemon.claim_lease())
                .await
            {
                debug!(task_id = %task_id, error = %e, "Lease extension failed");
            }
        }
    }

    /// Publish with the configured timeout. Failures are transient
    /// external errors: warn and continue.
    async fn publish(&self, topic: &str, correlation_id: Uuid, payload: serde_json::Value) {
        let event = BusEvent::new(topic, correlation_id, payload);
        match tokio::time::timeout(
            self.config.daemon.event_publish_timeout(),
            self.bus.publish(event),
        )
        .await
        {
            Err(_) => warn!(topic = topic, "Event publish timed out"),
            Ok(Err(e)) => warn!(topic = topic, error = %e, "Event publish failed"),
            Ok(Ok(())) => {}
        }
    }

    /// Observability snapshot for the read-only dashboard
    pub fn snapshot(&self) -> DaemonSnapshot {
        let workers: Vec<WorkerSnapshot> = self
            .supervisor
            .handles_snapshot()
            .iter()
            .map(WorkerSnapshot::from)
            .collect();
        DaemonSnapshot {
            workers,
            counters: self.counters.snapshot(),
            escalations: self.escalations.stats(),
            pattern_index: self.index.stats(),
            taken_at: Utc::now(),
        }
    }

    /// Escalation stats passthrough for dashboards that only want counts
    pub fn escalation_stats(&self) -> EscalationStats {
        self.escalations.stats()
    }

    /// Stop intake, cancel in-flight work with the configured grace, flush
    /// pending completions, and release anything still claimed. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown_done.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Daemon shutting down");

        self.root_token.cancel();
        self.supervisor.shutdown().await;
        self.drain_worker_events().await;

        // Anything still in flight goes back to the queue for the next run
        let leftover: Vec<Uuid> = self
            .lock_in_flight()
            .map(|in_flight| in_flight.keys().copied().collect())
            .unwrap_or_default();
        for task_id in leftover {
            self.remove_progress(task_id);
            if let Err(e) = self.queue.release(task_id).await {
                warn!(task_id = %task_id, error = %e, "Failed to release task during shutdown");
            }
        }

        info!("Daemon shutdown complete");
    }

    fn lock_in_flight(
        &self,
    ) -> RemedyResult<std::sync::MutexGuard<'_, HashMap<Uuid, TaskProgress>>> {
        self.in_flight
            .lock()
            .map_err(|e| RemedyError::SupervisorError(format!("in-flight lock poisoned: {e}")))
    }

    fn remove_progress(&self, task_id: Uuid) {
        if let Ok(mut in_flight) = self.lock_in_flight() {
            in_flight.remove(&task_id);
        }
    }
}

/// How one batch resolved, from the task's perspective
#[derive(Debug, Clone, Copy)]
enum BatchOutcome {
    Completed,
    Escalated,
    Retryable,
    Fatal,
    TimedOut,
    Cancelled,
}
