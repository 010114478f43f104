//! # Worker Supervisor
//!
//! Owns the two bounded worker pools (fast in-process, heavy spawned) and
//! every [`WorkerHandle`] in flight. All handle mutations funnel through
//! this component; the daemon observes lifecycle changes by draining
//! [`poll_events`](WorkerSupervisor::poll_events).
//!
//! ## Pools
//!
//! Pool capacity is enforced with semaphores. `dispatch` awaits a permit
//! cooperatively (it never spins) and the permit travels into the worker
//! task, so a slot frees exactly when its worker reaches a terminal state.
//!
//! ## Stopping workers
//!
//! Fast workers observe a per-worker cancellation token (child of the
//! supervisor's root token). Heavy workers get the soft-then-hard sequence:
//! SIGTERM, a grace period, then SIGKILL, driven by the per-worker watcher
//! task through its control channel.

mod fast;
mod health;
mod heavy;

pub use fast::{FastFix, NoopFastFix};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use remedy_shared::config::SupervisorConfig;
use remedy_shared::registry::WorkerRegistryProvider;
use remedy_shared::types::routing::{Channel, ReasonCode, RoutingDecision};
use remedy_shared::types::worker::{WorkerHandle, WorkerKind, WorkerOutcome, WorkerState};
use remedy_shared::{RemedyError, RemedyResult};

/// Lifecycle event emitted on every handle state transition
#[derive(Debug, Clone)]
pub struct WorkerEvent {
    pub worker_id: Uuid,
    pub kind: WorkerKind,
    pub batch_id: Uuid,
    pub task_id: Uuid,
    pub correlation_id: Uuid,
    pub from: Option<WorkerState>,
    pub to: WorkerState,
    pub at: DateTime<Utc>,
    pub outcome: Option<WorkerOutcome>,
    pub reason: ReasonCode,
    pub requires_sign_off: bool,
}

/// Commands the sweep and cancel paths send to a heavy worker's watcher
#[derive(Debug)]
pub(crate) enum HeavyCommand {
    /// Begin the soft-stop → grace → hard-kill sequence
    SoftStop,
}

/// State shared between the supervisor facade and its worker tasks
#[derive(Debug)]
pub(crate) struct SupervisorInner {
    pub(crate) config: SupervisorConfig,
    pub(crate) handles: RwLock<HashMap<Uuid, WorkerHandle>>,
    pub(crate) event_tx: mpsc::UnboundedSender<WorkerEvent>,
    pub(crate) fast_slots: Arc<Semaphore>,
    pub(crate) heavy_slots: Arc<Semaphore>,
    pub(crate) fast_cancels: Mutex<HashMap<Uuid, CancellationToken>>,
    pub(crate) heavy_controls: Mutex<HashMap<Uuid, mpsc::UnboundedSender<HeavyCommand>>>,
    pub(crate) registry: Arc<WorkerRegistryProvider>,
    pub(crate) root_token: CancellationToken,
    pub(crate) fixer: Arc<dyn FastFix>,
}

impl SupervisorInner {
    /// Apply a state transition and emit its lifecycle event.
    ///
    /// Terminal states are absorbing: a transition on an already-terminal
    /// handle is a no-op and returns `false`. This is what keeps the exit
    /// of a soft-stopped process from overwriting `timed-out`/`cancelled`.
    pub(crate) fn transition(
        &self,
        worker_id: Uuid,
        to: WorkerState,
        outcome: Option<WorkerOutcome>,
    ) -> bool {
        let event = {
            let Ok(mut handles) = self.handles.write() else {
                warn!(worker_id = %worker_id, "Handle table lock poisoned during transition");
                return false;
            };
            let Some(handle) = handles.get_mut(&worker_id) else {
                return false;
            };
            if handle.state.is_terminal() {
                return false;
            }

            let from = handle.state;
            handle.state = to;
            if to.is_terminal() {
                handle.finished_at = Some(Utc::now());
                handle.outcome = outcome.clone();
            }

            WorkerEvent {
                worker_id,
                kind: handle.kind,
                batch_id: handle.batch.batch_id,
                task_id: handle.batch.task_id,
                correlation_id: handle.batch.correlation_id,
                from: Some(from),
                to,
                at: Utc::now(),
                outcome,
                reason: handle.reason,
                requires_sign_off: handle.requires_sign_off,
            }
        };

        debug!(
            worker_id = %worker_id,
            from = ?event.from,
            to = %event.to,
            "Worker state transition"
        );
        let _ = self.event_tx.send(event);
        true
    }

    /// Record liveness for an in-process worker and mirror it to the
    /// observability registry
    pub(crate) async fn touch_heartbeat(&self, worker_id: Uuid) {
        let now = Utc::now();
        if let Ok(mut handles) = self.handles.write() {
            if let Some(handle) = handles.get_mut(&worker_id) {
                handle.last_heartbeat_at = now;
            }
        }
        if let Err(e) = self.registry.heartbeat(worker_id, now).await {
            warn!(worker_id = %worker_id, error = %e, "Registry heartbeat failed");
        }
    }

    /// Note when the soft-stop signal went out (sweep timing diagnostics)
    pub(crate) fn mark_soft_stopped(&self, worker_id: Uuid) {
        if let Ok(mut handles) = self.handles.write() {
            if let Some(handle) = handles.get_mut(&worker_id) {
                handle.soft_stopped_at = Some(Utc::now());
            }
        }
    }

    /// Drop per-worker control state and unregister from the registry
    pub(crate) async fn cleanup_worker(&self, worker_id: Uuid) {
        if let Ok(mut cancels) = self.fast_cancels.lock() {
            cancels.remove(&worker_id);
        }
        if let Ok(mut controls) = self.heavy_controls.lock() {
            controls.remove(&worker_id);
        }
        if let Err(e) = self.registry.unregister(worker_id).await {
            warn!(worker_id = %worker_id, error = %e, "Registry unregister failed");
        }
    }
}

/// Supervisor facade the daemon owns
#[derive(Debug)]
pub struct WorkerSupervisor {
    inner: Arc<SupervisorInner>,
    event_rx: Mutex<mpsc::UnboundedReceiver<WorkerEvent>>,
    shutdown_started: AtomicBool,
}

impl WorkerSupervisor {
    pub fn new(
        config: SupervisorConfig,
        registry: Arc<WorkerRegistryProvider>,
        fixer: Arc<dyn FastFix>,
        root_token: CancellationToken,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SupervisorInner {
            fast_slots: Arc::new(Semaphore::new(config.fast_pool_size)),
            heavy_slots: Arc::new(Semaphore::new(config.heavy_pool_size)),
            config,
            handles: RwLock::new(HashMap::new()),
            event_tx,
            fast_cancels: Mutex::new(HashMap::new()),
            heavy_controls: Mutex::new(HashMap::new()),
            registry,
            root_token,
            fixer,
        });
        Self {
            inner,
            event_rx: Mutex::new(event_rx),
            shutdown_started: AtomicBool::new(false),
        }
    }

    /// Free slots in the fast pool (admission budget input)
    pub fn free_fast_slots(&self) -> usize {
        self.inner.fast_slots.available_permits()
    }

    /// Free slots in the heavy pool (admission budget input)
    pub fn free_heavy_slots(&self) -> usize {
        self.inner.heavy_slots.available_permits()
    }

    /// Dispatch a routed batch to its channel.
    ///
    /// Blocks cooperatively while the target pool is full and returns the
    /// new worker id once the work is admitted. HUMAN-channel decisions are
    /// not dispatchable; the daemon opens an escalation case instead.
    pub async fn dispatch(&self, decision: RoutingDecision) -> RemedyResult<Uuid> {
        if self.shutdown_started.load(Ordering::SeqCst) {
            return Err(RemedyError::SupervisorError(
                "supervisor is shutting down".to_string(),
            ));
        }

        match decision.channel {
            Channel::Fast => self.dispatch_fast(decision).await,
            Channel::Heavy => self.dispatch_heavy(decision).await,
            Channel::Human => Err(RemedyError::SupervisorError(
                "HUMAN channel is escalated, not dispatched".to_string(),
            )),
        }
    }

    async fn dispatch_fast(&self, decision: RoutingDecision) -> RemedyResult<Uuid> {
        let permit = tokio::select! {
            permit = self.inner.fast_slots.clone().acquire_owned() => permit
                .map_err(|_| RemedyError::SupervisorError("fast pool closed".to_string()))?,
            _ = self.inner.root_token.cancelled() => {
                return Err(RemedyError::SupervisorError(
                    "dispatch cancelled by shutdown".to_string(),
                ));
            }
        };

        let timeout = self.inner.config.timeout_for(WorkerKind::FastInproc);
        let handle = WorkerHandle::new(
            WorkerKind::FastInproc,
            decision.batch.clone(),
            decision.reason,
            decision.requires_sign_off,
            chrono_duration(timeout),
        );
        let worker_id = handle.worker_id;

        self.admit(handle).await?;

        let cancel = self.inner.root_token.child_token();
        if let Ok(mut cancels) = self.inner.fast_cancels.lock() {
            cancels.insert(worker_id, cancel.clone());
        }

        info!(
            worker_id = %worker_id,
            batch_id = %decision.batch.batch_id,
            reason = %decision.reason,
            "Dispatching fast worker"
        );
        tokio::spawn(fast::run_fast_worker(
            self.inner.clone(),
            worker_id,
            decision,
            cancel,
            permit,
        ));

        Ok(worker_id)
    }

    async fn dispatch_heavy(&self, decision: RoutingDecision) -> RemedyResult<Uuid> {
        let permit = tokio::select! {
            permit = self.inner.heavy_slots.clone().acquire_owned() => permit
                .map_err(|_| RemedyError::SupervisorError("heavy pool closed".to_string()))?,
            _ = self.inner.root_token.cancelled() => {
                return Err(RemedyError::SupervisorError(
                    "dispatch cancelled by shutdown".to_string(),
                ));
            }
        };

        let timeout = self.inner.config.timeout_for(WorkerKind::HeavySpawned);
        let mut handle = WorkerHandle::new(
            WorkerKind::HeavySpawned,
            decision.batch.clone(),
            decision.reason,
            decision.requires_sign_off,
            chrono_duration(timeout),
        );
        let worker_id = handle.worker_id;

        let heartbeat_path = self
            .inner
            .config
            .heartbeat_dir
            .join(format!("{worker_id}.hb"));
        let env = heavy::build_handoff_env(
            worker_id,
            self.inner.config.worker_mode,
            &decision.batch,
            &decision.retrieval,
            &heartbeat_path,
            handle.deadline,
        )?;
        handle.heartbeat_path = Some(heartbeat_path.clone());
        handle.env = Some(env.clone());

        // Spawn before admitting so a missing script surfaces as a dispatch
        // error with no handle left behind
        let child = heavy::spawn_child(&self.inner.config, &env).await?;
        handle.pid = child.id();

        self.admit(handle).await?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        if let Ok(mut controls) = self.inner.heavy_controls.lock() {
            controls.insert(worker_id, control_tx);
        }

        info!(
            worker_id = %worker_id,
            batch_id = %decision.batch.batch_id,
            pid = ?child.id(),
            reason = %decision.reason,
            "Dispatching heavy worker"
        );
        tokio::spawn(heavy::run_heavy_worker(
            self.inner.clone(),
            worker_id,
            child,
            control_rx,
            permit,
        ));

        Ok(worker_id)
    }

    /// Insert a starting handle, emit its first event, and register it with
    /// the observability registry
    async fn admit(&self, handle: WorkerHandle) -> RemedyResult<()> {
        let worker_id = handle.worker_id;
        let event = WorkerEvent {
            worker_id,
            kind: handle.kind,
            batch_id: handle.batch.batch_id,
            task_id: handle.batch.task_id,
            correlation_id: handle.batch.correlation_id,
            from: None,
            to: WorkerState::Starting,
            at: Utc::now(),
            outcome: None,
            reason: handle.reason,
            requires_sign_off: handle.requires_sign_off,
        };
        let metadata = json!({
            "kind": handle.kind.to_string(),
            "batch_id": handle.batch.batch_id,
            "task_id": handle.batch.task_id,
        });

        self.inner
            .handles
            .write()
            .map_err(|e| RemedyError::SupervisorError(format!("handle table poisoned: {e}")))?
            .insert(worker_id, handle);
        let _ = self.inner.event_tx.send(event);

        // Registry is observability-only: failures never block a dispatch
        if let Err(e) = self.inner.registry.register(worker_id, metadata).await {
            warn!(worker_id = %worker_id, error = %e, "Registry registration failed");
        }
        Ok(())
    }

    /// Drain pending lifecycle events without blocking
    pub fn poll_events(&self) -> Vec<WorkerEvent> {
        let Ok(mut rx) = self.event_rx.lock() else {
            return Vec::new();
        };
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Cancel a running worker: the handle transitions to `cancelled`
    /// immediately and the kind-appropriate stop sequence runs behind it.
    pub async fn cancel(&self, worker_id: Uuid) -> RemedyResult<()> {
        let kind = {
            let handles = self.inner.handles.read().map_err(|e| {
                RemedyError::SupervisorError(format!("handle table poisoned: {e}"))
            })?;
            let handle = handles.get(&worker_id).ok_or_else(|| {
                RemedyError::SupervisorError(format!("unknown worker {worker_id}"))
            })?;
            if handle.state.is_terminal() {
                return Ok(());
            }
            handle.kind
        };

        if !self.inner.transition(worker_id, WorkerState::Cancelled, None) {
            return Ok(());
        }
        self.inner.signal_stop(worker_id, kind);
        Ok(())
    }

    /// One liveness sweep: refresh spawned-worker heartbeats, time out
    /// deadline-passed handles with stale heartbeats, and drive the
    /// soft-stop sequence for the victims.
    pub async fn sweep_health(&self) {
        health::sweep(&self.inner).await;
    }

    /// Snapshot of all current handles for the observability surface
    pub fn handles_snapshot(&self) -> Vec<WorkerHandle> {
        let Ok(handles) = self.inner.handles.read() else {
            return Vec::new();
        };
        let mut snapshot: Vec<WorkerHandle> = handles.values().cloned().collect();
        snapshot.sort_by_key(|h| h.started_at);
        snapshot
    }

    /// Remove terminal handles older than the retention window from the
    /// table. Called by the daemon after it has drained their events.
    pub fn prune_terminal_handles(&self) {
        if let Ok(mut handles) = self.inner.handles.write() {
            handles.retain(|_, h| !h.state.is_terminal());
        }
    }

    /// Count of non-terminal handles for a pool
    pub fn active_count(&self, kind: WorkerKind) -> usize {
        self.inner
            .handles
            .read()
            .map(|handles| {
                handles
                    .values()
                    .filter(|h| h.kind == kind && !h.state.is_terminal())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Stop accepting work, cancel everything in flight, and wait for the
    /// pools to drain (bounded by the soft-stop grace plus a margin).
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Worker supervisor shutting down");

        self.inner.root_token.cancel();

        let victims: Vec<(Uuid, WorkerKind)> = {
            let Ok(handles) = self.inner.handles.read() else {
                return;
            };
            handles
                .values()
                .filter(|h| !h.state.is_terminal())
                .map(|h| (h.worker_id, h.kind))
                .collect()
        };

        for (worker_id, kind) in victims {
            if self.inner.transition(worker_id, WorkerState::Cancelled, None) {
                self.inner.signal_stop(worker_id, kind);
            }
        }

        let drain_deadline = tokio::time::Instant::now()
            + self.inner.config.soft_stop_grace()
            + Duration::from_secs(2);
        loop {
            let active = self.active_count(WorkerKind::FastInproc)
                + self.active_count(WorkerKind::HeavySpawned);
            let all_slots_free = self.free_fast_slots() == self.inner.config.fast_pool_size
                && self.free_heavy_slots() == self.inner.config.heavy_pool_size;
            if active == 0 && all_slots_free {
                break;
            }
            if tokio::time::Instant::now() >= drain_deadline {
                warn!(active = active, "Shutdown drain deadline reached with workers still active");
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        info!("Worker supervisor shutdown complete");
    }
}

/// Convert a std duration to chrono, saturating instead of failing
fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::MAX)
}
