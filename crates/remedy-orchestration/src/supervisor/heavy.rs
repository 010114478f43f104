//! # Heavy Worker Channel
//!
//! Spawned reasoning workers. The orchestrator communicates the task to the
//! child only through environment variables and observes it only through
//! its exit status and an optional heartbeat file; it never reaches into
//! the child. Exit codes are the outcome contract: 0 completed, 1
//! failed-retryable, 2 failed-fatal; a signal-induced exit resolves to
//! whatever terminal state the supervisor already set when it sent the
//! signal.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tracing::{debug, warn};
use uuid::Uuid;

use remedy_shared::config::SupervisorConfig;
use remedy_shared::types::batch::Batch;
use remedy_shared::types::retrieval::RetrievalContext;
use remedy_shared::types::routing::WorkerMode;
use remedy_shared::types::worker::{WorkerOutcome, WorkerState};
use remedy_shared::{RemedyError, RemedyResult};

use super::{HeavyCommand, SupervisorInner};

/// Build the bit-exact environment handoff for a spawned worker
pub(crate) fn build_handoff_env(
    worker_id: Uuid,
    mode: WorkerMode,
    batch: &Batch,
    retrieval: &RetrievalContext,
    heartbeat_path: &Path,
    deadline: DateTime<Utc>,
) -> RemedyResult<BTreeMap<String, String>> {
    let task_json = serde_json::to_string(batch).map_err(|e| {
        RemedyError::SupervisorError(format!("batch {} not serializable: {e}", batch.batch_id))
    })?;
    let rag_json = serde_json::to_string(retrieval).map_err(|e| {
        RemedyError::SupervisorError(format!("retrieval context not serializable: {e}"))
    })?;

    let mut env = BTreeMap::new();
    env.insert("QA_WORKER_ID".to_string(), worker_id.to_string());
    env.insert("QA_MODE".to_string(), mode.to_string());
    env.insert("QA_TASK_JSON".to_string(), task_json);
    env.insert("QA_RAG_JSON".to_string(), rag_json);
    env.insert(
        "QA_CORRELATION_ID".to_string(),
        batch.correlation_id.to_string(),
    );
    env.insert(
        "QA_HEARTBEAT_PATH".to_string(),
        heartbeat_path.to_string_lossy().into_owned(),
    );
    env.insert(
        "QA_DEADLINE_EPOCH_S".to_string(),
        deadline.timestamp().to_string(),
    );
    Ok(env)
}

/// Spawn the configured startup script with the handoff environment
pub(crate) async fn spawn_child(
    config: &SupervisorConfig,
    env: &BTreeMap<String, String>,
) -> RemedyResult<Child> {
    if let Err(e) = tokio::fs::create_dir_all(&config.heartbeat_dir).await {
        warn!(
            heartbeat_dir = %config.heartbeat_dir.display(),
            error = %e,
            "Failed to create heartbeat directory"
        );
    }

    Command::new(&config.heavy_worker_startup_script)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            RemedyError::SupervisorError(format!(
                "failed to spawn heavy worker script {}: {e}",
                config.heavy_worker_startup_script.display()
            ))
        })
}

/// Body of one heavy worker's watcher task. Owns the child process and the
/// pool permit; executes the soft-stop → grace → hard-kill sequence when
/// commanded.
pub(crate) async fn run_heavy_worker(
    inner: Arc<SupervisorInner>,
    worker_id: Uuid,
    mut child: Child,
    mut control_rx: mpsc::UnboundedReceiver<HeavyCommand>,
    permit: OwnedSemaphorePermit,
) {
    inner.transition(worker_id, WorkerState::Running, None);

    tokio::select! {
        status = child.wait() => {
            apply_exit(&inner, worker_id, status);
        }
        cmd = control_rx.recv() => {
            match cmd {
                Some(HeavyCommand::SoftStop) => {
                    soft_then_hard_stop(&inner, worker_id, &mut child).await;
                }
                // Control sender gone; nothing left to command, so just
                // wait for the child to exit
                None => {
                    let status = child.wait().await;
                    apply_exit(&inner, worker_id, status);
                }
            }
        }
    }

    cleanup_heartbeat_file(&inner, worker_id).await;
    inner.cleanup_worker(worker_id).await;
    drop(permit);
}

/// SIGTERM, wait out the grace period, SIGKILL if the child is still there
async fn soft_then_hard_stop(inner: &Arc<SupervisorInner>, worker_id: Uuid, child: &mut Child) {
    if let Some(pid) = child.id() {
        debug!(worker_id = %worker_id, pid = pid, "Sending soft-stop signal");
        send_sigterm(pid);
    }
    inner.mark_soft_stopped(worker_id);

    let grace = inner.config.soft_stop_grace();
    tokio::select! {
        status = child.wait() => {
            apply_exit(inner, worker_id, status);
        }
        _ = tokio::time::sleep(grace) => {
            warn!(
                worker_id = %worker_id,
                grace_s = grace.as_secs(),
                "Heavy worker ignored soft-stop, hard-killing"
            );
            if let Err(e) = child.start_kill() {
                warn!(worker_id = %worker_id, error = %e, "Hard kill failed");
            }
            let status = child.wait().await;
            apply_exit(inner, worker_id, status);
        }
    }
}

/// Map an exit status onto the handle. No-op when the supervisor already
/// put the handle in a terminal state (timed-out, cancelled).
fn apply_exit(
    inner: &Arc<SupervisorInner>,
    worker_id: Uuid,
    status: std::io::Result<std::process::ExitStatus>,
) {
    let (state, outcome) = match status {
        Ok(status) => match status.code() {
            Some(0) => (WorkerState::Completed, WorkerOutcome::Completed),
            Some(1) => (
                WorkerState::Failed,
                WorkerOutcome::RetryableFailure {
                    reason: "worker exited with code 1".to_string(),
                },
            ),
            Some(2) => (
                WorkerState::Failed,
                WorkerOutcome::FatalFailure {
                    reason: "worker exited with code 2".to_string(),
                },
            ),
            Some(code) => (
                WorkerState::Failed,
                WorkerOutcome::FatalFailure {
                    reason: format!("worker exited with unexpected code {code}"),
                },
            ),
            // Signal-induced exit: when the supervisor sent the signal the
            // handle is already timed-out/cancelled and this is a no-op;
            // an external signal reads as transient
            None => (
                WorkerState::Failed,
                WorkerOutcome::RetryableFailure {
                    reason: "worker terminated by signal".to_string(),
                },
            ),
        },
        Err(e) => (
            WorkerState::Failed,
            WorkerOutcome::FatalFailure {
                reason: format!("failed to reap worker process: {e}"),
            },
        ),
    };

    inner.transition(worker_id, state, Some(outcome));
}

/// Remove the worker's heartbeat file; stale files must not feed later
/// sweeps
async fn cleanup_heartbeat_file(inner: &Arc<SupervisorInner>, worker_id: Uuid) {
    let path = {
        let Ok(handles) = inner.handles.read() else {
            return;
        };
        handles
            .get(&worker_id)
            .and_then(|h| h.heartbeat_path.clone())
    };
    if let Some(path) = path {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(worker_id = %worker_id, error = %e, "Heartbeat file cleanup failed");
            }
        }
    }
}

/// Soft-stop leg of the stop sequence
fn send_sigterm(pid: u32) {
    // SAFETY: kill(2) with a pid we spawned and a constant signal number
    // touches no memory; a failed send is reported via errno and is fine to
    // ignore because the hard-kill leg follows.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}
