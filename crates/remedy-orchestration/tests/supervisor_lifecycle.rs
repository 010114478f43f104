//! # Worker Supervisor Lifecycle Tests
//!
//! Drives the supervisor against real spawned `/bin/sh` workers: the
//! environment handoff, exit-code mapping, timeout → soft-stop →
//! hard-kill sequencing, heartbeat-file liveness, cancellation, and pool
//! admission behavior.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use remedy_orchestration::supervisor::{FastFix, NoopFastFix, WorkerEvent, WorkerSupervisor};
use remedy_shared::config::SupervisorConfig;
use remedy_shared::registry::WorkerRegistryProvider;
use remedy_shared::types::batch::{Batch, BatchStrategy};
use remedy_shared::types::retrieval::RetrievalContext;
use remedy_shared::types::routing::{Channel, ReasonCode, RoutingDecision, WorkerMode};
use remedy_shared::types::score::Score;
use remedy_shared::types::violation::{Violation, ViolationKind};
use remedy_shared::types::worker::{WorkerKind, WorkerOutcome, WorkerState};

/// A fixer that runs until cancelled
#[derive(Debug)]
struct SlowFix;

#[async_trait]
impl FastFix for SlowFix {
    async fn apply(
        &self,
        _batch: &Batch,
        _retrieval: &RetrievalContext,
        cancel: &CancellationToken,
    ) -> WorkerOutcome {
        tokio::select! {
            _ = cancel.cancelled() => WorkerOutcome::RetryableFailure {
                reason: "cancelled".to_string(),
            },
            _ = tokio::time::sleep(Duration::from_secs(30)) => WorkerOutcome::Completed,
        }
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body)?;
    let mut perms = std::fs::metadata(&path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms)?;
    Ok(path)
}

fn config_for(dir: &Path, script: PathBuf) -> SupervisorConfig {
    SupervisorConfig {
        fast_pool_size: 1,
        heavy_pool_size: 2,
        heavy_worker_startup_script: script,
        heartbeat_dir: dir.join("heartbeats"),
        soft_stop_grace_s: 2,
        ..SupervisorConfig::default()
    }
}

fn supervisor_with(config: SupervisorConfig, fixer: Arc<dyn FastFix>) -> WorkerSupervisor {
    WorkerSupervisor::new(
        config,
        Arc::new(WorkerRegistryProvider::new_in_memory()),
        fixer,
        CancellationToken::new(),
    )
}

fn test_batch() -> Batch {
    Batch::new(
        Uuid::now_v7(),
        Uuid::now_v7(),
        BatchStrategy::Mixed,
        vec![Violation::new("v1", ViolationKind::ConfigMigration, "app/settings.py", 7)],
    )
}

fn decision_for(channel: Channel, batch: Batch) -> RoutingDecision {
    RoutingDecision {
        channel,
        reason: ReasonCode::HighComplexity,
        requires_sign_off: false,
        mode: WorkerMode::Headless,
        score: Score {
            total: 0.75,
            file_count_score: 0.0,
            kind_score: 0.6,
            dependency_score: 0.0,
            churn_score: 0.0,
            kind_weight: 0.6,
            scorer_version: "v1".to_string(),
            coerced: false,
        },
        retrieval: RetrievalContext::empty(),
        batch,
    }
}

/// Poll events (sweeping along the way) until the worker reaches a terminal
/// state
async fn wait_for_terminal(
    supervisor: &WorkerSupervisor,
    worker_id: Uuid,
    collected: &mut Vec<WorkerEvent>,
) -> WorkerEvent {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        supervisor.sweep_health().await;
        collected.extend(supervisor.poll_events());
        if let Some(event) = collected
            .iter()
            .find(|e| e.worker_id == worker_id && e.to.is_terminal())
        {
            return event.clone();
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for worker {worker_id} to finish"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn test_heavy_worker_env_handoff_and_success() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // The child proves it received the handoff by writing the variables
    // next to its heartbeat path
    let script = write_script(
        dir.path(),
        "worker.sh",
        "#!/bin/sh\n\
         printf '%s' \"$QA_TASK_JSON\" > \"$QA_HEARTBEAT_PATH.task\"\n\
         printf '%s' \"$QA_RAG_JSON\" > \"$QA_HEARTBEAT_PATH.rag\"\n\
         printf '%s' \"$QA_WORKER_ID\" > \"$QA_HEARTBEAT_PATH.worker\"\n\
         printf '%s' \"$QA_MODE\" > \"$QA_HEARTBEAT_PATH.mode\"\n\
         exit 0\n",
    )?;
    let config = config_for(dir.path(), script);
    let heartbeat_dir = config.heartbeat_dir.clone();
    let supervisor = supervisor_with(config, Arc::new(NoopFastFix::new()));

    let batch = test_batch();
    let batch_id = batch.batch_id;
    let worker_id = supervisor
        .dispatch(decision_for(Channel::Heavy, batch))
        .await?;

    let mut events = Vec::new();
    let terminal = wait_for_terminal(&supervisor, worker_id, &mut events).await;
    assert_eq!(terminal.to, WorkerState::Completed);
    assert_eq!(terminal.outcome, Some(WorkerOutcome::Completed));

    // Lifecycle order: starting → running → completed
    let states: Vec<WorkerState> = events
        .iter()
        .filter(|e| e.worker_id == worker_id)
        .map(|e| e.to)
        .collect();
    assert_eq!(
        states,
        vec![WorkerState::Starting, WorkerState::Running, WorkerState::Completed]
    );

    // The handoff the child observed round-trips to the dispatched batch
    let hb = heartbeat_dir.join(format!("{worker_id}.hb"));
    let task_json = std::fs::read_to_string(format!("{}.task", hb.display()))?;
    let received: Batch = serde_json::from_str(&task_json)?;
    assert_eq!(received.batch_id, batch_id);
    assert_eq!(received.violations.len(), 1);

    let rag_json = std::fs::read_to_string(format!("{}.rag", hb.display()))?;
    assert_eq!(rag_json, "[]");

    let reported_worker = std::fs::read_to_string(format!("{}.worker", hb.display()))?;
    assert_eq!(reported_worker, worker_id.to_string());

    let mode = std::fs::read_to_string(format!("{}.mode", hb.display()))?;
    assert_eq!(mode, "headless");

    // The slot freed once the worker finished
    assert_eq!(supervisor.free_heavy_slots(), 2);
    Ok(())
}

#[tokio::test]
async fn test_heavy_exit_code_one_is_retryable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "worker.sh", "#!/bin/sh\nexit 1\n")?;
    let supervisor = supervisor_with(config_for(dir.path(), script), Arc::new(NoopFastFix::new()));

    let worker_id = supervisor
        .dispatch(decision_for(Channel::Heavy, test_batch()))
        .await?;

    let mut events = Vec::new();
    let terminal = wait_for_terminal(&supervisor, worker_id, &mut events).await;
    assert_eq!(terminal.to, WorkerState::Failed);
    assert!(matches!(
        terminal.outcome,
        Some(WorkerOutcome::RetryableFailure { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_heavy_exit_code_two_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "worker.sh", "#!/bin/sh\nexit 2\n")?;
    let supervisor = supervisor_with(config_for(dir.path(), script), Arc::new(NoopFastFix::new()));

    let worker_id = supervisor
        .dispatch(decision_for(Channel::Heavy, test_batch()))
        .await?;

    let mut events = Vec::new();
    let terminal = wait_for_terminal(&supervisor, worker_id, &mut events).await;
    assert_eq!(terminal.to, WorkerState::Failed);
    assert!(matches!(
        terminal.outcome,
        Some(WorkerOutcome::FatalFailure { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_heavy_timeout_soft_stops_silent_worker() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // Never heartbeats, never exits on its own; sh honors SIGTERM
    let script = write_script(dir.path(), "worker.sh", "#!/bin/sh\nsleep 30\n")?;
    let mut config = config_for(dir.path(), script);
    config.heavy_timeout_s = 1;
    config.heartbeat_stale_s = 0;
    let supervisor = supervisor_with(config, Arc::new(NoopFastFix::new()));

    let worker_id = supervisor
        .dispatch(decision_for(Channel::Heavy, test_batch()))
        .await?;

    let mut events = Vec::new();
    let terminal = wait_for_terminal(&supervisor, worker_id, &mut events).await;
    assert_eq!(terminal.to, WorkerState::TimedOut);

    // Timeout lower bound: the transition never fires before the deadline
    let handle = supervisor
        .handles_snapshot()
        .into_iter()
        .find(|h| h.worker_id == worker_id)
        .context("timed-out handle missing from snapshot")?;
    let elapsed = handle.finished_at.context("no finish time")? - handle.started_at;
    assert!(elapsed >= chrono::Duration::seconds(1));
    assert!(handle.soft_stopped_at.is_some());

    // Process reaped, slot back
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while supervisor.free_heavy_slots() != 2 {
        assert!(tokio::time::Instant::now() < deadline, "slot never freed");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

#[tokio::test]
async fn test_heavy_hard_kill_after_grace_when_term_ignored() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // Ignores SIGTERM; only SIGKILL can take it down
    let script = write_script(
        dir.path(),
        "worker.sh",
        "#!/bin/sh\ntrap '' TERM\nwhile :; do sleep 1; done\n",
    )?;
    let mut config = config_for(dir.path(), script);
    config.heavy_timeout_s = 1;
    config.heartbeat_stale_s = 0;
    config.soft_stop_grace_s = 1;
    let supervisor = supervisor_with(config, Arc::new(NoopFastFix::new()));

    let worker_id = supervisor
        .dispatch(decision_for(Channel::Heavy, test_batch()))
        .await?;

    let mut events = Vec::new();
    let terminal = wait_for_terminal(&supervisor, worker_id, &mut events).await;
    assert_eq!(terminal.to, WorkerState::TimedOut);

    // Hard kill lands after the grace period and the slot comes back
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while supervisor.free_heavy_slots() != 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "hard kill never reaped the worker"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

#[tokio::test]
async fn test_heartbeat_file_keeps_slow_worker_alive() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // Heartbeats twice a second while working
    let script = write_script(
        dir.path(),
        "worker.sh",
        "#!/bin/sh\nwhile :; do touch \"$QA_HEARTBEAT_PATH\"; sleep 0.2; done\n",
    )?;
    let mut config = config_for(dir.path(), script);
    config.heavy_timeout_s = 1;
    config.heartbeat_stale_s = 30;
    let supervisor = supervisor_with(config, Arc::new(NoopFastFix::new()));

    let worker_id = supervisor
        .dispatch(decision_for(Channel::Heavy, test_batch()))
        .await?;

    // Past the deadline but heartbeating: sweeps must not time it out
    tokio::time::sleep(Duration::from_millis(1500)).await;
    supervisor.sweep_health().await;
    supervisor.sweep_health().await;

    let handle = supervisor
        .handles_snapshot()
        .into_iter()
        .find(|h| h.worker_id == worker_id)
        .context("running handle missing from snapshot")?;
    assert_eq!(handle.state, WorkerState::Running);

    supervisor.cancel(worker_id).await?;
    let mut events = Vec::new();
    let terminal = wait_for_terminal(&supervisor, worker_id, &mut events).await;
    assert_eq!(terminal.to, WorkerState::Cancelled);
    Ok(())
}

#[tokio::test]
async fn test_cancel_heavy_worker() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "worker.sh", "#!/bin/sh\nsleep 30\n")?;
    let supervisor = supervisor_with(config_for(dir.path(), script), Arc::new(NoopFastFix::new()));

    let worker_id = supervisor
        .dispatch(decision_for(Channel::Heavy, test_batch()))
        .await?;

    // Give the child a moment to start, then cancel
    tokio::time::sleep(Duration::from_millis(200)).await;
    supervisor.cancel(worker_id).await?;

    let mut events = Vec::new();
    let terminal = wait_for_terminal(&supervisor, worker_id, &mut events).await;
    assert_eq!(terminal.to, WorkerState::Cancelled);

    // Cancelling an already-terminal worker is a no-op
    supervisor.cancel(worker_id).await?;
    Ok(())
}

#[tokio::test]
async fn test_fast_pool_blocks_cooperatively_until_slot_frees() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "worker.sh", "#!/bin/sh\nexit 0\n")?;
    let supervisor = Arc::new(supervisor_with(
        config_for(dir.path(), script),
        Arc::new(SlowFix),
    ));

    let first = supervisor
        .dispatch(decision_for(Channel::Fast, test_batch()))
        .await?;
    assert_eq!(supervisor.free_fast_slots(), 0);
    assert_eq!(supervisor.active_count(WorkerKind::FastInproc), 1);

    // Second dispatch must block while the pool is full
    let blocked_supervisor = supervisor.clone();
    let second = tokio::spawn(async move {
        blocked_supervisor
            .dispatch(decision_for(Channel::Fast, test_batch()))
            .await
    });
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!second.is_finished(), "dispatch admitted past the pool cap");

    // Freeing the slot unblocks the waiter
    supervisor.cancel(first).await?;
    let second_id = tokio::time::timeout(Duration::from_secs(5), second)
        .await
        .expect("blocked dispatch never resumed")??;

    supervisor.cancel(second_id).await?;
    let mut events = Vec::new();
    wait_for_terminal(&supervisor, second_id, &mut events).await;
    Ok(())
}

#[tokio::test]
async fn test_human_channel_is_not_dispatchable() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "worker.sh", "#!/bin/sh\nexit 0\n")?;
    let supervisor = supervisor_with(config_for(dir.path(), script), Arc::new(NoopFastFix::new()));

    let result = supervisor
        .dispatch(decision_for(Channel::Human, test_batch()))
        .await;
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn test_missing_startup_script_fails_dispatch_cleanly() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_for(dir.path(), dir.path().join("does-not-exist.sh"));
    let supervisor = supervisor_with(config, Arc::new(NoopFastFix::new()));

    let result = supervisor
        .dispatch(decision_for(Channel::Heavy, test_batch()))
        .await;
    assert!(result.is_err());
    // The permit was returned and no handle was left behind
    assert_eq!(supervisor.free_heavy_slots(), 2);
    assert!(supervisor.handles_snapshot().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_and_rejects_new_work() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(dir.path(), "worker.sh", "#!/bin/sh\nsleep 30\n")?;
    let mut config = config_for(dir.path(), script);
    config.soft_stop_grace_s = 1;
    let supervisor = supervisor_with(config, Arc::new(SlowFix));

    let fast_id = supervisor
        .dispatch(decision_for(Channel::Fast, test_batch()))
        .await?;
    let heavy_id = supervisor
        .dispatch(decision_for(Channel::Heavy, test_batch()))
        .await?;

    supervisor.shutdown().await;
    // Idempotent
    supervisor.shutdown().await;

    let events = supervisor.poll_events();
    let terminal_of = |id: Uuid| {
        events
            .iter()
            .filter(|e| e.worker_id == id)
            .map(|e| e.to)
            .find(WorkerState::is_terminal)
    };
    assert_eq!(terminal_of(fast_id), Some(WorkerState::Cancelled));
    assert_eq!(terminal_of(heavy_id), Some(WorkerState::Cancelled));

    let result = supervisor
        .dispatch(decision_for(Channel::Fast, test_batch()))
        .await;
    assert!(result.is_err(), "dispatch after shutdown must fail");
    Ok(())
}
