//! # Worker Handles
//!
//! The orchestrator's record of a dispatched unit of work. A handle is
//! created on dispatch, transitions through `starting → running → terminal`,
//! and is the single source of truth the health sweep and the observability
//! snapshot read from.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::batch::Batch;
use super::routing::ReasonCode;

/// Which execution channel a handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerKind {
    FastInproc,
    HeavySpawned,
    Human,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FastInproc => write!(f, "fast-inproc"),
            Self::HeavySpawned => write!(f, "heavy-spawned"),
            Self::Human => write!(f, "human"),
        }
    }
}

/// Lifecycle state of a worker handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerState {
    Starting,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl WorkerState {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed-out",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Terminal outcome reported by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum WorkerOutcome {
    Completed,
    /// The task can be republished and retried (exit code 1, or an
    /// in-process fixer reporting a transient failure)
    RetryableFailure { reason: String },
    /// The task must be escalated (exit code 2, or an in-process fixer
    /// reporting an unfixable condition)
    FatalFailure { reason: String },
}

/// Tracking record for one dispatched unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub worker_id: Uuid,
    pub kind: WorkerKind,
    pub batch: Batch,
    pub state: WorkerState,
    /// Routing reason that produced this dispatch
    pub reason: ReasonCode,
    /// Security-kind work: completion requires human sign-off
    pub requires_sign_off: bool,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Absolute deadline: `started_at` + per-kind timeout
    pub deadline: DateTime<Utc>,
    /// Heartbeat file a spawned worker may touch to indicate liveness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_path: Option<PathBuf>,
    /// OS process id for spawned workers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Environment blob handed to a spawned worker, kept for diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    /// Terminal outcome once the worker finishes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<WorkerOutcome>,
    /// When the supervisor sent the soft-stop signal, if it has
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_stopped_at: Option<DateTime<Utc>>,
}

impl WorkerHandle {
    /// Create a handle in `starting` state with its deadline precomputed
    pub fn new(
        kind: WorkerKind,
        batch: Batch,
        reason: ReasonCode,
        requires_sign_off: bool,
        timeout: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            worker_id: Uuid::new_v4(),
            kind,
            batch,
            state: WorkerState::Starting,
            reason,
            requires_sign_off,
            started_at: now,
            last_heartbeat_at: now,
            finished_at: None,
            deadline: now + timeout,
            heartbeat_path: None,
            pid: None,
            env: None,
            outcome: None,
            soft_stopped_at: None,
        }
    }

    /// Wall-clock time since dispatch
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }

    /// Whether the deadline has passed at `now`
    pub fn past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }

    /// Whether the last heartbeat is older than `stale` at `now`
    pub fn heartbeat_stale(&self, now: DateTime<Utc>, stale: chrono::Duration) -> bool {
        now - self.last_heartbeat_at >= stale
    }
}
