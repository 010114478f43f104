//! # Observability Snapshot
//!
//! Read-only view over daemon state for the terminal dashboard. The
//! dashboard never mutates core state; everything here is a copy taken at
//! snapshot time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use remedy_shared::types::worker::{WorkerHandle, WorkerKind, WorkerState};

use crate::escalation::EscalationStats;
use crate::pattern_index::IndexStats;

/// One worker row in the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub worker_id: Uuid,
    pub kind: WorkerKind,
    pub state: WorkerState,
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_s: i64,
    pub requires_sign_off: bool,
}

impl From<&WorkerHandle> for WorkerSnapshot {
    fn from(handle: &WorkerHandle) -> Self {
        Self {
            worker_id: handle.worker_id,
            kind: handle.kind,
            state: handle.state,
            batch_id: handle.batch.batch_id,
            started_at: handle.started_at,
            elapsed_s: handle.elapsed().num_seconds(),
            requires_sign_off: handle.requires_sign_off,
        }
    }
}

/// Aggregate counters accumulated since daemon start
#[derive(Debug, Clone, Default, Serialize)]
pub struct CounterSnapshot {
    pub tasks_processed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub fast_dispatched: u64,
    pub heavy_dispatched: u64,
    pub human_escalated: u64,
}

impl CounterSnapshot {
    /// Completed over terminally-disposed tasks, in [0, 1]
    pub fn success_rate(&self) -> f64 {
        let settled = self.tasks_completed + self.tasks_failed;
        if settled == 0 {
            return 0.0;
        }
        self.tasks_completed as f64 / settled as f64
    }
}

/// Full dashboard snapshot
#[derive(Debug, Clone, Serialize)]
pub struct DaemonSnapshot {
    pub workers: Vec<WorkerSnapshot>,
    pub counters: CounterSnapshot,
    pub escalations: EscalationStats,
    pub pattern_index: IndexStats,
    pub taken_at: DateTime<Utc>,
}
