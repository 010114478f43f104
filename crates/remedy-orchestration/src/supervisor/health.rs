//! # Health Sweep
//!
//! Periodic liveness pass over all worker handles: refresh spawned-worker
//! heartbeats from their heartbeat files, then transition every handle that
//! is past its deadline with a stale heartbeat to `timed-out` and start the
//! kind-appropriate stop sequence.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use remedy_shared::types::worker::{WorkerKind, WorkerState};

use super::{HeavyCommand, SupervisorInner};

/// One sweep pass
pub(crate) async fn sweep(inner: &Arc<SupervisorInner>) {
    refresh_file_heartbeats(inner).await;
    time_out_stale_workers(inner);
}

/// Pull heartbeat-file mtimes into the handle table. Read errors are
/// transient: logged and retried on the next sweep.
async fn refresh_file_heartbeats(inner: &Arc<SupervisorInner>) {
    let watched: Vec<(Uuid, PathBuf)> = {
        let Ok(handles) = inner.handles.read() else {
            return;
        };
        handles
            .values()
            .filter(|h| h.kind == WorkerKind::HeavySpawned && !h.state.is_terminal())
            .filter_map(|h| h.heartbeat_path.clone().map(|p| (h.worker_id, p)))
            .collect()
    };

    for (worker_id, path) in watched {
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => {
                let Ok(modified) = metadata.modified() else {
                    continue;
                };
                let touched: DateTime<Utc> = modified.into();
                if let Ok(mut handles) = inner.handles.write() {
                    if let Some(handle) = handles.get_mut(&worker_id) {
                        if touched > handle.last_heartbeat_at {
                            handle.last_heartbeat_at = touched;
                        }
                    }
                }
            }
            // The child may never touch the file; absence is not an error
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    worker_id = %worker_id,
                    heartbeat_path = %path.display(),
                    error = %e,
                    "Heartbeat file read failed, will retry next sweep"
                );
            }
        }
    }
}

/// Transition deadline-passed, heartbeat-stale handles to `timed-out` and
/// signal their workers to stop
fn time_out_stale_workers(inner: &Arc<SupervisorInner>) {
    let now = Utc::now();
    let stale = chrono::Duration::from_std(inner.config.heartbeat_stale())
        .unwrap_or_else(|_| chrono::Duration::MAX);

    let victims: Vec<(Uuid, WorkerKind)> = {
        let Ok(handles) = inner.handles.read() else {
            return;
        };
        handles
            .values()
            .filter(|h| {
                !h.state.is_terminal() && h.past_deadline(now) && h.heartbeat_stale(now, stale)
            })
            .map(|h| (h.worker_id, h.kind))
            .collect()
    };

    for (worker_id, kind) in victims {
        if !inner.transition(worker_id, WorkerState::TimedOut, None) {
            continue;
        }
        warn!(worker_id = %worker_id, kind = %kind, "Worker timed out");
        inner.signal_stop(worker_id, kind);
    }
}

impl SupervisorInner {
    /// Kind-appropriate stop: cancel token for fast workers, soft-stop
    /// command for heavy workers
    pub(crate) fn signal_stop(&self, worker_id: Uuid, kind: WorkerKind) {
        match kind {
            WorkerKind::FastInproc => {
                if let Ok(cancels) = self.fast_cancels.lock() {
                    if let Some(token) = cancels.get(&worker_id) {
                        token.cancel();
                    }
                }
            }
            WorkerKind::HeavySpawned => {
                if let Ok(controls) = self.heavy_controls.lock() {
                    if let Some(tx) = controls.get(&worker_id) {
                        let _ = tx.send(HeavyCommand::SoftStop);
                    }
                }
            }
            WorkerKind::Human => {}
        }
    }
}
