//! # Worker Registry
//!
//! Observability-only view of dispatched workers for external tooling.
//! Never on the critical path: registration failures are logged and ignored
//! by callers.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RemedyError, RemedyResult};

/// Registration record for a dispatched worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: Uuid,
    pub metadata: serde_json::Value,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

/// In-memory worker registry
#[derive(Debug, Default)]
pub struct InMemoryWorkerRegistry {
    workers: Mutex<HashMap<Uuid, WorkerRegistration>>,
}

impl InMemoryWorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RemedyResult<std::sync::MutexGuard<'_, HashMap<Uuid, WorkerRegistration>>> {
        self.workers
            .lock()
            .map_err(|e| RemedyError::SupervisorError(format!("registry lock poisoned: {e}")))
    }

    pub fn register(&self, worker_id: Uuid, metadata: serde_json::Value) -> RemedyResult<()> {
        let now = Utc::now();
        self.lock()?.insert(
            worker_id,
            WorkerRegistration {
                worker_id,
                metadata,
                registered_at: now,
                last_heartbeat_at: now,
            },
        );
        Ok(())
    }

    /// Record a heartbeat. Unknown workers are ignored: the registry is
    /// observability-only and must not fail callers.
    pub fn heartbeat(&self, worker_id: Uuid, ts: DateTime<Utc>) -> RemedyResult<()> {
        if let Some(registration) = self.lock()?.get_mut(&worker_id) {
            registration.last_heartbeat_at = ts;
        }
        Ok(())
    }

    pub fn unregister(&self, worker_id: Uuid) -> RemedyResult<()> {
        self.lock()?.remove(&worker_id);
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn get(&self, worker_id: Uuid) -> Option<WorkerRegistration> {
        self.lock().ok()?.get(&worker_id).cloned()
    }
}

/// Enum-dispatched worker registry provider
#[derive(Debug)]
pub enum WorkerRegistryProvider {
    InMemory(InMemoryWorkerRegistry),
}

impl WorkerRegistryProvider {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryWorkerRegistry::new())
    }

    pub async fn register(&self, worker_id: Uuid, metadata: serde_json::Value) -> RemedyResult<()> {
        match self {
            Self::InMemory(r) => r.register(worker_id, metadata),
        }
    }

    pub async fn heartbeat(&self, worker_id: Uuid, ts: DateTime<Utc>) -> RemedyResult<()> {
        match self {
            Self::InMemory(r) => r.heartbeat(worker_id, ts),
        }
    }

    pub async fn unregister(&self, worker_id: Uuid) -> RemedyResult<()> {
        match self {
            Self::InMemory(r) => r.unregister(worker_id),
        }
    }

    pub fn as_in_memory(&self) -> Option<&InMemoryWorkerRegistry> {
        match self {
            Self::InMemory(r) => Some(r),
        }
    }
}
