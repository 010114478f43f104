//! # Event Bus
//!
//! Publish-only facade over the external event bus. The core publishes on
//! `qa.task.*`, `qa.escalation.*`, and `qa.monitor.*`; subscription is an
//! external concern. Providers are enum-dispatched (no trait objects) so a
//! transport-backed variant slots in beside the in-memory one without
//! changing call sites.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{RemedyError, RemedyResult};

/// Topic names the core publishes on
pub mod topics {
    pub const TASK_DISPATCHED: &str = "qa.task.dispatched";
    pub const TASK_COMPLETED: &str = "qa.task.completed";
    pub const TASK_FAILED: &str = "qa.task.failed";
    pub const TASK_RETRIED: &str = "qa.task.retried";

    pub const ESCALATION_OPENED: &str = "qa.escalation.opened";
    pub const ESCALATION_ASSIGNED: &str = "qa.escalation.assigned";
    pub const ESCALATION_RESOLVED: &str = "qa.escalation.resolved";

    pub const MONITOR_WORKER_LIFECYCLE: &str = "qa.monitor.worker_lifecycle";
    pub const MONITOR_INVARIANT_VIOLATION: &str = "qa.monitor.invariant_violation";
}

/// One event on the bus. Every payload carries the envelope fields required
/// by the bus contract plus a topic-specific body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub event_id: Uuid,
    pub ts: DateTime<Utc>,
    pub topic: String,
    pub correlation_id: Uuid,
    pub payload: serde_json::Value,
}

impl BusEvent {
    pub fn new(topic: &str, correlation_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            ts: Utc::now(),
            topic: topic.to_string(),
            correlation_id,
            payload,
        }
    }
}

/// Buffer size for the broadcast channel feeding live subscribers
const BROADCAST_BUFFER_SIZE: usize = 256;

/// In-memory event bus: retains full history for inspection and feeds a
/// broadcast channel for live consumers (the dashboard, tests).
#[derive(Debug)]
pub struct InMemoryEventBus {
    history: Mutex<Vec<BusEvent>>,
    tx: broadcast::Sender<BusEvent>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_BUFFER_SIZE);
        Self {
            history: Mutex::new(Vec::new()),
            tx,
        }
    }

    fn publish(&self, event: BusEvent) -> RemedyResult<()> {
        self.history
            .lock()
            .map_err(|e| RemedyError::EventBusError(format!("history lock poisoned: {e}")))?
            .push(event.clone());
        // Nobody listening is fine; history is the durable record here
        let _ = self.tx.send(event);
        Ok(())
    }

    /// Snapshot of everything published so far
    pub fn history(&self) -> Vec<BusEvent> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Events whose topic starts with `prefix`, in publish order
    pub fn events_with_topic_prefix(&self, prefix: &str) -> Vec<BusEvent> {
        self.history()
            .into_iter()
            .filter(|e| e.topic.starts_with(prefix))
            .collect()
    }

    /// Live subscription for consumers that want push delivery
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Enum-dispatched event bus provider
#[derive(Debug)]
pub enum EventBusProvider {
    InMemory(InMemoryEventBus),
}

impl EventBusProvider {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryEventBus::new())
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::InMemory(_) => "in_memory",
        }
    }

    /// Publish one event. May suspend on transport-backed providers.
    pub async fn publish(&self, event: BusEvent) -> RemedyResult<()> {
        match self {
            Self::InMemory(bus) => bus.publish(event),
        }
    }

    /// Access the in-memory backend, when that is what this provider wraps
    pub fn as_in_memory(&self) -> Option<&InMemoryEventBus> {
        match self {
            Self::InMemory(bus) => Some(bus),
        }
    }
}
