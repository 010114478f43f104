//! # Escalation Manager
//!
//! Owns the set of open human-review cases and their state machine. v1
//! keeps cases in memory; call sites only see `open/assign/resolve/list/
//! stats`, so a persistent backend can replace the table without touching
//! them. Every state transition publishes a `qa.escalation.*` event.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use remedy_shared::messaging::{topics, BusEvent, EventBusProvider};
use remedy_shared::types::batch::Batch;
use remedy_shared::types::escalation::{EscalationCase, EscalationState};
use remedy_shared::types::routing::ReasonCode;
use remedy_shared::{RemedyError, RemedyResult};

/// Case counts by state for the observability surface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EscalationStats {
    pub pending: usize,
    pub in_review: usize,
    pub resolved: usize,
    pub cannot_fix: usize,
    pub wont_fix: usize,
    pub cancelled: usize,
}

impl EscalationStats {
    pub fn total(&self) -> usize {
        self.pending + self.in_review + self.resolved + self.cannot_fix + self.wont_fix + self.cancelled
    }

    /// Cases still awaiting a human
    pub fn open(&self) -> usize {
        self.pending + self.in_review
    }
}

/// Filter for case listings
#[derive(Debug, Clone, Default)]
pub struct EscalationFilter {
    pub state: Option<EscalationState>,
}

/// In-memory escalation case table with bus-published transitions
#[derive(Debug)]
pub struct EscalationManager {
    cases: RwLock<HashMap<Uuid, EscalationCase>>,
    bus: Arc<EventBusProvider>,
}

impl EscalationManager {
    pub fn new(bus: Arc<EventBusProvider>) -> Self {
        Self {
            cases: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Open a case for a batch, optionally tied to the worker whose failure
    /// triggered it. Returns the new case id.
    pub async fn open(
        &self,
        batch: &Batch,
        worker_id: Option<Uuid>,
        reason: ReasonCode,
    ) -> RemedyResult<Uuid> {
        self.open_ref(
            batch.batch_id,
            batch.task_id,
            batch.correlation_id,
            worker_id,
            reason,
        )
        .await
    }

    /// Open a case from batch identifiers alone. Worker lifecycle events
    /// carry ids rather than the batch itself, so the failure paths come in
    /// through here.
    pub async fn open_ref(
        &self,
        batch_id: Uuid,
        task_id: Uuid,
        correlation_id: Uuid,
        worker_id: Option<Uuid>,
        reason: ReasonCode,
    ) -> RemedyResult<Uuid> {
        let case = EscalationCase::open(batch_id, task_id, correlation_id, worker_id, reason);
        let case_id = case.case_id;

        self.write()?.insert(case_id, case);

        info!(
            case_id = %case_id,
            batch_id = %batch_id,
            reason = %reason,
            "Escalation case opened"
        );
        self.publish_transition(
            topics::ESCALATION_OPENED,
            correlation_id,
            case_id,
            None,
            EscalationState::Pending,
            json!({"reason": reason.to_string(), "worker_id": worker_id}),
        )
        .await;

        Ok(case_id)
    }

    /// Assign a pending case to a reviewer (PENDING → IN_REVIEW)
    pub async fn assign(&self, case_id: Uuid, reviewer: impl Into<String>) -> RemedyResult<()> {
        let reviewer = reviewer.into();
        let correlation_id;
        let previous;
        {
            let mut cases = self.write()?;
            let case = cases.get_mut(&case_id).ok_or_else(|| {
                RemedyError::EscalationError(format!("unknown case {case_id}"))
            })?;

            previous = case.state;
            Self::check_transition(case, EscalationState::InReview)?;
            case.state = EscalationState::InReview;
            case.assigned_reviewer = Some(reviewer.clone());
            correlation_id = case.correlation_id;
        }

        info!(case_id = %case_id, reviewer = %reviewer, "Escalation case assigned");
        self.publish_transition(
            topics::ESCALATION_ASSIGNED,
            correlation_id,
            case_id,
            Some(previous),
            EscalationState::InReview,
            json!({"reviewer": reviewer}),
        )
        .await;
        Ok(())
    }

    /// Move a case to a terminal state.
    ///
    /// `terminal_state` must be one of RESOLVED / CANNOT_FIX / WONT_FIX /
    /// CANCELLED and reachable from the case's current state.
    pub async fn resolve(
        &self,
        case_id: Uuid,
        terminal_state: EscalationState,
        note: Option<String>,
    ) -> RemedyResult<()> {
        if !terminal_state.is_terminal() {
            return Err(RemedyError::EscalationError(format!(
                "resolve target {terminal_state} is not a terminal state"
            )));
        }

        let correlation_id;
        let previous;
        {
            let mut cases = self.write()?;
            let case = cases.get_mut(&case_id).ok_or_else(|| {
                RemedyError::EscalationError(format!("unknown case {case_id}"))
            })?;

            previous = case.state;
            Self::check_transition(case, terminal_state)?;
            case.state = terminal_state;
            case.resolved_at = Some(Utc::now());
            case.resolution_note = note.clone();
            correlation_id = case.correlation_id;
        }

        info!(
            case_id = %case_id,
            from = %previous,
            to = %terminal_state,
            "Escalation case resolved"
        );
        self.publish_transition(
            topics::ESCALATION_RESOLVED,
            correlation_id,
            case_id,
            Some(previous),
            terminal_state,
            json!({"note": note}),
        )
        .await;
        Ok(())
    }

    /// Cases matching the filter, ordered by open time
    pub fn list(&self, filter: &EscalationFilter) -> Vec<EscalationCase> {
        let Ok(cases) = self.cases.read() else {
            return Vec::new();
        };
        let mut matched: Vec<EscalationCase> = cases
            .values()
            .filter(|c| filter.state.map_or(true, |s| c.state == s))
            .cloned()
            .collect();
        matched.sort_by_key(|c| c.opened_at);
        matched
    }

    pub fn get(&self, case_id: Uuid) -> Option<EscalationCase> {
        self.cases.read().ok()?.get(&case_id).cloned()
    }

    /// Counts by state
    pub fn stats(&self) -> EscalationStats {
        let mut stats = EscalationStats::default();
        let Ok(cases) = self.cases.read() else {
            return stats;
        };
        for case in cases.values() {
            match case.state {
                EscalationState::Pending => stats.pending += 1,
                EscalationState::InReview => stats.in_review += 1,
                EscalationState::Resolved => stats.resolved += 1,
                EscalationState::CannotFix => stats.cannot_fix += 1,
                EscalationState::WontFix => stats.wont_fix += 1,
                EscalationState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    fn check_transition(case: &EscalationCase, next: EscalationState) -> RemedyResult<()> {
        if !case.state.can_transition_to(next) {
            return Err(RemedyError::EscalationError(format!(
                "case {} cannot transition {} → {next}",
                case.case_id, case.state
            )));
        }
        Ok(())
    }

    fn write(
        &self,
    ) -> RemedyResult<std::sync::RwLockWriteGuard<'_, HashMap<Uuid, EscalationCase>>> {
        self.cases
            .write()
            .map_err(|e| RemedyError::EscalationError(format!("case table lock poisoned: {e}")))
    }

    /// Publish a transition event. Publish failures are transient-external:
    /// logged at warn and never propagated into the state machine.
    async fn publish_transition(
        &self,
        topic: &str,
        correlation_id: Uuid,
        case_id: Uuid,
        previous: Option<EscalationState>,
        new_state: EscalationState,
        body: serde_json::Value,
    ) {
        let payload = json!({
            "case_id": case_id,
            "previous_state": previous.map(|s| s.to_string()),
            "new_state": new_state.to_string(),
            "body": body,
        });
        if let Err(e) = self
            .bus
            .publish(BusEvent::new(topic, correlation_id, payload))
            .await
        {
            warn!(case_id = %case_id, topic = topic, error = %e, "Failed to publish escalation event");
        }
    }
}
