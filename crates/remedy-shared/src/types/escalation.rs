//! # Escalation Cases
//!
//! Human-review cases with a bounded state machine. Transitions are
//! monotonic toward a terminal state; terminal states are absorbing. The
//! transition rules live on [`EscalationState`] so both the in-memory
//! manager and any future persistent backend enforce the same machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::routing::ReasonCode;

/// State of a human-review case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EscalationState {
    Pending,
    InReview,
    Resolved,
    CannotFix,
    WontFix,
    Cancelled,
}

impl EscalationState {
    /// Terminal states are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::CannotFix | Self::WontFix | Self::Cancelled
        )
    }

    /// Whether the state machine permits `self → next`
    pub fn can_transition_to(&self, next: EscalationState) -> bool {
        match self {
            Self::Pending => matches!(next, Self::InReview | Self::Cancelled),
            Self::InReview => matches!(
                next,
                Self::Resolved | Self::CannotFix | Self::WontFix | Self::Cancelled
            ),
            // Terminal states never leave
            _ => false,
        }
    }
}

impl fmt::Display for EscalationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InReview => "in-review",
            Self::Resolved => "resolved",
            Self::CannotFix => "cannot-fix",
            Self::WontFix => "wont-fix",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A single human-review case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationCase {
    pub case_id: Uuid,
    /// Batch that triggered the escalation
    pub batch_id: Uuid,
    pub task_id: Uuid,
    pub correlation_id: Uuid,
    /// Worker whose failure opened the case, when there was one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<Uuid>,
    pub reason: ReasonCode,
    pub state: EscalationState,
    pub opened_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_reviewer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
}

impl EscalationCase {
    /// Open a new case in `pending` state
    pub fn open(
        batch_id: Uuid,
        task_id: Uuid,
        correlation_id: Uuid,
        worker_id: Option<Uuid>,
        reason: ReasonCode,
    ) -> Self {
        Self {
            case_id: Uuid::now_v7(),
            batch_id,
            task_id,
            correlation_id,
            worker_id,
            reason,
            state: EscalationState::Pending,
            opened_at: Utc::now(),
            assigned_reviewer: None,
            resolved_at: None,
            resolution_note: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transitions() {
        assert!(EscalationState::Pending.can_transition_to(EscalationState::InReview));
        assert!(EscalationState::Pending.can_transition_to(EscalationState::Cancelled));
        assert!(!EscalationState::Pending.can_transition_to(EscalationState::Resolved));
        assert!(!EscalationState::Pending.can_transition_to(EscalationState::WontFix));
    }

    #[test]
    fn test_in_review_transitions() {
        for terminal in [
            EscalationState::Resolved,
            EscalationState::CannotFix,
            EscalationState::WontFix,
            EscalationState::Cancelled,
        ] {
            assert!(EscalationState::InReview.can_transition_to(terminal));
        }
        assert!(!EscalationState::InReview.can_transition_to(EscalationState::Pending));
    }

    #[test]
    fn test_terminal_states_absorbing() {
        for terminal in [
            EscalationState::Resolved,
            EscalationState::CannotFix,
            EscalationState::WontFix,
            EscalationState::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                EscalationState::Pending,
                EscalationState::InReview,
                EscalationState::Resolved,
                EscalationState::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_open_case_is_pending() {
        let case = EscalationCase::open(
            Uuid::now_v7(),
            Uuid::now_v7(),
            Uuid::now_v7(),
            None,
            ReasonCode::CriticalSeverity,
        );
        assert_eq!(case.state, EscalationState::Pending);
        assert!(case.assigned_reviewer.is_none());
        assert!(case.resolved_at.is_none());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(EscalationState::InReview.to_string(), "in-review");
        assert_eq!(EscalationState::CannotFix.to_string(), "cannot-fix");
    }
}
