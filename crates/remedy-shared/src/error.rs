//! # Error Types
//!
//! Domain error taxonomy shared across the remedy workspace. Variants carry
//! pre-formatted messages so callers at module boundaries can wrap lower-level
//! failures without exposing provider internals.

use thiserror::Error;

/// Top-level error type for remedy components
#[derive(Debug, Error)]
pub enum RemedyError {
    /// Configuration loading or validation failed (startup fatal)
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Task queue operation failed
    #[error("Queue error: {0}")]
    QueueError(String),

    /// Event bus publish failed
    #[error("Event bus error: {0}")]
    EventBusError(String),

    /// Pattern corpus could not be loaded (startup fatal when corrupt)
    #[error("Pattern index error: {0}")]
    IndexError(String),

    /// Worker dispatch or lifecycle management failed
    #[error("Supervisor error: {0}")]
    SupervisorError(String),

    /// Escalation case operation rejected
    #[error("Escalation error: {0}")]
    EscalationError(String),

    /// Input failed validation before processing
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A programming bug tripped a runtime invariant check.
    ///
    /// Invariant violations are logged, coerced to the nearest valid value
    /// where possible, and reported on `qa.monitor.invariant_violation`.
    /// They never crash the daemon.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Convenience result alias used throughout the workspace
pub type RemedyResult<T> = Result<T, RemedyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_context() {
        let err = RemedyError::QueueError("lease expired".to_string());
        assert_eq!(err.to_string(), "Queue error: lease expired");
    }

    #[test]
    fn test_invariant_violation_display() {
        let err = RemedyError::InvariantViolation("score total 1.3 out of range".to_string());
        assert!(err.to_string().starts_with("Invariant violation:"));
    }
}
