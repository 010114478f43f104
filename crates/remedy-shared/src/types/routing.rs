//! # Routing Decisions
//!
//! Output of the decision engine: which of the three execution channels a
//! scored batch goes to, and why. Rule order is part of the contract, so the
//! reason code is carried everywhere the decision travels: events, worker
//! handles, escalation cases.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::batch::Batch;
use super::retrieval::RetrievalContext;
use super::score::Score;

/// Execution channel for a routed batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    /// In-process cooperative fast fixer
    Fast,
    /// Spawned heavyweight reasoning worker
    Heavy,
    /// Human-review escalation; no worker is dispatched
    Human,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "FAST"),
            Self::Heavy => write!(f, "HEAVY"),
            Self::Human => write!(f, "HUMAN"),
        }
    }
}

/// Why a decision or escalation was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    // Routing outcomes
    CriticalSeverity,
    HighComplexity,
    SecurityKind,
    LowConfidenceMediumComplexity,
    AutoFixable,
    // Worker failure escalations
    ExhaustedRetries,
    WorkerFatal,
    Timeout,
    Cancelled,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::CriticalSeverity => "critical-severity",
            Self::HighComplexity => "high-complexity",
            Self::SecurityKind => "security-kind",
            Self::LowConfidenceMediumComplexity => "low-confidence-medium-complexity",
            Self::AutoFixable => "auto-fixable",
            Self::ExhaustedRetries => "exhausted-retries",
            Self::WorkerFatal => "worker-fatal",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{code}")
    }
}

/// Execution mode handed to spawned workers via `QA_MODE`.
///
/// `Interactive` is reserved for a future human-assisted heavy flow and is
/// never selected by the v1 routing rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    #[default]
    Headless,
    Interactive,
}

impl fmt::Display for WorkerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Headless => write!(f, "headless"),
            Self::Interactive => write!(f, "interactive"),
        }
    }
}

/// A routed batch with everything a dispatcher needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub channel: Channel,
    pub reason: ReasonCode,
    /// Security-kind work completes only with human sign-off
    pub requires_sign_off: bool,
    pub mode: WorkerMode,
    pub batch: Batch,
    pub score: Score,
    pub retrieval: RetrievalContext,
}
