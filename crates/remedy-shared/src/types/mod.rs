//! # Shared Data Model
//!
//! The entities that flow between orchestration components: violations,
//! batches, scores, retrieval contexts, routing decisions, worker handles,
//! and escalation cases.

pub mod batch;
pub mod escalation;
pub mod retrieval;
pub mod routing;
pub mod score;
pub mod violation;
pub mod worker;

pub use batch::{Batch, BatchStrategy};
pub use escalation::{EscalationCase, EscalationState};
pub use retrieval::{PatternEntry, PatternMatch, PatternSource, RetrievalContext};
pub use routing::{Channel, ReasonCode, RoutingDecision, WorkerMode};
pub use score::Score;
pub use violation::{KindFamily, Severity, Violation, ViolationKind};
pub use worker::{WorkerHandle, WorkerKind, WorkerOutcome, WorkerState};
