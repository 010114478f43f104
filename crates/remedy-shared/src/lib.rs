//! # Remedy Shared
//!
//! Shared contracts for the remedy QA orchestration system: the data model
//! (violations, batches, scores, routing decisions, worker handles,
//! escalation cases), configuration, the error taxonomy, and the
//! enum-dispatched providers for the external collaborators (task queue,
//! event bus, worker registry).
//!
//! The orchestration brain lives in `remedy-orchestration`; this crate is
//! the dependency leaf both it and any future worker crates build on.

pub mod config;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod queue;
pub mod registry;
pub mod types;

pub use error::{RemedyError, RemedyResult};
