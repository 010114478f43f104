//! # Decision Engine
//!
//! Maps a scored, retrieval-enriched batch to one of the three execution
//! channels. Rules are evaluated top to bottom and the first match wins;
//! rule order is part of the contract. Thresholds are injected
//! configuration so operators can tune routing without recompilation.

use tracing::debug;

use remedy_shared::config::RoutingConfig;
use remedy_shared::types::batch::Batch;
use remedy_shared::types::retrieval::RetrievalContext;
use remedy_shared::types::routing::{Channel, ReasonCode, RoutingDecision, WorkerMode};
use remedy_shared::types::score::Score;

/// Pure routing-rule evaluator
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    thresholds: RoutingConfig,
}

impl DecisionEngine {
    pub fn new(thresholds: RoutingConfig) -> Self {
        Self { thresholds }
    }

    /// Route one batch. Deterministic: identical inputs produce identical
    /// decisions.
    pub fn decide(&self, batch: Batch, score: Score, retrieval: RetrievalContext) -> RoutingDecision {
        let (channel, reason, requires_sign_off) = self.evaluate(&batch, &score, &retrieval);

        debug!(
            batch_id = %batch.batch_id,
            channel = %channel,
            reason = %reason,
            score_total = score.total,
            retrieval_confidence = retrieval.confidence(),
            "Routing decision"
        );

        RoutingDecision {
            channel,
            reason,
            requires_sign_off,
            mode: WorkerMode::default(),
            batch,
            score,
            retrieval,
        }
    }

    fn evaluate(
        &self,
        batch: &Batch,
        score: &Score,
        retrieval: &RetrievalContext,
    ) -> (Channel, ReasonCode, bool) {
        // Rule 1: critical severity always goes to a human
        if batch.has_critical() {
            return (Channel::Human, ReasonCode::CriticalSeverity, false);
        }

        // Rule 2: high total complexity needs genuine reasoning
        if score.total >= self.thresholds.high_complexity_threshold {
            return (Channel::Heavy, ReasonCode::HighComplexity, false);
        }

        // Rule 3: security-family work runs heavy and completes only with
        // human sign-off
        if score.kind_weight >= self.thresholds.security_kind_threshold {
            return (Channel::Heavy, ReasonCode::SecurityKind, true);
        }

        // Rule 4: medium complexity without retrieval support
        if retrieval.confidence() < self.thresholds.low_confidence_threshold
            && score.total >= self.thresholds.medium_complexity_threshold
        {
            return (
                Channel::Heavy,
                ReasonCode::LowConfidenceMediumComplexity,
                false,
            );
        }

        // Rule 5: cheap, confident work goes to the fast channel
        (Channel::Fast, ReasonCode::AutoFixable, false)
    }
}
