//! Last-resort deterministic placeholder.

use async_trait::async_trait;

use super::{gate, RepairContext, RepairStrategy};
use crate::regeneration::attempt::{GenerationAttempt, RepairOutcome, StrategyKind};
use crate::validation::synthesize;

/// Synthesizes a schema-valid artifact, keeping whatever parts of the current
/// candidate already validate. Results are always reported as degraded.
pub struct EmergencyFallback;

#[async_trait]
impl RepairStrategy for EmergencyFallback {
    fn kind(&self) -> StrategyKind {
        StrategyKind::EmergencyFallback
    }

    fn requires_generator(&self) -> bool {
        false
    }

    async fn attempt(&self, input: &GenerationAttempt<'_>, _ctx: &RepairContext<'_>) -> RepairOutcome {
        let value = synthesize(input.schema, input.value.as_ref());
        tracing::warn!(
            issues = input.issues.len(),
            "Falling back to a synthesized placeholder artifact"
        );
        let raw = serde_json::to_string(&value).unwrap_or_default();
        gate(self.kind(), input.schema, raw, value)
    }
}
