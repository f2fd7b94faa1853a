//! Full regeneration on a stronger model.

use async_trait::async_trait;

use super::{gate, generate_value, RepairContext, RepairStrategy};
use crate::regeneration::attempt::{GenerationAttempt, RepairOutcome, StrategyKind};
use crate::regeneration::prompts::render_escalation;
use crate::validation::describe;

/// Re-runs the original prompt with the expected shape spelled out, using
/// the escalation generation options.
pub struct ModelEscalation;

#[async_trait]
impl RepairStrategy for ModelEscalation {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ModelEscalation
    }

    fn requires_generator(&self) -> bool {
        true
    }

    async fn attempt(&self, input: &GenerationAttempt<'_>, ctx: &RepairContext<'_>) -> RepairOutcome {
        let kind = self.kind();
        let prompt = match render_escalation(input.prompt, &describe(input.schema), &input.issues) {
            Ok(prompt) => prompt,
            Err(e) => return RepairOutcome::rejected(kind, format!("prompt rendering failed: {}", e)),
        };

        tracing::info!(
            model = ctx.escalation.model_label(),
            attempt = input.attempt,
            "Escalating artifact generation"
        );

        match generate_value(kind, ctx, &prompt, ctx.escalation).await {
            Ok((raw, value)) => gate(kind, input.schema, raw, value),
            Err(rejected) => rejected,
        }
    }
}
