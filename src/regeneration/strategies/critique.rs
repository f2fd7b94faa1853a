//! Asks the generator to fix only the fields validation flagged.

use async_trait::async_trait;

use super::{gate, generate_value, RepairContext, RepairStrategy};
use crate::regeneration::attempt::{GenerationAttempt, RepairOutcome, StrategyKind};
use crate::regeneration::prompts::render_critique;
use crate::validation::describe;

pub struct CritiqueAndRevise;

#[async_trait]
impl RepairStrategy for CritiqueAndRevise {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CritiqueAndRevise
    }

    fn requires_generator(&self) -> bool {
        true
    }

    async fn attempt(&self, input: &GenerationAttempt<'_>, ctx: &RepairContext<'_>) -> RepairOutcome {
        let kind = self.kind();
        let prompt = match render_critique(input.prompt, &input.raw, &input.issues, &describe(input.schema)) {
            Ok(prompt) => prompt,
            Err(e) => return RepairOutcome::rejected(kind, format!("prompt rendering failed: {}", e)),
        };

        match generate_value(kind, ctx, &prompt, ctx.options).await {
            Ok((raw, value)) => gate(kind, input.schema, raw, value),
            Err(rejected) => rejected,
        }
    }
}
