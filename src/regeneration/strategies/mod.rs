//! The ranked repair strategies.
//!
//! Each strategy turns the current [`GenerationAttempt`] into a
//! [`RepairOutcome`]. Strategies validate their own output before claiming
//! acceptance; the engine re-validates regardless.

mod critique;
mod escalation;
mod fallback;
mod partial;
mod syntax;

pub use critique::CritiqueAndRevise;
pub use escalation::ModelEscalation;
pub use fallback::EmergencyFallback;
pub use partial::PartialRegeneration;
pub use syntax::{normalize_field_names, SyntaxRepair};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::attempt::{Candidate, GenerationAttempt, RepairOutcome, StrategyKind};
use crate::llm::{GenerationOptions, Generator};
use crate::utils::json_extraction::repair_json_text;
use crate::validation::{validate, ArtifactSchema};

/// Handles a strategy may use during one attempt.
pub struct RepairContext<'a> {
    /// Absent when the engine runs without a generator.
    pub generator: Option<&'a dyn Generator>,
    /// Options for critique and partial regeneration.
    pub options: &'a GenerationOptions,
    /// Options for model escalation.
    pub escalation: &'a GenerationOptions,
}

/// One method of turning an invalid artifact into a valid one.
#[async_trait]
pub trait RepairStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Whether the strategy needs an external generator handle.
    fn requires_generator(&self) -> bool;

    /// Deterministic strategies get a single attempt: repeating them cannot
    /// change the result.
    fn is_deterministic(&self) -> bool {
        !self.requires_generator()
    }

    async fn attempt(&self, input: &GenerationAttempt<'_>, ctx: &RepairContext<'_>) -> RepairOutcome;
}

/// The full chain in rank order.
pub fn default_strategies() -> Vec<Arc<dyn RepairStrategy>> {
    vec![
        Arc::new(SyntaxRepair),
        Arc::new(CritiqueAndRevise),
        Arc::new(PartialRegeneration::default()),
        Arc::new(ModelEscalation),
        Arc::new(EmergencyFallback),
    ]
}

/// Parses generator output, falling back to structural JSON repair.
pub(crate) fn parse_lenient(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(raw.trim()) {
        return Some(value);
    }
    let repaired = repair_json_text(raw)?;
    serde_json::from_str(&repaired).ok()
}

/// Validates a strategy's candidate and converts it into an outcome.
pub(crate) fn gate(kind: StrategyKind, schema: &ArtifactSchema, raw: String, value: Value) -> RepairOutcome {
    let report = validate(schema, &value);
    if report.valid {
        return RepairOutcome::Accepted { artifact: value };
    }

    RepairOutcome::Rejected {
        reason: format!(
            "{} validation issue(s) remain: {}",
            report.issues.len(),
            truncate(&report.summary(), 300)
        ),
        strategy: kind.name(),
        candidate: Some(Candidate { raw, value }),
    }
}

/// Runs the generator and parses its output, folding failures into a rejection.
pub(crate) async fn generate_value(
    kind: StrategyKind,
    ctx: &RepairContext<'_>,
    prompt: &str,
    options: &GenerationOptions,
) -> Result<(String, Value), RepairOutcome> {
    let Some(generator) = ctx.generator else {
        return Err(RepairOutcome::rejected(kind, "no generator configured"));
    };

    let raw = generator
        .generate(prompt, options)
        .await
        .map_err(|e| RepairOutcome::rejected(kind, format!("generator error: {}", e)))?;

    match parse_lenient(&raw) {
        Some(value) => Ok((raw, value)),
        None => Err(RepairOutcome::rejected(
            kind,
            format!("generator output is not valid JSON: {}", truncate(&raw, 120)),
        )),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::LlmError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Generator that replays canned responses and records prompts.
    pub struct ScriptedGenerator {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        pub prompts: Mutex<Vec<(String, Option<String>)>>,
    }

    impl ScriptedGenerator {
        pub fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(error: LlmError) -> Self {
            Self {
                replies: Mutex::new(VecDeque::from(vec![Err(error)])),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn prompt_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), options.model.clone()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse))
        }
    }
}
