//! Regenerates only the array elements that failed validation.

use async_trait::async_trait;

use super::{gate, generate_value, RepairContext, RepairStrategy};
use crate::regeneration::attempt::{GenerationAttempt, RepairOutcome, StrategyKind};
use crate::regeneration::prompts::render_element;
use crate::validation::{describe, IssuePath, ValidationIssue};

/// Splices regenerated elements back into the otherwise valid document.
///
/// Only applies when every issue lies inside an array element; issues on
/// top-level fields need a full revision instead.
pub struct PartialRegeneration {
    max_elements: usize,
}

impl Default for PartialRegeneration {
    fn default() -> Self {
        Self { max_elements: 8 }
    }
}

impl PartialRegeneration {
    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements.max(1);
        self
    }
}

/// The outermost invalid elements, in document order of first appearance.
fn invalid_elements(issues: &[ValidationIssue]) -> Result<Vec<IssuePath>, IssuePath> {
    let mut targets: Vec<IssuePath> = Vec::new();
    for issue in issues {
        let element = issue.path.enclosing_element().ok_or_else(|| issue.path.clone())?;
        if !targets.contains(&element) {
            targets.push(element);
        }
    }

    let outermost = targets
        .iter()
        .filter(|target| !targets.iter().any(|other| target.is_descendant_of(other)))
        .cloned()
        .collect();
    Ok(outermost)
}

#[async_trait]
impl RepairStrategy for PartialRegeneration {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PartialRegeneration
    }

    fn requires_generator(&self) -> bool {
        true
    }

    async fn attempt(&self, input: &GenerationAttempt<'_>, ctx: &RepairContext<'_>) -> RepairOutcome {
        let kind = self.kind();
        let Some(document) = &input.value else {
            return RepairOutcome::rejected(kind, "output is not parseable JSON");
        };
        if input.issues.is_empty() {
            return RepairOutcome::rejected(kind, "no element-level issues to repair");
        }

        let targets = match invalid_elements(&input.issues) {
            Ok(targets) => targets,
            Err(path) => {
                return RepairOutcome::rejected(kind, format!("issue at {} is not inside an array element", path))
            }
        };
        if targets.len() > self.max_elements {
            return RepairOutcome::rejected(
                kind,
                format!(
                    "{} invalid elements exceed the limit of {}",
                    targets.len(),
                    self.max_elements
                ),
            );
        }

        let mut patched = document.clone();
        for target in &targets {
            let Some(element_schema) = input.schema.resolve(target) else {
                return RepairOutcome::rejected(kind, format!("no schema governs {}", target));
            };
            let element = target
                .get(document)
                .map(|value| serde_json::to_string_pretty(value).unwrap_or_default())
                .unwrap_or_default();
            let element_issues: Vec<ValidationIssue> = input
                .issues
                .iter()
                .filter(|issue| issue.path == *target || issue.path.is_descendant_of(target))
                .cloned()
                .collect();

            let prompt = match render_element(
                input.prompt,
                &target.to_string(),
                &element,
                &element_issues,
                &describe(element_schema),
            ) {
                Ok(prompt) => prompt,
                Err(e) => return RepairOutcome::rejected(kind, format!("prompt rendering failed: {}", e)),
            };

            let replacement = match generate_value(kind, ctx, &prompt, ctx.options).await {
                Ok((_, value)) => value,
                Err(rejected) => return rejected,
            };
            if !target.set(&mut patched, replacement) {
                return RepairOutcome::rejected(kind, format!("element {} no longer exists", target));
            }
        }

        tracing::debug!(elements = targets.len(), "Spliced regenerated elements");
        let raw = serde_json::to_string(&patched).unwrap_or_default();
        gate(kind, input.schema, raw, patched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::GenerationOptions;
    use crate::regeneration::strategies::test_support::ScriptedGenerator;
    use crate::validation::{validate, ArtifactSchema};
    use serde_json::json;

    fn modules_schema() -> ArtifactSchema {
        ArtifactSchema::object()
            .required("course", ArtifactSchema::string())
            .required(
                "modules",
                ArtifactSchema::array_of(
                    ArtifactSchema::object()
                        .required("title", ArtifactSchema::string().min_len(1))
                        .required("minutes", ArtifactSchema::integer().min(1.0)),
                ),
            )
            .into()
    }

    fn attempt_for<'a>(schema: &'a ArtifactSchema, value: serde_json::Value) -> GenerationAttempt<'a> {
        let issues = validate(schema, &value).issues;
        GenerationAttempt {
            schema,
            prompt: "Outline the course",
            raw: value.to_string(),
            value: Some(value),
            issues,
            attempt: 2,
        }
    }

    #[test]
    fn test_invalid_elements_keeps_outermost() {
        let modules = IssuePath::root().key("modules");
        let issues = vec![
            ValidationIssue::new(modules.index(1).key("title"), "x"),
            ValidationIssue::new(modules.index(1).key("minutes"), "y"),
            ValidationIssue::new(modules.index(1).key("lessons").index(0), "z"),
            ValidationIssue::new(modules.index(3), "w"),
        ];
        let targets = invalid_elements(&issues).unwrap();
        assert_eq!(targets, vec![modules.index(1), modules.index(3)]);

        let top = vec![ValidationIssue::new(IssuePath::root().key("course"), "missing")];
        assert_eq!(invalid_elements(&top).unwrap_err().to_string(), "course");
    }

    #[tokio::test]
    async fn test_regenerates_only_broken_element() {
        let schema = modules_schema();
        let input = attempt_for(
            &schema,
            json!({
                "course": "Rust",
                "modules": [
                    {"title": "Ownership", "minutes": 30},
                    {"title": "", "minutes": 0}
                ]
            }),
        );

        let generator = ScriptedGenerator::new([r#"{"title": "Borrowing", "minutes": 25}"#]);
        let options = GenerationOptions::default();
        let ctx = RepairContext {
            generator: Some(&generator),
            options: &options,
            escalation: &options,
        };

        match PartialRegeneration::default().attempt(&input, &ctx).await {
            RepairOutcome::Accepted { artifact } => {
                assert_eq!(artifact["modules"][0]["title"], "Ownership");
                assert_eq!(artifact["modules"][1]["title"], "Borrowing");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(generator.prompt_count(), 1);
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].0.contains("located at `modules[1]`"));
    }

    #[tokio::test]
    async fn test_declines_top_level_issues() {
        let schema = modules_schema();
        let input = attempt_for(&schema, json!({"modules": []}));
        let generator = ScriptedGenerator::new(Vec::<String>::new());
        let options = GenerationOptions::default();
        let ctx = RepairContext {
            generator: Some(&generator),
            options: &options,
            escalation: &options,
        };

        let outcome = PartialRegeneration::default().attempt(&input, &ctx).await;
        assert!(!outcome.is_accepted());
        assert_eq!(generator.prompt_count(), 0);
    }

    #[tokio::test]
    async fn test_element_limit() {
        let schema = modules_schema();
        let broken: Vec<_> = (0..3).map(|_| json!({"title": ""})).collect();
        let input = attempt_for(&schema, json!({"course": "c", "modules": broken}));
        let options = GenerationOptions::default();
        let ctx = RepairContext {
            generator: None,
            options: &options,
            escalation: &options,
        };

        match PartialRegeneration::default()
            .with_max_elements(2)
            .attempt(&input, &ctx)
            .await
        {
            RepairOutcome::Rejected { reason, .. } => assert!(reason.contains("exceed the limit of 2")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
