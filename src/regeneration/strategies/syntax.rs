//! Deterministic repair of malformed JSON and misspelled field names.

use async_trait::async_trait;
use serde_json::Value;

use super::{gate, RepairContext, RepairStrategy};
use crate::regeneration::attempt::{GenerationAttempt, RepairOutcome, StrategyKind};
use crate::utils::json_extraction::repair_json_text;
use crate::validation::{ArtifactSchema, ValueKind};

/// Fixes JSON syntax (fences, trailing commas, unclosed delimiters) and
/// renames near-miss field names to the declared ones. Never calls a generator.
pub struct SyntaxRepair;

#[async_trait]
impl RepairStrategy for SyntaxRepair {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SyntaxRepair
    }

    fn requires_generator(&self) -> bool {
        false
    }

    async fn attempt(&self, input: &GenerationAttempt<'_>, _ctx: &RepairContext<'_>) -> RepairOutcome {
        let kind = self.kind();
        let mut changed = false;

        let mut value = match &input.value {
            Some(value) => value.clone(),
            None => {
                let Some(value) = repair_json_text(&input.raw)
                    .and_then(|repaired| serde_json::from_str::<Value>(&repaired).ok())
                else {
                    return RepairOutcome::rejected(kind, "output could not be repaired into JSON");
                };
                changed = true;
                value
            }
        };

        // Double-encoded documents: a JSON string whose contents are the artifact.
        if let Value::String(inner) = &value {
            if !input.schema.accepts_kind(ValueKind::String) {
                if let Some(decoded) = repair_json_text(inner)
                    .and_then(|repaired| serde_json::from_str::<Value>(&repaired).ok())
                {
                    value = decoded;
                    changed = true;
                }
            }
        }

        let renamed = normalize_field_names(&mut value, input.schema);
        if renamed > 0 {
            tracing::debug!(renamed, "Normalized field names");
            changed = true;
        }

        if !changed {
            return RepairOutcome::rejected(kind, "no syntactic or field-name repair applies");
        }

        let raw = serde_json::to_string(&value).unwrap_or_default();
        gate(kind, input.schema, raw, value)
    }
}

/// Renames object keys that nearly match a declared but absent field.
///
/// A key matches when it is equal ignoring case and punctuation
/// (`Lesson_Count` for `lesson_count`), or when it is within edit distance 2
/// of a field name of at least four characters. Returns the number of keys
/// renamed, recursing through arrays, objects and union variants.
pub fn normalize_field_names(value: &mut Value, schema: &ArtifactSchema) -> usize {
    match schema.unwrapped() {
        ArtifactSchema::OneOf(variants) => {
            let kind = ValueKind::of(value);
            match variants.iter().find(|variant| variant.schema.accepts_kind(kind)) {
                Some(variant) => normalize_field_names(value, &variant.schema),
                None => 0,
            }
        }
        ArtifactSchema::Array(spec) => match value {
            Value::Array(items) => items
                .iter_mut()
                .map(|item| normalize_field_names(item, &spec.items))
                .sum(),
            _ => 0,
        },
        ArtifactSchema::Object(spec) => {
            let Value::Object(map) = value else {
                return 0;
            };
            let mut renamed = 0;

            for field in &spec.fields {
                if map.contains_key(&field.name) {
                    continue;
                }
                let candidate = map
                    .keys()
                    .filter(|key| spec.get(key).is_none())
                    .find(|key| names_match(key, &field.name))
                    .cloned();
                if let Some(key) = candidate {
                    if let Some(moved) = map.remove(&key) {
                        map.insert(field.name.clone(), moved);
                        renamed += 1;
                    }
                }
            }

            for field in &spec.fields {
                if let Some(child) = map.get_mut(&field.name) {
                    renamed += normalize_field_names(child, &field.schema);
                }
            }
            renamed
        }
        _ => 0,
    }
}

fn canonical(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn names_match(key: &str, field: &str) -> bool {
    let (key, field) = (canonical(key), canonical(field));
    if key.is_empty() {
        return false;
    }
    key == field || (field.chars().count() >= 4 && edit_distance(&key, &field) <= 2)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut current = Vec::with_capacity(b.len() + 1);
        current.push(i + 1);
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current.push(substitution.min(previous[j + 1] + 1).min(current[j] + 1));
        }
        previous = current;
    }

    previous[b.len()]
}
