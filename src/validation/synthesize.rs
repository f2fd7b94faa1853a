//! Deterministic placeholder synthesis.
//!
//! Builds the smallest value that satisfies a schema, keeping whatever parts
//! of an existing candidate already validate. Used as the last resort when
//! every generator-backed repair has failed.

use serde_json::{Map, Number, Value};

use super::schema::{
    lookup, measure, ArraySchema, ArtifactSchema, NumberSchema, ObjectSchema, Refinement,
    StringSchema, ValueKind,
};
use super::validator::validate;

/// Text used to fill string fields that had nothing salvageable.
pub const PLACEHOLDER_TEXT: &str = "Content pending review.";

/// Synthesizes a value for `schema`, salvaging from `existing` where possible.
pub fn synthesize(schema: &ArtifactSchema, existing: Option<&Value>) -> Value {
    if let Some(value) = existing {
        if validate(schema, value).valid {
            return value.clone();
        }
    }

    match schema {
        ArtifactSchema::String(spec) => synthesize_string(spec, existing),
        ArtifactSchema::Number(spec) => synthesize_number(spec, existing),
        ArtifactSchema::Boolean => Value::Bool(existing.and_then(Value::as_bool).unwrap_or(false)),
        ArtifactSchema::Array(spec) => synthesize_array(spec, existing),
        ArtifactSchema::Object(spec) => synthesize_object(spec, existing),
        ArtifactSchema::Refined(spec) => {
            let mut value = synthesize(&spec.inner, existing);
            for refinement in &spec.refinements {
                satisfy(refinement, &mut value);
            }
            value
        }
        ArtifactSchema::OneOf(variants) => {
            let kind = existing.map(ValueKind::of);
            let variant = variants
                .iter()
                .find(|variant| kind.is_some_and(|kind| variant.schema.accepts_kind(kind)))
                .or_else(|| variants.first());
            match variant {
                Some(variant) => synthesize(&variant.schema, existing),
                None => Value::Null,
            }
        }
    }
}

fn synthesize_string(spec: &StringSchema, existing: Option<&Value>) -> Value {
    if let Some(allowed) = spec.allowed.as_ref().and_then(|allowed| allowed.first()) {
        return Value::String(allowed.clone());
    }

    let min = spec.min_len.unwrap_or(0);
    let max = spec.max_len.unwrap_or(usize::MAX);
    let seed = existing
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .unwrap_or(PLACEHOLDER_TEXT);

    let mut text: String = seed.chars().take(max).collect();
    while text.chars().count() < min {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(PLACEHOLDER_TEXT);
    }
    Value::String(text.chars().take(max).collect())
}

fn synthesize_number(spec: &NumberSchema, existing: Option<&Value>) -> Value {
    let mut number = existing.and_then(Value::as_f64).unwrap_or(0.0);
    if let Some(min) = spec.min {
        number = number.max(min);
    }
    if let Some(max) = spec.max {
        number = number.min(max);
    }

    if spec.integer {
        let mut whole = number.round();
        if spec.min.is_some_and(|min| whole < min) {
            whole = number.ceil();
        }
        if spec.max.is_some_and(|max| whole > max) {
            whole = number.floor();
        }
        return Value::from(whole as i64);
    }

    Number::from_f64(number).map(Value::Number).unwrap_or(Value::from(0))
}

fn synthesize_array(spec: &ArraySchema, existing: Option<&Value>) -> Value {
    let max = spec.max_items.unwrap_or(usize::MAX);
    let mut items: Vec<Value> = existing
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| validate(&spec.items, item).valid)
                .take(max)
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    // Invalid elements that can be patched are better than placeholders.
    if let Some(source) = existing.and_then(Value::as_array) {
        for item in source.iter().filter(|item| !validate(&spec.items, item).valid) {
            if items.len() >= spec.min_items.unwrap_or(0) {
                break;
            }
            items.push(synthesize(&spec.items, Some(item)));
        }
    }

    while items.len() < spec.min_items.unwrap_or(0) {
        items.push(synthesize(&spec.items, None));
    }
    Value::Array(items)
}

fn synthesize_object(spec: &ObjectSchema, existing: Option<&Value>) -> Value {
    let source = existing.and_then(Value::as_object);
    let mut map = Map::new();

    for field in &spec.fields {
        let current = source.and_then(|map| map.get(&field.name)).filter(|v| !v.is_null());
        if field.required || current.is_some() {
            map.insert(field.name.clone(), synthesize(&field.schema, current));
        }
    }

    if !spec.deny_unknown {
        if let Some(source) = source {
            for (key, value) in source {
                if spec.get(key).is_none() {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
    }

    Value::Object(map)
}

/// Adjusts the numeric side of a refinement so it holds.
fn satisfy(refinement: &Refinement, value: &mut Value) {
    match refinement {
        Refinement::Proportional {
            field, base, ratio, ..
        } => {
            let field_value = lookup(value, field).cloned();
            let base_value = lookup(value, base).cloned();
            match (field_value, base_value) {
                (Some(Value::Number(_)), Some(base_value)) => {
                    if let Some(base_measure) = measure(&base_value) {
                        set_number(value, field, ratio * base_measure);
                    }
                }
                (Some(field_value), Some(Value::Number(_))) if *ratio != 0.0 => {
                    if let Some(field_measure) = measure(&field_value) {
                        set_number(value, base, field_measure / ratio);
                    }
                }
                _ => {}
            }
        }
        Refinement::NotGreaterThan { field, other } => {
            let limit = lookup(value, other).and_then(measure);
            let current = lookup(value, field).cloned();
            if let (Some(limit), Some(Value::Number(n))) = (limit, current) {
                if n.as_f64().is_some_and(|n| n > limit) {
                    set_number(value, field, limit);
                }
            }
        }
        Refinement::Custom { .. } => {}
    }
}

fn set_number(value: &mut Value, field: &str, number: f64) {
    let mut current = value;
    for key in field.split('.') {
        match current.get_mut(key) {
            Some(next) => current = next,
            None => return,
        }
    }
    *current = if number.fract() == 0.0 {
        Value::from(number as i64)
    } else {
        Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn section() -> ArtifactSchema {
        ArtifactSchema::from(
            ArtifactSchema::object()
                .required("title", ArtifactSchema::string().min_len(3).max_len(40))
                .required("level", ArtifactSchema::string().one_of(["intro", "advanced"]))
                .required("lesson_count", ArtifactSchema::integer().range(1.0, 10.0))
                .required(
                    "lessons",
                    ArtifactSchema::array_of(ArtifactSchema::string().min_len(1)).min_items(1),
                )
                .optional("notes", ArtifactSchema::string()),
        )
        .refine(Refinement::proportional("lesson_count", "lessons", 1.0, 0.0))
    }

    #[test]
    fn test_synthesize_from_nothing_is_valid() {
        let schema = section();
        let value = synthesize(&schema, None);
        assert!(validate(&schema, &value).valid, "{:?}", validate(&schema, &value));
        assert_eq!(value["level"], "intro");
        assert!(value.get("notes").is_none());
    }

    #[test]
    fn test_synthesize_salvages_valid_parts() {
        let schema = section();
        let broken = json!({
            "title": "Ownership basics",
            "level": "beginner",
            "lesson_count": 7,
            "lessons": ["Moves", 42, "Borrowing"],
            "notes": "keep"
        });
        let value = synthesize(&schema, Some(&broken));
        assert!(validate(&schema, &value).valid);
        assert_eq!(value["title"], "Ownership basics");
        assert_eq!(value["lessons"], json!(["Moves", "Borrowing"]));
        assert_eq!(value["lesson_count"], 2);
        assert_eq!(value["notes"], "keep");
    }

    #[test]
    fn test_synthesize_string_bounds() {
        let schema: ArtifactSchema = ArtifactSchema::string().min_len(60).max_len(70).into();
        let value = synthesize(&schema, None);
        let len = value.as_str().unwrap().chars().count();
        assert!((60..=70).contains(&len));
    }

    #[test]
    fn test_synthesize_integer_clamps() {
        let schema: ArtifactSchema = ArtifactSchema::integer().range(2.5, 9.0).into();
        assert_eq!(synthesize(&schema, Some(&json!(100))), json!(9));
        assert_eq!(synthesize(&schema, None), json!(3));
    }

    #[test]
    fn test_synthesize_union_follows_existing_kind() {
        let schema = ArtifactSchema::one_of([
            ("list", ArtifactSchema::from(ArtifactSchema::array_of(ArtifactSchema::string()).min_items(1))),
            ("single", ArtifactSchema::from(ArtifactSchema::string())),
        ]);
        let value = synthesize(&schema, Some(&json!([1, 2])));
        assert!(value.is_array());
        assert!(validate(&schema, &value).valid);
    }

    #[test]
    fn test_existing_valid_value_is_returned_unchanged() {
        let schema = section();
        let good = json!({"title": "Traits", "level": "advanced", "lesson_count": 1, "lessons": ["Dyn"]});
        assert_eq!(synthesize(&schema, Some(&good)), good);
    }
}
