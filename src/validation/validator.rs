//! Structural and cross-field validation of artifacts.
//!
//! [`validate`] is pure and deterministic: the same schema and value always
//! yield the same report, in the same issue order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::path::IssuePath;
use super::schema::{
    ArraySchema, ArtifactSchema, NumberSchema, ObjectSchema, RefinedSchema, ShapeVariant,
    StringSchema, ValueKind,
};

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: IssuePath,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: IssuePath, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Result of validating an artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn valid() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
        }
    }

    pub fn add_issue(&mut self, path: IssuePath, message: impl Into<String>) {
        self.issues.push(ValidationIssue::new(path, message));
        self.valid = false;
    }

    /// One line per issue, for logs and error messages.
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validates `value` against `schema`.
pub fn validate(schema: &ArtifactSchema, value: &Value) -> ValidationReport {
    let mut report = ValidationReport::valid();
    check(schema, value, &IssuePath::root(), &mut report);
    report
}

fn check(schema: &ArtifactSchema, value: &Value, path: &IssuePath, report: &mut ValidationReport) {
    match schema {
        ArtifactSchema::String(spec) => check_string(spec, value, path, report),
        ArtifactSchema::Number(spec) => check_number(spec, value, path, report),
        ArtifactSchema::Boolean => {
            if !value.is_boolean() {
                type_mismatch(ValueKind::Boolean.as_str(), value, path, report);
            }
        }
        ArtifactSchema::Array(spec) => check_array(spec, value, path, report),
        ArtifactSchema::Object(spec) => check_object(spec, value, path, report),
        ArtifactSchema::Refined(spec) => check_refined(spec, value, path, report),
        ArtifactSchema::OneOf(variants) => check_union(variants, value, path, report),
    }
}

fn check_string(spec: &StringSchema, value: &Value, path: &IssuePath, report: &mut ValidationReport) {
    let Some(text) = value.as_str() else {
        type_mismatch("string", value, path, report);
        return;
    };

    let len = text.chars().count();
    if let Some(min) = spec.min_len {
        if len < min {
            report.add_issue(
                path.clone(),
                format!("must be at least {} characters, found {}", min, len),
            );
        }
    }
    if let Some(max) = spec.max_len {
        if len > max {
            report.add_issue(
                path.clone(),
                format!("must be at most {} characters, found {}", max, len),
            );
        }
    }
    if let Some(allowed) = &spec.allowed {
        if !allowed.iter().any(|candidate| candidate == text) {
            report.add_issue(
                path.clone(),
                format!("must be one of [{}], found '{}'", allowed.join(", "), text),
            );
        }
    }
}

fn check_number(spec: &NumberSchema, value: &Value, path: &IssuePath, report: &mut ValidationReport) {
    let expected = if spec.integer { "integer" } else { "number" };
    let Some(number) = value.as_f64() else {
        type_mismatch(expected, value, path, report);
        return;
    };

    if spec.integer && number.fract() != 0.0 {
        report.add_issue(path.clone(), format!("must be an integer, found {}", number));
    }
    if let Some(min) = spec.min {
        if number < min {
            report.add_issue(path.clone(), format!("must be >= {}, found {}", min, number));
        }
    }
    if let Some(max) = spec.max {
        if number > max {
            report.add_issue(path.clone(), format!("must be <= {}, found {}", max, number));
        }
    }
}

fn check_array(spec: &ArraySchema, value: &Value, path: &IssuePath, report: &mut ValidationReport) {
    let Some(items) = value.as_array() else {
        type_mismatch("array", value, path, report);
        return;
    };

    if let Some(min) = spec.min_items {
        if items.len() < min {
            report.add_issue(
                path.clone(),
                format!("must contain at least {} items, found {}", min, items.len()),
            );
        }
    }
    if let Some(max) = spec.max_items {
        if items.len() > max {
            report.add_issue(
                path.clone(),
                format!("must contain at most {} items, found {}", max, items.len()),
            );
        }
    }

    for (index, item) in items.iter().enumerate() {
        check(&spec.items, item, &path.index(index), report);
    }
}

fn check_object(spec: &ObjectSchema, value: &Value, path: &IssuePath, report: &mut ValidationReport) {
    let Some(map) = value.as_object() else {
        type_mismatch("object", value, path, report);
        return;
    };

    for field in &spec.fields {
        match map.get(&field.name) {
            None | Some(Value::Null) if field.required => {
                report.add_issue(path.key(&field.name), "required field is missing");
            }
            None | Some(Value::Null) => {}
            Some(inner) => check(&field.schema, inner, &path.key(&field.name), report),
        }
    }

    if spec.deny_unknown {
        for key in map.keys() {
            if spec.get(key).is_none() {
                report.add_issue(path.key(key), "unknown field");
            }
        }
    }
}

fn check_refined(spec: &RefinedSchema, value: &Value, path: &IssuePath, report: &mut ValidationReport) {
    let before = report.issues.len();
    check(&spec.inner, value, path, report);

    // Cross-field checks on a structurally broken value only add noise.
    if report.issues.len() > before {
        return;
    }

    for refinement in &spec.refinements {
        if let Some((issue_path, message)) = refinement.evaluate(value, path) {
            report.add_issue(issue_path, message);
        }
    }
}

fn check_union(variants: &[ShapeVariant], value: &Value, path: &IssuePath, report: &mut ValidationReport) {
    if variants.is_empty() {
        report.add_issue(path.clone(), "schema declares no accepted shapes");
        return;
    }

    let kind = ValueKind::of(value);
    let mut best: Option<(bool, ValidationReport)> = None;

    for variant in variants {
        let mut attempt = ValidationReport::valid();
        check(&variant.schema, value, path, &mut attempt);
        if attempt.valid {
            return;
        }

        let kind_matches = variant.schema.accepts_kind(kind);
        let better = match &best {
            None => true,
            Some((best_matches, best_report)) => {
                (kind_matches && !best_matches)
                    || (kind_matches == *best_matches
                        && attempt.issues.len() < best_report.issues.len())
            }
        };
        if better {
            best = Some((kind_matches, attempt));
        }
    }

    match best {
        Some((true, closest)) => {
            for issue in closest.issues {
                report.add_issue(issue.path, issue.message);
            }
        }
        _ => {
            let labels: Vec<&str> = variants.iter().map(|variant| variant.label.as_str()).collect();
            report.add_issue(
                path.clone(),
                format!(
                    "expected one of [{}], found {}",
                    labels.join(", "),
                    ValueKind::of(value)
                ),
            );
        }
    }
}

fn type_mismatch(expected: &str, value: &Value, path: &IssuePath, report: &mut ValidationReport) {
    report.add_issue(
        path.clone(),
        format!("expected {}, found {}", expected, ValueKind::of(value)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::schema::Refinement;
    use serde_json::json;

    fn outcomes_object() -> ArtifactSchema {
        ArtifactSchema::object()
            .required(
                "outcomes",
                ArtifactSchema::array_of(ArtifactSchema::string().min_len(3)).min_items(1),
            )
            .into()
    }

    #[test]
    fn test_valid_object() {
        let report = validate(&outcomes_object(), &json!({"outcomes": ["Explain X"]}));
        assert!(report.valid);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_one_issue_per_mistyped_element() {
        let report = validate(
            &outcomes_object(),
            &json!({"outcomes": [{"text": "a"}, {"text": "b"}]}),
        );
        assert!(!report.valid);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].path.to_string(), "outcomes[0]");
        assert_eq!(report.issues[0].message, "expected string, found object");
        assert_eq!(report.issues[1].path.to_string(), "outcomes[1]");
    }

    #[test]
    fn test_required_and_optional_fields() {
        let schema: ArtifactSchema = ArtifactSchema::object()
            .required("title", ArtifactSchema::string())
            .optional("subtitle", ArtifactSchema::string())
            .into();

        assert!(validate(&schema, &json!({"title": "Intro"})).valid);
        assert!(validate(&schema, &json!({"title": "Intro", "subtitle": null})).valid);

        let report = validate(&schema, &json!({"subtitle": 4}));
        let rendered: Vec<String> = report.issues.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "title: required field is missing".to_string(),
                "subtitle: expected string, found number".to_string()
            ]
        );
    }

    #[test]
    fn test_unknown_fields_denied() {
        let schema: ArtifactSchema = ArtifactSchema::object()
            .required("title", ArtifactSchema::string())
            .deny_unknown_fields()
            .into();
        let report = validate(&schema, &json!({"title": "x", "Title": "y"}));
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].path.to_string(), "Title");
    }

    #[test]
    fn test_string_bounds_and_enum() {
        let schema: ArtifactSchema = ArtifactSchema::string()
            .min_len(2)
            .max_len(4)
            .one_of(["ab", "abcd"])
            .into();
        assert!(validate(&schema, &json!("ab")).valid);
        assert_eq!(validate(&schema, &json!("a")).issues.len(), 2);
        assert_eq!(validate(&schema, &json!("abcde")).issues.len(), 2);
        assert_eq!(validate(&schema, &json!("abc")).issues.len(), 1);
    }

    #[test]
    fn test_numeric_ranges() {
        let schema: ArtifactSchema = ArtifactSchema::integer().range(1.0, 10.0).into();
        assert!(validate(&schema, &json!(5)).valid);
        assert!(validate(&schema, &json!(5.0)).valid);
        assert!(!validate(&schema, &json!(5.5)).valid);
        assert!(!validate(&schema, &json!(0)).valid);
        assert!(!validate(&schema, &json!(11)).valid);
        assert!(!validate(&schema, &json!("5")).valid);
    }

    #[test]
    fn test_array_bounds() {
        let schema: ArtifactSchema = ArtifactSchema::array_of(ArtifactSchema::boolean())
            .min_items(1)
            .max_items(2)
            .into();
        assert!(!validate(&schema, &json!([])).valid);
        assert!(validate(&schema, &json!([true])).valid);
        assert!(!validate(&schema, &json!([true, false, true])).valid);
        assert!(!validate(&schema, &json!([1])).valid);
    }

    #[test]
    fn test_refined_schema_checks_nested_fields_to_full_depth() {
        let bare: ArtifactSchema = ArtifactSchema::object()
            .required("lesson_count", ArtifactSchema::integer().min(1.0))
            .required(
                "lessons",
                ArtifactSchema::array_of(
                    ArtifactSchema::object()
                        .required("title", ArtifactSchema::string().min_len(3))
                        .required("minutes", ArtifactSchema::integer().min(1.0)),
                ),
            )
            .into();
        let wrapped = bare
            .clone()
            .refine(Refinement::proportional("lessons", "lesson_count", 1.0, 0.0));

        let value = json!({
            "lesson_count": 2,
            "lessons": [{"title": "Hi", "minutes": 0}, {"title": "Intro"}]
        });

        let bare_report = validate(&bare, &value);
        let wrapped_report = validate(&wrapped, &value);
        assert_eq!(bare_report.issues.len(), 3);
        assert_eq!(bare_report.issues, wrapped_report.issues);
        assert_eq!(wrapped_report.issues[0].path.to_string(), "lessons[0].title");
        assert_eq!(wrapped_report.issues[2].path.to_string(), "lessons[1].minutes");
    }

    #[test]
    fn test_refinement_runs_after_structure_passes() {
        let schema = ArtifactSchema::from(
            ArtifactSchema::object()
                .required("lesson_count", ArtifactSchema::integer())
                .required("lessons", ArtifactSchema::array_of(ArtifactSchema::string())),
        )
        .refine(Refinement::proportional("lessons", "lesson_count", 1.0, 0.0));

        let report = validate(&schema, &json!({"lesson_count": 3, "lessons": ["a"]}));
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].path.to_string(), "lessons");
    }

    #[test]
    fn test_union_accepts_any_declared_shape() {
        let list = ArtifactSchema::array_of(ArtifactSchema::string()).min_items(1);
        let schema = ArtifactSchema::one_of([
            ("array of strings", ArtifactSchema::from(list.clone())),
            (
                "object with outcomes",
                ArtifactSchema::object().required("outcomes", list).into(),
            ),
            ("single string", ArtifactSchema::string().into()),
        ]);

        assert!(validate(&schema, &json!(["Explain X"])).valid);
        assert!(validate(&schema, &json!({"outcomes": ["Explain X"]})).valid);
        assert!(validate(&schema, &json!("Explain X")).valid);
    }

    #[test]
    fn test_union_reports_closest_matching_variant() {
        let list = ArtifactSchema::array_of(ArtifactSchema::string()).min_items(1);
        let schema = ArtifactSchema::one_of([
            ("array of strings", ArtifactSchema::from(list.clone())),
            (
                "object with outcomes",
                ArtifactSchema::object().required("outcomes", list).into(),
            ),
        ]);

        let report = validate(&schema, &json!({"outcomes": [{"text": "x"}, {"text": "y"}]}));
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].path.to_string(), "outcomes[0]");

        let report = validate(&schema, &json!(42));
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].message.contains("array of strings"));
        assert!(report.issues[0].message.contains("found number"));
    }

    #[test]
    fn test_report_summary() {
        let report = validate(&outcomes_object(), &json!({}));
        assert_eq!(report.summary(), "outcomes: required field is missing");
    }
}
