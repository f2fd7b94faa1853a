//! Declarative artifact shapes.
//!
//! An [`ArtifactSchema`] is the single description of what a stage must
//! produce. The validator, the prompt-facing description and the emergency
//! placeholder synthesis all read the same value, so they cannot drift apart.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::path::{IssuePath, PathSegment};

/// Top-level JSON kind, used to match values against union variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::String(_) => ValueKind::String,
            Value::Number(_) => ValueKind::Number,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a JSON artifact.
#[derive(Debug, Clone)]
pub enum ArtifactSchema {
    String(StringSchema),
    Number(NumberSchema),
    Boolean,
    Array(ArraySchema),
    Object(ObjectSchema),
    /// A schema with cross-field constraints attached.
    Refined(RefinedSchema),
    /// Several accepted top-level shapes for the same artifact.
    OneOf(Vec<ShapeVariant>),
}

impl ArtifactSchema {
    pub fn string() -> StringSchema {
        StringSchema::default()
    }

    pub fn number() -> NumberSchema {
        NumberSchema::default()
    }

    pub fn integer() -> NumberSchema {
        NumberSchema {
            integer: true,
            ..NumberSchema::default()
        }
    }

    pub fn boolean() -> Self {
        ArtifactSchema::Boolean
    }

    pub fn array_of(items: impl Into<ArtifactSchema>) -> ArraySchema {
        ArraySchema {
            items: Box::new(items.into()),
            min_items: None,
            max_items: None,
        }
    }

    pub fn object() -> ObjectSchema {
        ObjectSchema::default()
    }

    /// Builds a union from `(label, schema)` pairs.
    pub fn one_of<L, S>(variants: impl IntoIterator<Item = (L, S)>) -> Self
    where
        L: Into<String>,
        S: Into<ArtifactSchema>,
    {
        ArtifactSchema::OneOf(
            variants
                .into_iter()
                .map(|(label, schema)| ShapeVariant {
                    label: label.into(),
                    schema: schema.into(),
                })
                .collect(),
        )
    }

    /// Attaches a refinement, wrapping the schema if it is not refined yet.
    pub fn refine(self, refinement: Refinement) -> Self {
        match self {
            ArtifactSchema::Refined(mut refined) => {
                refined.refinements.push(refinement);
                ArtifactSchema::Refined(refined)
            }
            other => ArtifactSchema::Refined(RefinedSchema {
                inner: Box::new(other),
                refinements: vec![refinement],
            }),
        }
    }

    /// Strips refinement wrappers, returning the structural schema underneath.
    pub fn unwrapped(&self) -> &ArtifactSchema {
        let mut current = self;
        while let ArtifactSchema::Refined(refined) = current {
            current = &refined.inner;
        }
        current
    }

    /// The top-level JSON kind this schema expects, if it expects exactly one.
    pub fn expected_kind(&self) -> Option<ValueKind> {
        match self.unwrapped() {
            ArtifactSchema::String(_) => Some(ValueKind::String),
            ArtifactSchema::Number(_) => Some(ValueKind::Number),
            ArtifactSchema::Boolean => Some(ValueKind::Boolean),
            ArtifactSchema::Array(_) => Some(ValueKind::Array),
            ArtifactSchema::Object(_) => Some(ValueKind::Object),
            ArtifactSchema::OneOf(_) | ArtifactSchema::Refined(_) => None,
        }
    }

    /// Finds the sub-schema governing the value at `path`.
    ///
    /// Refinements are looked through. For unions, the first variant that can
    /// hold the next path segment is followed.
    pub fn resolve(&self, path: &IssuePath) -> Option<&ArtifactSchema> {
        resolve_segments(self, path.segments())
    }

    /// Whether a value of `kind` could satisfy this schema.
    pub fn accepts_kind(&self, kind: ValueKind) -> bool {
        match self.unwrapped() {
            ArtifactSchema::OneOf(variants) => {
                variants.iter().any(|variant| variant.schema.accepts_kind(kind))
            }
            other => other.expected_kind() == Some(kind),
        }
    }
}

/// String constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringSchema {
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub allowed: Option<Vec<String>>,
}

impl StringSchema {
    pub fn min_len(mut self, min: usize) -> Self {
        self.min_len = Some(min);
        self
    }

    pub fn max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }

    /// Restricts the string to a fixed set of values.
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// Numeric constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberSchema {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub integer: bool,
}

impl NumberSchema {
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.min(min).max(max)
    }
}

/// Homogeneous array constraints.
#[derive(Debug, Clone)]
pub struct ArraySchema {
    pub items: Box<ArtifactSchema>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

impl ArraySchema {
    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }
}

/// A named field of an object schema.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub schema: ArtifactSchema,
    pub required: bool,
    pub description: Option<String>,
}

/// Object constraints.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    pub fields: Vec<FieldSpec>,
    /// Reject keys that are not declared in `fields`.
    pub deny_unknown: bool,
}

impl ObjectSchema {
    pub fn required(self, name: impl Into<String>, schema: impl Into<ArtifactSchema>) -> Self {
        self.field(name, schema, true, None)
    }

    pub fn optional(self, name: impl Into<String>, schema: impl Into<ArtifactSchema>) -> Self {
        self.field(name, schema, false, None)
    }

    /// Adds a required field with a description shown to the generator.
    pub fn described(
        self,
        name: impl Into<String>,
        schema: impl Into<ArtifactSchema>,
        description: impl Into<String>,
    ) -> Self {
        self.field(name, schema, true, Some(description.into()))
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        schema: impl Into<ArtifactSchema>,
        required: bool,
        description: Option<String>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            schema: schema.into(),
            required,
            description,
        });
        self
    }

    pub fn deny_unknown_fields(mut self) -> Self {
        self.deny_unknown = true;
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// A schema wrapped with cross-field constraints.
#[derive(Debug, Clone)]
pub struct RefinedSchema {
    pub inner: Box<ArtifactSchema>,
    pub refinements: Vec<Refinement>,
}

/// One accepted shape of a union.
#[derive(Debug, Clone)]
pub struct ShapeVariant {
    pub label: String,
    pub schema: ArtifactSchema,
}

/// Predicate signature for call-site refinements. Returns a message on failure.
pub type RefinementCheck = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Cross-field constraint evaluated after the structural checks pass.
#[derive(Clone)]
pub enum Refinement {
    /// `measure(field)` must be within `tolerance` (relative) of `ratio * measure(base)`.
    ///
    /// The measure of a number is its value; of an array or string, its length.
    Proportional {
        field: String,
        base: String,
        ratio: f64,
        tolerance: f64,
    },
    /// `measure(field) <= measure(other)`.
    NotGreaterThan { field: String, other: String },
    /// Arbitrary predicate with a human-readable description.
    Custom {
        description: String,
        check: RefinementCheck,
    },
}

impl Refinement {
    pub fn proportional(field: impl Into<String>, base: impl Into<String>, ratio: f64, tolerance: f64) -> Self {
        Refinement::Proportional {
            field: field.into(),
            base: base.into(),
            ratio,
            tolerance,
        }
    }

    pub fn not_greater_than(field: impl Into<String>, other: impl Into<String>) -> Self {
        Refinement::NotGreaterThan {
            field: field.into(),
            other: other.into(),
        }
    }

    pub fn custom<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        Refinement::Custom {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    /// Human-readable statement of the constraint.
    pub fn describe(&self) -> String {
        match self {
            Refinement::Proportional {
                field,
                base,
                ratio,
                tolerance,
            } => {
                if *tolerance == 0.0 {
                    format!("{} must equal {} x {}", field, ratio, base)
                } else {
                    format!(
                        "{} must be within {:.0}% of {} x {}",
                        field,
                        tolerance * 100.0,
                        ratio,
                        base
                    )
                }
            }
            Refinement::NotGreaterThan { field, other } => {
                format!("{} must not be greater than {}", field, other)
            }
            Refinement::Custom { description, .. } => description.clone(),
        }
    }

    /// Evaluates the constraint. Returns the offending path and message on failure.
    ///
    /// Missing operands are left to the structural checks and pass here.
    pub fn evaluate(&self, value: &Value, at: &IssuePath) -> Option<(IssuePath, String)> {
        match self {
            Refinement::Proportional {
                field,
                base,
                ratio,
                tolerance,
            } => {
                let actual = measure(lookup(value, field)?)?;
                let expected = ratio * measure(lookup(value, base)?)?;
                let allowed = (expected.abs() * tolerance).max(f64::EPSILON);
                if (actual - expected).abs() > allowed {
                    return Some((
                        field_path(at, field),
                        format!(
                            "expected {} to be {} ({} x {}), found {}",
                            field, expected, ratio, base, actual
                        ),
                    ));
                }
                None
            }
            Refinement::NotGreaterThan { field, other } => {
                let actual = measure(lookup(value, field)?)?;
                let limit = measure(lookup(value, other)?)?;
                if actual > limit {
                    return Some((
                        field_path(at, field),
                        format!("{} ({}) must not exceed {} ({})", field, actual, other, limit),
                    ));
                }
                None
            }
            Refinement::Custom { check, .. } => check(value).map(|message| (at.clone(), message)),
        }
    }
}

impl fmt::Debug for Refinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refinement::Custom { description, .. } => f
                .debug_struct("Custom")
                .field("description", description)
                .finish_non_exhaustive(),
            other => f.write_str(&other.describe()),
        }
    }
}

/// Resolves a dotted field reference (`meta.count`) inside `value`.
pub(crate) fn lookup<'v>(value: &'v Value, field: &str) -> Option<&'v Value> {
    field.split('.').try_fold(value, |current, key| current.get(key))
}

/// Numeric measure used by proportional and ordering refinements.
pub(crate) fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Array(items) => Some(items.len() as f64),
        Value::String(s) => Some(s.chars().count() as f64),
        _ => None,
    }
}

fn resolve_segments<'s>(schema: &'s ArtifactSchema, segments: &[PathSegment]) -> Option<&'s ArtifactSchema> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(schema);
    };

    match (schema.unwrapped(), head) {
        (ArtifactSchema::Object(spec), PathSegment::Key(key)) => {
            resolve_segments(&spec.get(key)?.schema, rest)
        }
        (ArtifactSchema::Array(spec), PathSegment::Index(_)) => resolve_segments(&spec.items, rest),
        (ArtifactSchema::OneOf(variants), _) => variants
            .iter()
            .find_map(|variant| resolve_segments(&variant.schema, segments)),
        _ => None,
    }
}

fn field_path(at: &IssuePath, field: &str) -> IssuePath {
    field.split('.').fold(at.clone(), |path, key| path.key(key))
}

impl From<StringSchema> for ArtifactSchema {
    fn from(schema: StringSchema) -> Self {
        ArtifactSchema::String(schema)
    }
}

impl From<NumberSchema> for ArtifactSchema {
    fn from(schema: NumberSchema) -> Self {
        ArtifactSchema::Number(schema)
    }
}

impl From<ArraySchema> for ArtifactSchema {
    fn from(schema: ArraySchema) -> Self {
        ArtifactSchema::Array(schema)
    }
}

impl From<ObjectSchema> for ArtifactSchema {
    fn from(schema: ObjectSchema) -> Self {
        ArtifactSchema::Object(schema)
    }
}

impl From<RefinedSchema> for ArtifactSchema {
    fn from(schema: RefinedSchema) -> Self {
        ArtifactSchema::Refined(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_refine_wraps_once() {
        let schema = ArtifactSchema::from(ArtifactSchema::object().required("a", ArtifactSchema::integer()))
            .refine(Refinement::not_greater_than("a", "b"))
            .refine(Refinement::proportional("a", "b", 1.0, 0.0));

        match &schema {
            ArtifactSchema::Refined(refined) => {
                assert_eq!(refined.refinements.len(), 2);
                assert!(matches!(*refined.inner, ArtifactSchema::Object(_)));
            }
            other => panic!("expected refined schema, got {:?}", other),
        }
        assert_eq!(schema.expected_kind(), Some(ValueKind::Object));
    }

    #[test]
    fn test_accepts_kind_through_union() {
        let schema = ArtifactSchema::one_of([
            ("list", ArtifactSchema::from(ArtifactSchema::array_of(ArtifactSchema::string()))),
            ("single", ArtifactSchema::from(ArtifactSchema::string())),
        ]);
        assert!(schema.accepts_kind(ValueKind::Array));
        assert!(schema.accepts_kind(ValueKind::String));
        assert!(!schema.accepts_kind(ValueKind::Object));
    }

    #[test]
    fn test_resolve_through_wrappers() {
        let lesson: ArtifactSchema = ArtifactSchema::object()
            .required("title", ArtifactSchema::string().max_len(80))
            .into();
        let schema = ArtifactSchema::one_of([
            ("bare", ArtifactSchema::from(ArtifactSchema::array_of(lesson.clone()))),
            (
                "wrapped",
                ArtifactSchema::from(
                    ArtifactSchema::object().required("lessons", ArtifactSchema::array_of(lesson)),
                )
                .refine(Refinement::not_greater_than("a", "b")),
            ),
        ]);

        let path: IssuePath = "lessons[2].title".parse().unwrap();
        match schema.resolve(&path) {
            Some(ArtifactSchema::String(spec)) => assert_eq!(spec.max_len, Some(80)),
            other => panic!("expected string schema, got {:?}", other),
        }

        let path: IssuePath = "$[0]".parse().unwrap();
        assert_eq!(schema.resolve(&path).and_then(|s| s.expected_kind()), Some(ValueKind::Object));
        assert!(schema.resolve(&"missing".parse().unwrap()).is_none());
    }

    #[test]
    fn test_proportional_refinement() {
        let rule = Refinement::proportional("lessons", "lesson_count", 1.0, 0.0);
        let ok = json!({"lesson_count": 2, "lessons": ["a", "b"]});
        let bad = json!({"lesson_count": 3, "lessons": ["a", "b"]});
        assert!(rule.evaluate(&ok, &IssuePath::root()).is_none());

        let (path, message) = rule.evaluate(&bad, &IssuePath::root()).unwrap();
        assert_eq!(path.to_string(), "lessons");
        assert!(message.contains("expected lessons to be 3"));
    }

    #[test]
    fn test_proportional_tolerance() {
        let rule = Refinement::proportional("word_count", "target_words", 1.0, 0.1);
        let within = json!({"word_count": 95, "target_words": 100});
        let outside = json!({"word_count": 80, "target_words": 100});
        assert!(rule.evaluate(&within, &IssuePath::root()).is_none());
        assert!(rule.evaluate(&outside, &IssuePath::root()).is_some());
    }

    #[test]
    fn test_missing_operands_pass() {
        let rule = Refinement::not_greater_than("a", "b");
        assert!(rule.evaluate(&json!({"a": 5}), &IssuePath::root()).is_none());
    }

    #[test]
    fn test_custom_refinement() {
        let rule = Refinement::custom("title must not be shouted", |value| {
            let title = value.get("title")?.as_str()?;
            (title == title.to_uppercase()).then(|| "title is all caps".to_string())
        });
        assert!(rule.evaluate(&json!({"title": "Intro"}), &IssuePath::root()).is_none());
        assert!(rule.evaluate(&json!({"title": "INTRO"}), &IssuePath::root()).is_some());
        assert!(format!("{:?}", rule).contains("shouted"));
    }
}
