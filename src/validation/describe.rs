//! Human-readable shape descriptions for generator prompts.
//!
//! Descriptions are derived from the same [`ArtifactSchema`] the validator
//! enforces. Refinement wrappers are looked through: the structure underneath
//! is described in full, then the constraints are listed.

use super::schema::{ArtifactSchema, NumberSchema, Refinement, StringSchema};

/// Renders `schema` as an indented, JSON-like outline.
///
/// ```
/// use course_forge::validation::{describe, ArtifactSchema};
///
/// let schema: ArtifactSchema = ArtifactSchema::object()
///     .required("title", ArtifactSchema::string().max_len(80))
///     .into();
/// assert_eq!(describe(&schema), "{\n  \"title\": string (at most 80 chars), required\n}");
/// ```
pub fn describe(schema: &ArtifactSchema) -> String {
    let mut constraints = Vec::new();
    let mut out = String::new();
    render(schema, 0, "", &mut out, &mut constraints);

    if !constraints.is_empty() {
        out.push_str("\nConstraints:");
        for constraint in constraints {
            out.push_str("\n- ");
            out.push_str(&constraint);
        }
    }
    out
}

fn render(
    schema: &ArtifactSchema,
    depth: usize,
    scope: &str,
    out: &mut String,
    constraints: &mut Vec<String>,
) {
    match schema {
        ArtifactSchema::String(spec) => out.push_str(&describe_string(spec)),
        ArtifactSchema::Number(spec) => out.push_str(&describe_number(spec)),
        ArtifactSchema::Boolean => out.push_str("boolean"),
        ArtifactSchema::Array(spec) => {
            out.push_str("array of ");
            let item_scope = format!("{}[]", scope);
            render(&spec.items, depth, &item_scope, out, constraints);
            match (spec.min_items, spec.max_items) {
                (Some(min), Some(max)) if min == max => out.push_str(&format!(" (exactly {} items)", min)),
                (Some(min), Some(max)) => out.push_str(&format!(" ({}-{} items)", min, max)),
                (Some(min), None) => out.push_str(&format!(" (at least {} items)", min)),
                (None, Some(max)) => out.push_str(&format!(" (at most {} items)", max)),
                (None, None) => {}
            }
        }
        ArtifactSchema::Object(spec) => {
            if spec.fields.is_empty() {
                out.push_str("object");
                return;
            }
            let indent = "  ".repeat(depth + 1);
            out.push_str("{\n");
            for (i, field) in spec.fields.iter().enumerate() {
                out.push_str(&format!("{}\"{}\": ", indent, field.name));
                let field_scope = if scope.is_empty() {
                    field.name.clone()
                } else {
                    format!("{}.{}", scope, field.name)
                };
                render(&field.schema, depth + 1, &field_scope, out, constraints);
                out.push_str(if field.required { ", required" } else { ", optional" });
                if let Some(description) = &field.description {
                    out.push_str(&format!(" - {}", description));
                }
                if i + 1 < spec.fields.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            out.push_str(&"  ".repeat(depth));
            out.push('}');
            if spec.deny_unknown {
                constraints.push(format!("{}no fields other than those listed", scope_prefix(scope)));
            }
        }
        ArtifactSchema::Refined(spec) => {
            render(&spec.inner, depth, scope, out, constraints);
            constraints.extend(
                spec.refinements
                    .iter()
                    .map(|refinement| format!("{}{}", scope_prefix(scope), describe_refinement(refinement))),
            );
        }
        ArtifactSchema::OneOf(variants) => {
            out.push_str("one of:");
            let indent = "  ".repeat(depth + 1);
            for variant in variants {
                out.push_str(&format!("\n{}- {}: ", indent, variant.label));
                render(&variant.schema, depth + 1, scope, out, constraints);
            }
        }
    }
}

fn describe_string(spec: &StringSchema) -> String {
    if let Some(allowed) = &spec.allowed {
        let quoted: Vec<String> = allowed.iter().map(|value| format!("\"{}\"", value)).collect();
        return format!("one of {}", quoted.join(" | "));
    }
    match (spec.min_len, spec.max_len) {
        (Some(min), Some(max)) => format!("string ({}-{} chars)", min, max),
        (Some(min), None) => format!("string (at least {} chars)", min),
        (None, Some(max)) => format!("string (at most {} chars)", max),
        (None, None) => "string".to_string(),
    }
}

fn describe_number(spec: &NumberSchema) -> String {
    let kind = if spec.integer { "integer" } else { "number" };
    match (spec.min, spec.max) {
        (Some(min), Some(max)) => format!("{} ({} to {})", kind, min, max),
        (Some(min), None) => format!("{} (>= {})", kind, min),
        (None, Some(max)) => format!("{} (<= {})", kind, max),
        (None, None) => kind.to_string(),
    }
}

fn describe_refinement(refinement: &Refinement) -> String {
    refinement.describe()
}

fn scope_prefix(scope: &str) -> String {
    if scope.is_empty() {
        String::new()
    } else {
        format!("within {}: ", scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson() -> ArtifactSchema {
        ArtifactSchema::object()
            .required("title", ArtifactSchema::string().min_len(3).max_len(80))
            .required("minutes", ArtifactSchema::integer().range(1.0, 120.0))
            .into()
    }

    #[test]
    fn test_describe_nested_object() {
        let schema: ArtifactSchema = ArtifactSchema::object()
            .described("title", ArtifactSchema::string(), "module title")
            .optional("lessons", ArtifactSchema::array_of(lesson()).min_items(1))
            .into();

        let text = describe(&schema);
        assert!(text.contains("\"title\": string, required - module title"));
        assert!(text.contains("\"lessons\": array of {"));
        assert!(text.contains("\"minutes\": integer (1 to 120), required"));
        assert!(text.contains("(at least 1 items), optional"));
    }

    #[test]
    fn test_describe_unwraps_refined_schema() {
        let bare: ArtifactSchema = ArtifactSchema::object()
            .required("lesson_count", ArtifactSchema::integer())
            .required("lessons", ArtifactSchema::array_of(lesson()))
            .into();
        let wrapped = bare
            .clone()
            .refine(Refinement::proportional("lessons", "lesson_count", 1.0, 0.0));

        let bare_text = describe(&bare);
        let wrapped_text = describe(&wrapped);
        assert!(wrapped_text.starts_with(&bare_text));
        assert!(wrapped_text.contains("\"title\": string (3-80 chars)"));
        assert!(wrapped_text.contains("Constraints:\n- lessons must equal 1 x lesson_count"));
    }

    #[test]
    fn test_describe_nested_refinement_is_scoped() {
        let module = ArtifactSchema::from(
            ArtifactSchema::object()
                .required("lesson_count", ArtifactSchema::integer())
                .required("lessons", ArtifactSchema::array_of(lesson())),
        )
        .refine(Refinement::proportional("lessons", "lesson_count", 1.0, 0.0));
        let schema: ArtifactSchema = ArtifactSchema::object()
            .required("modules", ArtifactSchema::array_of(module))
            .into();

        let text = describe(&schema);
        assert!(text.contains("\"lesson_count\": integer, required"));
        assert!(text.contains("- within modules[]: lessons must equal 1 x lesson_count"));
    }

    #[test]
    fn test_describe_union() {
        let schema = ArtifactSchema::one_of([
            ("bare list", ArtifactSchema::from(ArtifactSchema::array_of(ArtifactSchema::string()))),
            ("single", ArtifactSchema::from(ArtifactSchema::string().one_of(["a", "b"]))),
        ]);
        let text = describe(&schema);
        assert!(text.contains("- bare list: array of string"));
        assert!(text.contains("- single: one of \"a\" | \"b\""));
    }
}
