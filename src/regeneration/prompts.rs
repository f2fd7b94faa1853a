//! Prompt templates for generator-backed repair strategies.
//!
//! Rendered with Tera one-off templates. The shape description is always
//! produced by `validation::describe` from the schema being enforced.

use serde::Serialize;
use tera::{Context, Tera};

use crate::validation::ValidationIssue;

/// Asks the generator to fix only the flagged fields of its previous output.
pub const CRITIQUE_TEMPLATE: &str = r#"{{ original_prompt }}

Your previous response did not match the required output shape.

Previous response:
{{ previous_output }}

Validation issues:
{% for issue in issues %}- {{ issue.path }}: {{ issue.message }}
{% endfor %}
Required shape:
{{ shape }}

Fix ONLY the fields listed under "Validation issues". Keep every other field exactly as it was.
Reply with the corrected JSON only."#;

/// Asks the generator to regenerate a single array element.
pub const ELEMENT_TEMPLATE: &str = r#"{{ original_prompt }}

One element of your previous response is invalid. It is located at `{{ path }}`:
{{ element }}

Validation issues for this element:
{% for issue in issues %}- {{ issue.path }}: {{ issue.message }}
{% endfor %}
Required shape for this element:
{{ shape }}

Reply with the corrected element as JSON only, not the whole document."#;

/// Full regeneration on the escalated model.
pub const ESCALATION_TEMPLATE: &str = r#"{{ original_prompt }}

Your answer MUST be a single JSON document with exactly this shape:
{{ shape }}
{% if issues %}
A previous attempt failed with these problems, avoid them:
{% for issue in issues %}- {{ issue.path }}: {{ issue.message }}
{% endfor %}{% endif %}
Reply with the JSON only."#;

#[derive(Serialize)]
struct IssueLine<'a> {
    path: String,
    message: &'a str,
}

fn issue_lines(issues: &[ValidationIssue]) -> Vec<IssueLine<'_>> {
    issues
        .iter()
        .map(|issue| IssueLine {
            path: issue.path.to_string(),
            message: &issue.message,
        })
        .collect()
}

pub fn render_critique(
    original_prompt: &str,
    previous_output: &str,
    issues: &[ValidationIssue],
    shape: &str,
) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("original_prompt", original_prompt);
    context.insert("previous_output", previous_output);
    context.insert("issues", &issue_lines(issues));
    context.insert("shape", shape);
    Tera::one_off(CRITIQUE_TEMPLATE, &context, false)
}

pub fn render_element(
    original_prompt: &str,
    path: &str,
    element: &str,
    issues: &[ValidationIssue],
    shape: &str,
) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("original_prompt", original_prompt);
    context.insert("path", path);
    context.insert("element", element);
    context.insert("issues", &issue_lines(issues));
    context.insert("shape", shape);
    Tera::one_off(ELEMENT_TEMPLATE, &context, false)
}

pub fn render_escalation(
    original_prompt: &str,
    shape: &str,
    issues: &[ValidationIssue],
) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("original_prompt", original_prompt);
    context.insert("shape", shape);
    context.insert("issues", &issue_lines(issues));
    Tera::one_off(ESCALATION_TEMPLATE, &context, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::IssuePath;

    fn issues() -> Vec<ValidationIssue> {
        vec![
            ValidationIssue::new(
                IssuePath::root().key("outcomes").index(0),
                "expected string, found object",
            ),
            ValidationIssue::new(
                IssuePath::root().key("outcomes").index(1),
                "expected string, found object",
            ),
        ]
    }

    #[test]
    fn test_render_critique_lists_issues() {
        let prompt = render_critique(
            "List the learning outcomes.",
            r#"{"outcomes": [{"text": "a"}]}"#,
            &issues(),
            "array of string",
        )
        .unwrap();

        assert!(prompt.starts_with("List the learning outcomes."));
        assert!(prompt.contains("- outcomes[0]: expected string, found object\n"));
        assert!(prompt.contains("- outcomes[1]: expected string, found object\n"));
        assert!(prompt.contains(r#"{"outcomes": [{"text": "a"}]}"#));
        assert!(prompt.contains("Fix ONLY the fields"));
    }

    #[test]
    fn test_render_element() {
        let prompt = render_element("p", "modules[2]", "{\"title\": 4}", &issues()[..1], "{...}")
            .unwrap();
        assert!(prompt.contains("located at `modules[2]`"));
        assert!(prompt.contains("{\"title\": 4}"));
    }

    #[test]
    fn test_render_escalation_without_issues() {
        let prompt = render_escalation("p", "array of string", &[]).unwrap();
        assert!(prompt.contains("exactly this shape:\narray of string"));
        assert!(!prompt.contains("previous attempt"));
    }
}
