//! JSON extraction and structural repair for generator output.
//!
//! Generators rarely return bare JSON. Responses arrive wrapped in markdown
//! fences, preceded by prose, cut off mid-array when a token budget runs out,
//! or sprinkled with trailing commas. This module recovers the JSON payload
//! from such text without knowing anything about the expected shape.
//!
//! # Extraction order
//!
//! 1. Fenced code block (```` ```json ```` first, then any fence)
//! 2. Content that already starts with `{` or `[`
//! 3. The largest balanced object or array anywhere in the text
//! 4. Truncation detection on the first opening delimiter
//!
//! # Example
//!
//! ```
//! use course_forge::utils::json_extraction::repair_json_text;
//!
//! let raw = "Here you go:\n```json\n{\"outcomes\": [\"Explain X\", \"Explain Y\",]}\n```";
//! let fixed = repair_json_text(raw).unwrap();
//! assert_eq!(fixed, r#"{"outcomes": ["Explain X", "Explain Y"]}"#);
//! ```

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

static JSON_FENCE: OnceLock<Option<Regex>> = OnceLock::new();
static ANY_FENCE: OnceLock<Option<Regex>> = OnceLock::new();

/// Error type for JSON extraction failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated with {unclosed} unclosed delimiters. Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed: usize,
    },
    #[error("No JSON content found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
}

/// Result of a JSON extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtraction {
    /// A complete, parseable JSON document.
    Complete(String),
    /// JSON was started but never finished.
    Truncated {
        partial_json: String,
        analysis: JsonStructureAnalysis,
    },
    /// Nothing JSON-like in the text.
    NotFound,
}

impl JsonExtraction {
    pub fn is_complete(&self) -> bool {
        matches!(self, JsonExtraction::Complete(_))
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, JsonExtraction::Truncated { .. })
    }

    /// Converts the extraction into a `Result`, previewing `content` on failure.
    pub fn into_result(self, content: &str) -> Result<String, JsonExtractionError> {
        match self {
            JsonExtraction::Complete(json) => Ok(json),
            JsonExtraction::Truncated {
                partial_json,
                analysis,
            } => Err(JsonExtractionError::Truncated {
                partial_preview: preview(&partial_json, 100),
                unclosed: analysis.open_delimiters.len(),
            }),
            JsonExtraction::NotFound => Err(JsonExtractionError::NotFound {
                content_preview: preview(content.trim(), 50),
            }),
        }
    }
}

/// Delimiter bookkeeping from a single left-to-right scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JsonStructureAnalysis {
    /// Opening delimiters still waiting for their closer, innermost last.
    pub open_delimiters: Vec<char>,
    /// Whether the scan ended inside a string literal.
    pub in_string: bool,
    /// Byte offset of the first `{` or `[`.
    pub json_start: Option<usize>,
    /// Closers that had no matching opener.
    pub stray_closers: usize,
}

impl JsonStructureAnalysis {
    pub fn unclosed_braces(&self) -> usize {
        self.open_delimiters.iter().filter(|c| **c == '{').count()
    }

    pub fn unclosed_brackets(&self) -> usize {
        self.open_delimiters.iter().filter(|c| **c == '[').count()
    }

    pub fn is_balanced(&self) -> bool {
        self.open_delimiters.is_empty() && !self.in_string
    }
}

/// Scans `s` tracking string literals and the stack of open delimiters.
pub fn analyze_json_structure(s: &str) -> JsonStructureAnalysis {
    let mut analysis = JsonStructureAnalysis::default();
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if analysis.in_string => escape_next = true,
            '"' => analysis.in_string = !analysis.in_string,
            '{' | '[' if !analysis.in_string => {
                analysis.json_start.get_or_insert(i);
                analysis.open_delimiters.push(c);
            }
            '}' | ']' if !analysis.in_string => {
                let opener = if c == '}' { '{' } else { '[' };
                if analysis.open_delimiters.last() == Some(&opener) {
                    analysis.open_delimiters.pop();
                } else {
                    analysis.stray_closers += 1;
                }
            }
            _ => {}
        }
    }

    analysis
}

/// Finds the index of the delimiter closing the one at the start of `s`.
///
/// `s` must start with `{` or `[`. Nested delimiters of either kind and
/// string literals (including escaped quotes) are skipped.
pub fn find_matching_close(s: &str) -> Option<usize> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => stack.push(c),
            '}' | ']' if !in_string => {
                let opener = if c == '}' { '{' } else { '[' };
                if stack.pop() != Some(opener) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Returns the body of the first fenced code block, preferring ```` ```json ````.
pub fn extract_code_block(content: &str) -> Option<&str> {
    let json_fence = JSON_FENCE
        .get_or_init(|| Regex::new(r"```(?:json|JSON)\s*\n?([\s\S]*?)\n?```").ok())
        .as_ref();
    let any_fence = ANY_FENCE
        .get_or_init(|| Regex::new(r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```").ok())
        .as_ref();

    for re in [json_fence, any_fence].into_iter().flatten() {
        if let Some(body) = re.captures(content).and_then(|caps| caps.get(1)) {
            let body = body.as_str().trim();
            if body.starts_with('{') || body.starts_with('[') {
                return Some(body);
            }
        }
    }

    None
}

/// Extracts the JSON document embedded in generator output.
pub fn extract_json(content: &str) -> JsonExtraction {
    let trimmed = content.trim();

    let fenced = extract_code_block(trimmed);
    for candidate in fenced.into_iter().chain(std::iter::once(trimmed)) {
        if candidate.starts_with('{') || candidate.starts_with('[') {
            if let Some(end) = find_matching_close(candidate) {
                let json = &candidate[..=end];
                if parses(json) {
                    return JsonExtraction::Complete(json.to_string());
                }
            }
        }
    }

    if let Some(json) = largest_valid_document(trimmed) {
        return JsonExtraction::Complete(json);
    }

    // Unterminated fences are common when the token budget runs out.
    let source = fenced.unwrap_or(trimmed);
    let source = source
        .find("```")
        .map(|idx| source[idx + 3..].trim_start_matches(|c: char| c.is_alphanumeric()))
        .filter(|rest| rest.trim_start().starts_with(['{', '[']))
        .unwrap_or(source);

    let analysis = analyze_json_structure(source);
    match analysis.json_start {
        Some(start) if !analysis.is_balanced() => {
            let partial = &source[start..];
            JsonExtraction::Truncated {
                partial_json: partial.to_string(),
                analysis: analyze_json_structure(partial),
            }
        }
        _ => JsonExtraction::NotFound,
    }
}

/// Finds the largest parseable object or array, preferring later ones on ties.
///
/// Reasoning-style output often contains small JSON fragments in the prose
/// before the real answer, which is usually the largest document.
fn largest_valid_document(content: &str) -> Option<String> {
    let mut best: Option<&str> = None;
    // Anything opening inside a valid document is smaller than it.
    let mut skip_until = 0;

    for (start, c) in content.char_indices() {
        if start < skip_until || (c != '{' && c != '[') {
            continue;
        }
        let rest = &content[start..];
        let Some(end) = find_matching_close(rest) else {
            continue;
        };
        let candidate = &rest[..=end];
        if !parses(candidate) {
            continue;
        }
        skip_until = start + end + 1;
        if best.map_or(true, |current| candidate.len() >= current.len()) {
            best = Some(candidate);
        }
    }

    best.map(str::to_string)
}

/// Removes commas directly preceding `}` or `]`, leaving string contents alone.
pub fn strip_trailing_commas(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape_next = false;
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if escape_next {
            escape_next = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            ',' if !in_string => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if matches!(next, Some('}') | Some(']')) {
                    continue;
                }
            }
            _ => {}
        }
        out.push(c);
    }

    out
}

/// Closes an unterminated string and every open delimiter, innermost first.
///
/// A dangling `,` or `:` left at the cut point is dropped; a key whose value
/// never arrived gets `null`.
pub fn close_unbalanced(s: &str) -> String {
    let analysis = analyze_json_structure(s);
    if analysis.is_balanced() {
        return s.to_string();
    }

    let mut out = s.trim_end().to_string();
    if analysis.in_string {
        if out.ends_with('\\') {
            out.pop();
        }
        out.push('"');
    }

    loop {
        let trimmed = out.trim_end();
        if let Some(stripped) = trimmed.strip_suffix(',') {
            out = stripped.to_string();
        } else if trimmed.ends_with(':') {
            out = format!("{} null", trimmed);
            break;
        } else {
            break;
        }
    }

    for opener in analysis.open_delimiters.iter().rev() {
        out.push(if *opener == '{' { '}' } else { ']' });
    }

    out
}

/// Recovers a parseable JSON document from raw generator text.
///
/// Returns `None` when the text holds nothing JSON-like or the repaired text
/// still does not parse.
pub fn repair_json_text(content: &str) -> Option<String> {
    let candidate = match extract_json(content) {
        JsonExtraction::Complete(json) => return Some(json),
        JsonExtraction::Truncated { partial_json, .. } => partial_json,
        JsonExtraction::NotFound => {
            // Balanced but unparseable, usually trailing commas.
            let trimmed = content.trim();
            let start = trimmed.find(['{', '['])?;
            trimmed[start..].to_string()
        }
    };

    let repaired = close_unbalanced(&strip_trailing_commas(&candidate));
    let repaired = strip_trailing_commas(&repaired);
    if parses(&repaired) {
        return Some(repaired);
    }

    // Cut at the closer of the first document and retry once.
    let end = find_matching_close(&repaired)?;
    let head = &repaired[..=end];
    parses(head).then(|| head.to_string())
}

fn parses(s: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(s).is_ok()
}

fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_direct_object() {
        let result = extract_json(r#"{"title": "Intro"}"#);
        assert_eq!(result, JsonExtraction::Complete(r#"{"title": "Intro"}"#.to_string()));
    }

    #[test]
    fn test_extract_direct_array() {
        let result = extract_json(r#"  ["a", "b"]  "#);
        assert_eq!(result, JsonExtraction::Complete(r#"["a", "b"]"#.to_string()));
    }

    #[test]
    fn test_extract_from_json_fence() {
        let content = "Sure!\n```json\n{\"outcomes\": [\"Explain X\"]}\n```\nAnything else?";
        let result = extract_json(content);
        assert_eq!(
            result,
            JsonExtraction::Complete(r#"{"outcomes": ["Explain X"]}"#.to_string())
        );
    }

    #[test]
    fn test_extract_array_from_generic_fence() {
        let content = "```\n[1, 2, 3]\n```";
        assert_eq!(
            extract_json(content),
            JsonExtraction::Complete("[1, 2, 3]".to_string())
        );
    }

    #[test]
    fn test_extract_prefers_largest_document() {
        let content = r#"For example {"a": 1} would be wrong. Final answer: {"title": "Intro", "minutes": 5}"#;
        assert_eq!(
            extract_json(content),
            JsonExtraction::Complete(r#"{"title": "Intro", "minutes": 5}"#.to_string())
        );
    }

    #[test]
    fn test_largest_document_ignores_nested_and_prefers_bigger_later_one() {
        let nested = r#"{"a": {"b": [1, {"c": 2}]}}"#;
        assert_eq!(largest_valid_document(nested).as_deref(), Some(nested));

        let content = r#"First {"x": {"y": 1}} then {"modules": [{"title": "Intro"}, {"title": "Cells"}]} done"#;
        assert_eq!(
            largest_valid_document(content).as_deref(),
            Some(r#"{"modules": [{"title": "Intro"}, {"title": "Cells"}]}"#)
        );
    }

    #[test]
    fn test_largest_document_looks_inside_invalid_outer() {
        let content = r#"{oops {"title": "Intro"} }"#;
        assert_eq!(
            largest_valid_document(content).as_deref(),
            Some(r#"{"title": "Intro"}"#)
        );
    }

    #[test]
    fn test_largest_document_handles_deep_nesting() {
        let depth = 100;
        let content = format!("{}{}", "[".repeat(depth), "]".repeat(depth));
        assert_eq!(largest_valid_document(&content), Some(content.clone()));
    }

    #[test]
    fn test_extract_detects_truncation() {
        let content = r#"{"outcomes": ["Explain X", "Expl"#;
        match extract_json(content) {
            JsonExtraction::Truncated { analysis, .. } => {
                assert_eq!(analysis.unclosed_braces(), 1);
                assert_eq!(analysis.unclosed_brackets(), 1);
                assert!(analysis.in_string);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_not_found() {
        assert_eq!(extract_json("no json here"), JsonExtraction::NotFound);
        let err = extract_json("no json here")
            .into_result("no json here")
            .unwrap_err();
        assert!(err.to_string().contains("no json here"));
    }

    #[test]
    fn test_find_matching_close_handles_strings() {
        let s = r#"{"text": "a } inside", "n": [1, {"x": "]"}]} trailing"#;
        let end = find_matching_close(s).unwrap();
        assert_eq!(&s[end..=end], "}");
        assert!(parses(&s[..=end]));
    }

    #[test]
    fn test_find_matching_close_mismatched() {
        assert_eq!(find_matching_close("{]"), None);
        assert_eq!(find_matching_close("{\"a\": 1"), None);
    }

    #[test]
    fn test_strip_trailing_commas() {
        assert_eq!(
            strip_trailing_commas(r#"{"a": [1, 2,], "b": "x,]",}"#),
            r#"{"a": [1, 2], "b": "x,]"}"#
        );
    }

    #[test]
    fn test_close_unbalanced_nested() {
        let closed = close_unbalanced(r#"{"modules": [{"title": "One"}, {"title": "Tw"#);
        assert_eq!(closed, r#"{"modules": [{"title": "One"}, {"title": "Tw"}]}"#);
        assert!(parses(&closed));
    }

    #[test]
    fn test_close_unbalanced_dangling_key() {
        let closed = close_unbalanced(r#"{"title": "One", "summary":"#);
        assert!(parses(&closed));
        let value: serde_json::Value = serde_json::from_str(&closed).unwrap();
        assert!(value["summary"].is_null());
    }

    #[test]
    fn test_close_unbalanced_dangling_comma() {
        let closed = close_unbalanced(r#"["a", "b","#);
        assert_eq!(closed, r#"["a", "b"]"#);
    }

    #[test]
    fn test_repair_json_text_trailing_commas() {
        let repaired = repair_json_text("{\"a\": [1, 2,],}").unwrap();
        assert_eq!(repaired, "{\"a\": [1, 2]}");
    }

    #[test]
    fn test_repair_json_text_truncated_fence() {
        let raw = "```json\n{\"outcomes\": [\"Explain X\", \"Explain Y\"";
        let repaired = repair_json_text(raw).unwrap();
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["outcomes"][1], "Explain Y");
    }

    #[test]
    fn test_repair_json_text_nothing_to_repair() {
        assert!(repair_json_text("The model refused to answer.").is_none());
    }

    #[test]
    fn test_analysis_counts_stray_closers() {
        let analysis = analyze_json_structure("{}]");
        assert_eq!(analysis.stray_closers, 1);
        assert!(analysis.open_delimiters.is_empty());
    }
}
