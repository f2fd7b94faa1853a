//! Catalog of the course artifacts each stage gates on.
//!
//! The schemas here are the single source of truth for both validation and
//! the shape descriptions shown to the generator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::handler::{GeneratorStageHandler, StageHandler};
use super::stage::PipelineStep;
use crate::llm::{GenerationOptions, Generator};
use crate::validation::{ArtifactSchema, Refinement};

/// Course artifacts known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Summary,
    LearningOutcomes,
    StructureAnalysis,
    SectionMetadata,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Summary,
        ArtifactKind::LearningOutcomes,
        ArtifactKind::StructureAnalysis,
        ArtifactKind::SectionMetadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Summary => "summary",
            ArtifactKind::LearningOutcomes => "learning-outcomes",
            ArtifactKind::StructureAnalysis => "structure-analysis",
            ArtifactKind::SectionMetadata => "section-metadata",
        }
    }

    pub fn schema(&self) -> ArtifactSchema {
        match self {
            ArtifactKind::Summary => summary(),
            ArtifactKind::LearningOutcomes => learning_outcomes(),
            ArtifactKind::StructureAnalysis => structure_analysis(),
            ArtifactKind::SectionMetadata => section_metadata(),
        }
    }

    /// The artifact a step produces. Document processing and finalization
    /// produce none.
    pub fn for_step(step: PipelineStep) -> Option<Self> {
        match step {
            PipelineStep::Summarization => Some(ArtifactKind::Summary),
            PipelineStep::StructureAnalysis => Some(ArtifactKind::StructureAnalysis),
            PipelineStep::SectionGeneration => Some(ArtifactKind::SectionMetadata),
            PipelineStep::DocumentProcessing | PipelineStep::Finalization => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown artifact '{}', expected one of: {}",
                    s,
                    Self::ALL.map(|kind| kind.as_str()).join(", ")
                )
            })
    }
}

// ============================================================================
// Schemas
// ============================================================================

fn outcome_text() -> ArtifactSchema {
    ArtifactSchema::string().min_len(3).max_len(300).into()
}

fn outcome_list() -> ArtifactSchema {
    ArtifactSchema::array_of(outcome_text())
        .min_items(1)
        .max_items(12)
        .into()
}

/// Learning outcomes as plain strings.
///
/// Generators return these as a bare array, as `{"outcomes": [...]}`, or as
/// a single sentence. All three are accepted.
pub fn learning_outcomes() -> ArtifactSchema {
    ArtifactSchema::one_of([
        ("list", outcome_list()),
        (
            "wrapped",
            ArtifactSchema::object()
                .required("outcomes", outcome_list())
                .into(),
        ),
        ("single", outcome_text()),
    ])
}

/// Output of the summarization step.
pub fn summary() -> ArtifactSchema {
    ArtifactSchema::object()
        .described("title", ArtifactSchema::string().min_len(1).max_len(200), "course title")
        .described(
            "summary",
            ArtifactSchema::string().min_len(20).max_len(4000),
            "a few paragraphs covering the source material",
        )
        .required(
            "key_points",
            ArtifactSchema::array_of(ArtifactSchema::string().min_len(1))
                .min_items(1)
                .max_items(15),
        )
        .optional(
            "reading_time_minutes",
            ArtifactSchema::integer().range(1.0, 600.0),
        )
        .into()
}

/// Output of the structure analysis step.
pub fn structure_analysis() -> ArtifactSchema {
    let module: ArtifactSchema = ArtifactSchema::object()
        .required("title", ArtifactSchema::string().min_len(1).max_len(200))
        .required("summary", ArtifactSchema::string().min_len(1))
        .required(
            "topics",
            ArtifactSchema::array_of(ArtifactSchema::string().min_len(1)).min_items(1),
        )
        .into();

    ArtifactSchema::object()
        .required("modules", ArtifactSchema::array_of(module).min_items(1).max_items(30))
        .required(
            "difficulty",
            ArtifactSchema::string().one_of(["beginner", "intermediate", "advanced"]),
        )
        .required("learning_outcomes", learning_outcomes())
        .optional("estimated_hours", ArtifactSchema::number().min(0.0))
        .into()
}

/// Output of the section generation step.
///
/// Every section states its lesson count, which must match its lessons.
pub fn section_metadata() -> ArtifactSchema {
    let lesson: ArtifactSchema = ArtifactSchema::object()
        .required("title", ArtifactSchema::string().min_len(1).max_len(200))
        .required("objective", ArtifactSchema::string().min_len(1))
        .required("duration_minutes", ArtifactSchema::integer().range(1.0, 240.0))
        .into();

    let section = ArtifactSchema::from(
        ArtifactSchema::object()
            .required("title", ArtifactSchema::string().min_len(1).max_len(200))
            .required("lesson_count", ArtifactSchema::integer().min(1.0))
            .required("lessons", ArtifactSchema::array_of(lesson).min_items(1)),
    )
    .refine(Refinement::proportional("lessons", "lesson_count", 1.0, 0.0));

    ArtifactSchema::object()
        .required("sections", ArtifactSchema::array_of(section).min_items(1))
        .into()
}

// ============================================================================
// Default handlers
// ============================================================================

const SUMMARY_PROMPT: &str = r#"You are preparing an online course from the source material below.

Source material:
{{ document_text }}

Write a summary of the material for course authors.
Reply with JSON of this shape:
{{ shape }}"#;

const STRUCTURE_PROMPT: &str = r#"You are designing the structure of an online course.

Course summary:
{{ summary }}

Split the course into modules, estimate its difficulty and list its learning outcomes.
Reply with JSON of this shape:
{{ shape }}"#;

const SECTION_PROMPT: &str = r#"You are writing the section plan of an online course.

Course structure:
{{ structure }}

Turn every module into a section with concrete lessons.
Reply with JSON of this shape:
{{ shape }}"#;

/// Generator-backed handlers for summarization, structure analysis and
/// section generation.
///
/// Document processing is done by the ingestion service at upload time, so no
/// handler is provided for it.
pub fn default_handlers(
    generator: Arc<dyn Generator>,
    options: GenerationOptions,
) -> Vec<Arc<dyn StageHandler>> {
    [
        (PipelineStep::Summarization, SUMMARY_PROMPT),
        (PipelineStep::StructureAnalysis, STRUCTURE_PROMPT),
        (PipelineStep::SectionGeneration, SECTION_PROMPT),
    ]
    .into_iter()
    .filter_map(|(step, template)| {
        let kind = ArtifactKind::for_step(step)?;
        let handler = GeneratorStageHandler::new(step, kind.schema(), template, Arc::clone(&generator))
            .with_options(options.clone());
        Some(Arc::new(handler) as Arc<dyn StageHandler>)
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{describe, validate};
    use serde_json::json;

    #[test]
    fn test_learning_outcomes_shapes() {
        let schema = learning_outcomes();
        assert!(validate(&schema, &json!(["Explain X", "Explain Y"])).valid);
        assert!(validate(&schema, &json!({"outcomes": ["Explain X"]})).valid);
        assert!(validate(&schema, &json!("Explain photosynthesis")).valid);
    }

    #[test]
    fn test_learning_outcomes_objects_report_each_element() {
        let report = validate(
            &learning_outcomes(),
            &json!({"outcomes": [{"text": "Explain X"}, {"text": "Explain Y"}]}),
        );
        assert!(!report.valid);
        let paths: Vec<String> = report.issues.iter().map(|issue| issue.path.to_string()).collect();
        assert_eq!(paths, vec!["outcomes[0]", "outcomes[1]"]);
    }

    #[test]
    fn test_section_lesson_count_must_match() {
        let schema = section_metadata();
        let lesson = json!({"title": "Light", "objective": "Describe light", "duration_minutes": 20});

        let good = json!({"sections": [{"title": "Basics", "lesson_count": 1, "lessons": [lesson]}]});
        assert!(validate(&schema, &good).valid);

        let bad = json!({"sections": [{"title": "Basics", "lesson_count": 3, "lessons": [lesson]}]});
        let report = validate(&schema, &bad);
        assert!(!report.valid);
        assert_eq!(report.issues[0].path.to_string(), "sections[0].lessons");
    }

    #[test]
    fn test_section_refinement_still_checks_fields() {
        let bad = json!({"sections": [{
            "title": "Basics",
            "lesson_count": 1,
            "lessons": [{"title": "Light", "objective": "Describe light", "duration_minutes": "twenty"}]
        }]});
        let report = validate(&section_metadata(), &bad);
        assert_eq!(
            report.issues[0].path.to_string(),
            "sections[0].lessons[0].duration_minutes"
        );
    }

    #[test]
    fn test_describe_lists_section_fields_and_constraint() {
        let text = describe(&section_metadata());
        assert!(text.contains("lesson_count"));
        assert!(text.contains("duration_minutes"));
        assert!(text.contains("lessons must equal 1 x lesson_count"));
    }

    #[test]
    fn test_structure_analysis_difficulty_enum() {
        let value = json!({
            "modules": [{"title": "Intro", "summary": "Basics", "topics": ["cells"]}],
            "difficulty": "expert",
            "learning_outcomes": ["Explain cells"]
        });
        let report = validate(&structure_analysis(), &value);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].path.to_string(), "difficulty");
    }

    #[test]
    fn test_artifact_kind_parsing() {
        assert_eq!(
            "learning_outcomes".parse::<ArtifactKind>().unwrap(),
            ArtifactKind::LearningOutcomes
        );
        assert_eq!("Summary".parse::<ArtifactKind>().unwrap(), ArtifactKind::Summary);
        assert!("slides".parse::<ArtifactKind>().is_err());
    }

    #[test]
    fn test_for_step() {
        assert_eq!(
            ArtifactKind::for_step(PipelineStep::SectionGeneration),
            Some(ArtifactKind::SectionMetadata)
        );
        assert_eq!(ArtifactKind::for_step(PipelineStep::DocumentProcessing), None);
    }
}
