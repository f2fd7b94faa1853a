//! Stage handlers: the collaborators that produce raw artifacts.
//!
//! A handler never decides whether its output is good enough. The
//! orchestrator gates every [`RawArtifact`] through the regeneration engine
//! using the handler's own [`StageHandler::artifact_schema`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tera::{Context, Tera};

use super::stage::PipelineStep;
use crate::error::HandlerError;
use crate::llm::{GenerationOptions, Generator};
use crate::storage::JobSnapshot;
use crate::validation::{describe, ArtifactSchema};

/// Unvalidated handler output together with the prompt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArtifact {
    pub output: String,
    /// Passed to generator-backed repairs as the original prompt.
    pub prompt: String,
}

impl RawArtifact {
    pub fn new(output: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            prompt: prompt.into(),
        }
    }
}

/// Produces the artifact of one pipeline step.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn step(&self) -> PipelineStep;

    /// Shape the artifact must satisfy before the step may complete.
    fn artifact_schema(&self) -> ArtifactSchema;

    async fn handle(&self, job: &JobSnapshot, payload: &Value) -> Result<RawArtifact, HandlerError>;

    /// Called with the accepted artifact before the step is marked complete.
    /// Persisting it is up to the implementation.
    async fn on_accepted(&self, _job: &JobSnapshot, _artifact: &Value) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Handler that renders a prompt template from the work item payload and
/// asks a [`Generator`] for the artifact.
///
/// The payload must be a JSON object; its keys become template variables.
/// `shape` is always available and holds the schema description.
pub struct GeneratorStageHandler {
    step: PipelineStep,
    schema: ArtifactSchema,
    template: String,
    generator: Arc<dyn Generator>,
    options: GenerationOptions,
}

impl GeneratorStageHandler {
    pub fn new(
        step: PipelineStep,
        schema: ArtifactSchema,
        template: impl Into<String>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            step,
            schema,
            template: template.into(),
            generator,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Renders the prompt for `payload`.
    pub fn render_prompt(&self, payload: &Value) -> Result<String, HandlerError> {
        if !payload.is_object() {
            return Err(HandlerError::InvalidPayload(format!(
                "{} expects a JSON object payload",
                self.step
            )));
        }

        let mut context = Context::from_value(payload.clone())
            .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
        context.insert("shape", &describe(&self.schema));

        Tera::one_off(&self.template, &context, false).map_err(|e| {
            HandlerError::InvalidPayload(format!(
                "payload does not fit the {} prompt: {}",
                self.step,
                tera_error_chain(&e)
            ))
        })
    }
}

#[async_trait]
impl StageHandler for GeneratorStageHandler {
    fn step(&self) -> PipelineStep {
        self.step
    }

    fn artifact_schema(&self) -> ArtifactSchema {
        self.schema.clone()
    }

    async fn handle(&self, job: &JobSnapshot, payload: &Value) -> Result<RawArtifact, HandlerError> {
        let prompt = self.render_prompt(payload)?;
        tracing::debug!(job_id = %job.id, step = %self.step, "Requesting stage artifact");

        let output = self.generator.generate(&prompt, &self.options).await?;
        Ok(RawArtifact::new(output, prompt))
    }
}

/// Tera hides the useful part of an error (such as a missing variable) in
/// its source chain.
fn tera_error_chain(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::pipeline::stage::Stage;
    use crate::storage::JobProgress;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct EchoGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(r#"{"title": "Intro"}"#.to_string())
        }
    }

    fn job() -> JobSnapshot {
        JobSnapshot {
            id: Uuid::new_v4(),
            stage: Stage::Stage2Running,
            progress: JobProgress::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn handler(generator: Arc<EchoGenerator>) -> GeneratorStageHandler {
        let schema: ArtifactSchema = ArtifactSchema::object()
            .required("title", ArtifactSchema::string())
            .into();
        GeneratorStageHandler::new(
            PipelineStep::Summarization,
            schema,
            "Summarize: {{ document_text }}\nShape:\n{{ shape }}",
            generator,
        )
    }

    #[tokio::test]
    async fn test_handle_renders_payload_into_prompt() {
        let generator = Arc::new(EchoGenerator {
            prompts: Mutex::new(Vec::new()),
        });
        let handler = handler(Arc::clone(&generator));

        let raw = handler
            .handle(&job(), &json!({"document_text": "Photosynthesis basics"}))
            .await
            .unwrap();

        assert_eq!(raw.output, r#"{"title": "Intro"}"#);
        assert!(raw.prompt.contains("Summarize: Photosynthesis basics"));
        assert!(raw.prompt.contains("title"));
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_variable_is_invalid_payload() {
        let generator = Arc::new(EchoGenerator {
            prompts: Mutex::new(Vec::new()),
        });
        let handler = handler(Arc::clone(&generator));

        let err = handler.handle(&job(), &json!({"other": 1})).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidPayload(_)));
        assert!(err.to_string().contains("document_text"));
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let generator = Arc::new(EchoGenerator {
            prompts: Mutex::new(Vec::new()),
        });
        let err = handler(generator).render_prompt(&json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }
}
