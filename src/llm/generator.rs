//! Narrow text-generation interface used by stage handlers and repair strategies.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::litellm::{GenerationRequest, LlmProvider, Message};
use crate::error::LlmError;
use crate::metrics::MetricsCollector;

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    /// Model override. `None` uses the provider default.
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Hard deadline for the whole call.
    pub timeout: Duration,
    pub system_prompt: Option<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: Some(0.3),
            max_tokens: Some(4096),
            timeout: Duration::from_secs(120),
            system_prompt: Some(
                "You produce structured course content. Reply with JSON only, no commentary."
                    .to_string(),
            ),
        }
    }
}

impl GenerationOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_label(&self) -> &str {
        self.model.as_deref().unwrap_or("default")
    }
}

/// Produces raw text for a prompt.
///
/// Implementations must honor `options.timeout`; callers treat any error,
/// including a timeout, as a failed attempt rather than a fatal condition.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError>;
}

/// Adapts an [`LlmProvider`] to the [`Generator`] interface.
pub struct LlmGenerator {
    provider: Arc<dyn LlmProvider>,
    metrics: MetricsCollector,
}

impl LlmGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            metrics: MetricsCollector::new(),
        }
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &options.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));

        let mut request =
            GenerationRequest::new(options.model.clone().unwrap_or_default(), messages);
        request.temperature = options.temperature;
        request.max_tokens = options.max_tokens;

        let started = Instant::now();
        let outcome = tokio::time::timeout(options.timeout, self.provider.generate(request)).await;
        let latency = started.elapsed().as_secs_f64();

        let result = match outcome {
            Err(_) => Err(LlmError::Timeout {
                seconds: options.timeout.as_secs(),
            }),
            Ok(Err(e)) => Err(e),
            Ok(Ok(response)) => match response.first_content().map(str::trim) {
                Some(content) if !content.is_empty() => Ok(content.to_string()),
                _ => Err(LlmError::EmptyResponse),
            },
        };

        self.metrics
            .record_llm_request(options.model_label(), result.is_ok(), latency);
        if let Err(e) = &result {
            tracing::warn!(
                model = options.model_label(),
                latency_secs = latency,
                error = %e,
                "Generator call failed"
            );
        }

        result
    }
}
