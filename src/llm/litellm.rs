//! OpenAI-compatible chat completion client.
//!
//! Talks to any LiteLLM / OpenRouter style `/chat/completions` endpoint and
//! exposes it through the [`LlmProvider`] trait.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::LlmError;

/// Default request timeout for the HTTP client itself. Per-call generation
/// deadlines are enforced separately by the generator adapter.
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Content of the message.
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier. Empty means the client's default model.
    pub model: String,
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl GenerationResponse {
    /// Get the content of the first choice, if available.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// A single generated choice from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    /// Reason the generation stopped (e.g., "stop", "length").
    pub finish_reason: String,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Client for LiteLLM-compatible APIs.
pub struct LiteLlmClient {
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    http_client: Client,
}

impl LiteLlmClient {
    /// Create a new client with explicit configuration.
    ///
    /// # Arguments
    ///
    /// * `api_base` - Base URL for the API (e.g., "http://localhost:4000")
    /// * `api_key` - Optional API key for authentication
    /// * `default_model` - Model used when a request leaves `model` empty
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
            http_client,
        })
    }

    /// Create a new client from environment variables.
    ///
    /// - `LITELLM_API_BASE`: Base URL for the API (required)
    /// - `LITELLM_API_KEY`: API key for authentication (optional)
    /// - `LITELLM_DEFAULT_MODEL`: Default model (defaults to "gpt-4o-mini")
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingApiBase` if `LITELLM_API_BASE` is not set.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_base = env::var("LITELLM_API_BASE").map_err(|_| LlmError::MissingApiBase)?;
        let api_key = env::var("LITELLM_API_KEY").ok();
        let default_model =
            env::var("LITELLM_DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        Self::new(api_base, api_key, default_model)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Internal request structure for the OpenAI-compatible API.
#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: u32,
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for LiteLlmClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model
        };

        let api_request = ApiRequest {
            model,
            messages: request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.api_base);
        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Title", "course-forge");

        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        let http_response = http_request
            .json(&api_request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|parsed| parsed.error.message)
                .unwrap_or(error_text);

            return Err(match status_code {
                429 => LlmError::RateLimited(message),
                _ => LlmError::ApiError {
                    code: status_code,
                    message,
                },
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let choices = api_response
            .choices
            .into_iter()
            .map(|choice| Choice {
                index: choice.index,
                message: Message {
                    role: choice.message.role.unwrap_or_else(|| "assistant".to_string()),
                    content: choice.message.content.unwrap_or_default(),
                },
                finish_reason: choice.finish_reason.unwrap_or_default(),
            })
            .collect();

        Ok(GenerationResponse {
            id: api_response.id,
            model: api_response.model,
            choices,
            usage: api_response.usage.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("s").role, "system");
        assert_eq!(Message::user("u").role, "user");
        let assistant = Message::assistant("Hi there!");
        assert_eq!(assistant.role, "assistant");
        assert_eq!(assistant.content, "Hi there!");
    }

    #[test]
    fn test_generation_request_builder() {
        let request = GenerationRequest::new("gpt-4o", vec![Message::user("test")])
            .with_temperature(0.2)
            .with_max_tokens(1000);

        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(1000));
    }

    #[test]
    fn test_generation_response_first_content() {
        let response = GenerationResponse {
            id: "test-id".to_string(),
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant("[\"Explain X\"]"),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        };
        assert_eq!(response.first_content(), Some("[\"Explain X\"]"));

        let empty = GenerationResponse {
            choices: vec![],
            ..response
        };
        assert_eq!(empty.first_content(), None);
    }

    #[test]
    fn test_client_new_trims_base() {
        let client = LiteLlmClient::new("http://localhost:4000/", Some("k".to_string()), "gpt-4o")
            .unwrap();
        assert_eq!(client.api_base(), "http://localhost:4000");
        assert_eq!(client.default_model(), "gpt-4o");
        assert!(client.has_api_key());
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let client = LiteLlmClient::new("http://localhost:65535", None, "gpt-4o").unwrap();
        let request = GenerationRequest::new("", vec![Message::user("test")]);

        let err = client.generate(request).await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed(_)));
    }

    #[test]
    fn test_api_request_serialization() {
        let request = ApiRequest {
            model: "gpt-4o".to_string(),
            messages: vec![Message::user("test")],
            temperature: Some(0.7),
            max_tokens: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"model\":\"gpt-4o\""));
        assert!(json.contains("\"temperature\":0.7"));
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn test_api_response_tolerates_null_content() {
        let body = r#"{"id":"x","model":"m","choices":[{"index":0,"message":{"role":"assistant","content":null},"finish_reason":"length"}]}"#;
        let parsed: ApiResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
        assert!(parsed.usage.is_none());
    }
}
