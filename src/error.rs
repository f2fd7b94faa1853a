//! Error types shared across course-forge subsystems.
//!
//! Subsystem-specific errors live next to the code that raises them
//! (`ProgressError` in storage, `QueueError` in the scheduler, `ConfigError`
//! in the pipeline config). This module holds the errors that cross module
//! boundaries:
//! - LLM / generator interactions
//! - Stage handler failures reported by external collaborators

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LITELLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Context length exceeded: {limit} tokens")]
    ContextLengthExceeded { limit: u32 },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Generation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Generator returned an empty response")]
    EmptyResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Whether retrying the same request later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::RateLimited(_) | LlmError::Timeout { .. } => {
                true
            }
            LlmError::ApiError { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

/// Errors reported by a stage handler while producing a raw artifact.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The work item payload is missing data the handler needs.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The generator backing the handler failed.
    #[error("Generation failed: {0}")]
    Generation(#[from] LlmError),

    /// Any other handler-specific failure.
    #[error("Stage handler failed: {0}")]
    Failed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_transient_classification() {
        assert!(LlmError::Timeout { seconds: 30 }.is_transient());
        assert!(LlmError::RateLimited("slow down".to_string()).is_transient());
        assert!(LlmError::ApiError {
            code: 503,
            message: "unavailable".to_string()
        }
        .is_transient());
        assert!(!LlmError::ApiError {
            code: 400,
            message: "bad request".to_string()
        }
        .is_transient());
        assert!(!LlmError::MissingApiBase.is_transient());
    }

    #[test]
    fn test_handler_error_display() {
        let err = HandlerError::InvalidPayload("document_id missing".to_string());
        assert!(err.to_string().contains("document_id missing"));

        let err = HandlerError::from(LlmError::Timeout { seconds: 5 });
        assert!(err.to_string().contains("timed out after 5 seconds"));
    }
}
