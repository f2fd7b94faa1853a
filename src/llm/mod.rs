//! LLM integration for course-forge.
//!
//! The pipeline core only ever sees the [`Generator`] trait: a prompt goes in,
//! raw text comes out, bounded by a timeout. [`LlmGenerator`] adapts any
//! [`LlmProvider`] (such as the OpenAI-compatible [`LiteLlmClient`]) to it.
//!
//! ```ignore
//! use course_forge::llm::{GenerationOptions, Generator, LiteLlmClient, LlmGenerator};
//! use std::sync::Arc;
//!
//! let client = LiteLlmClient::from_env()?;
//! let generator = LlmGenerator::new(Arc::new(client));
//! let raw = generator
//!     .generate("List three learning outcomes as a JSON array", &GenerationOptions::default())
//!     .await?;
//! ```

pub mod generator;
pub mod litellm;

pub use generator::{GenerationOptions, Generator, LlmGenerator};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
};
