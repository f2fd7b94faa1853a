//! course-forge: durable stage tracking and quality-gated artifact
//! regeneration for a course-authoring pipeline.
//!
//! Jobs move through a fixed table of stages stored in SQLite. Every artifact
//! a stage produces is validated against a declarative schema and, when it
//! fails, repaired by a ranked chain of strategies before the stage may
//! complete.

// Core modules
pub mod cli;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod regeneration;
pub mod scheduler;
pub mod storage;
pub mod utils;
pub mod validation;

// Re-export commonly used error types
pub use error::{HandlerError, LlmError};
