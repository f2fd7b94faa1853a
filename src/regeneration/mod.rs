//! Quality-gated regeneration.
//!
//! A stage's raw output is validated against its [`ArtifactSchema`]; when it
//! fails, the [`RegenerationEngine`] runs the ranked repair strategies
//! (syntax repair, critique-and-revise, partial regeneration, model
//! escalation, emergency fallback) until one produces an artifact the
//! validator accepts. Validation and generator errors never escape the
//! engine; they are folded into the [`RegenerationResult`].
//!
//! ```ignore
//! use course_forge::regeneration::{RegenerationConfig, RegenerationEngine};
//!
//! let engine = RegenerationEngine::new(RegenerationConfig::default()).with_generator(generator);
//! let result = engine.regenerate_default(&raw_output, &prompt, &schema).await;
//! ```
//!
//! [`ArtifactSchema`]: crate::validation::ArtifactSchema

pub mod attempt;
pub mod engine;
pub mod prompts;
pub mod strategies;

pub use attempt::{Candidate, GenerationAttempt, RepairOutcome, StrategyKind};
pub use engine::{RegenerationConfig, RegenerationEngine, RegenerationResult};
pub use strategies::{default_strategies, RepairContext, RepairStrategy};
