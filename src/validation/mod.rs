//! Artifact validation for course-forge.
//!
//! Every artifact a stage produces is checked against a declarative
//! [`ArtifactSchema`] before the stage may be marked complete. The same
//! schema drives the prompt-facing [`describe`] output and the deterministic
//! [`synthesize`] placeholder used in degraded mode.

pub mod describe;
pub mod path;
pub mod schema;
pub mod synthesize;
pub mod validator;

pub use describe::describe;
pub use path::{IssuePath, PathSegment};
pub use schema::{
    ArraySchema, ArtifactSchema, FieldSpec, NumberSchema, ObjectSchema, RefinedSchema,
    Refinement, ShapeVariant, StringSchema, ValueKind,
};
pub use synthesize::synthesize;
pub use validator::{validate, ValidationIssue, ValidationReport};
