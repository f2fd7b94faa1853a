//! Shared utilities for course-forge.
//!
//! Currently the JSON extraction and repair helpers used to pull artifacts
//! out of generator responses.

pub mod json_extraction;

pub use json_extraction::{
    analyze_json_structure, extract_code_block, extract_json, find_matching_close,
    repair_json_text, JsonExtraction, JsonExtractionError, JsonStructureAnalysis,
};
