//! Values passed between the regeneration engine and its repair strategies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::validation::{ArtifactSchema, ValidationIssue};

/// Repair strategies in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    SyntaxRepair,
    CritiqueAndRevise,
    PartialRegeneration,
    ModelEscalation,
    EmergencyFallback,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::SyntaxRepair,
        StrategyKind::CritiqueAndRevise,
        StrategyKind::PartialRegeneration,
        StrategyKind::ModelEscalation,
        StrategyKind::EmergencyFallback,
    ];

    /// Position in the escalation chain, starting at 1.
    pub fn rank(&self) -> u8 {
        match self {
            StrategyKind::SyntaxRepair => 1,
            StrategyKind::CritiqueAndRevise => 2,
            StrategyKind::PartialRegeneration => 3,
            StrategyKind::ModelEscalation => 4,
            StrategyKind::EmergencyFallback => 5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::SyntaxRepair => "syntax-repair",
            StrategyKind::CritiqueAndRevise => "critique-and-revise",
            StrategyKind::PartialRegeneration => "partial-regeneration",
            StrategyKind::ModelEscalation => "model-escalation",
            StrategyKind::EmergencyFallback => "emergency-fallback",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown repair strategy '{}', expected one of: {}",
                    s,
                    StrategyKind::ALL.map(|kind| kind.name()).join(", ")
                )
            })
    }
}

/// The artifact under repair, as seen by one strategy attempt.
///
/// Lives only for the duration of one `regenerate` call.
#[derive(Debug, Clone)]
pub struct GenerationAttempt<'a> {
    pub schema: &'a ArtifactSchema,
    /// Prompt that produced the original output.
    pub prompt: &'a str,
    /// Latest raw text.
    pub raw: String,
    /// `raw` parsed as JSON, when it parses.
    pub value: Option<Value>,
    /// Outstanding validation issues for `raw`.
    pub issues: Vec<ValidationIssue>,
    /// Number of strategy attempts made so far, across all strategies.
    pub attempt: u32,
}

impl<'a> GenerationAttempt<'a> {
    /// Replaces the current artifact with a closer candidate.
    pub fn adopt(&mut self, candidate: Candidate, issues: Vec<ValidationIssue>) {
        self.raw = candidate.raw;
        self.value = Some(candidate.value);
        self.issues = issues;
    }
}

/// A parsed but still invalid artifact produced by a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub raw: String,
    pub value: Value,
}

/// Result of one repair strategy execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    /// The strategy produced an artifact that passed validation.
    Accepted { artifact: Value },
    /// The strategy could not produce a valid artifact.
    ///
    /// `candidate` carries the parsed output when there was one, so later
    /// strategies can build on it.
    Rejected {
        reason: String,
        strategy: &'static str,
        candidate: Option<Candidate>,
    },
}

impl RepairOutcome {
    pub fn rejected(kind: StrategyKind, reason: impl Into<String>) -> Self {
        RepairOutcome::Rejected {
            reason: reason.into(),
            strategy: kind.name(),
            candidate: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, RepairOutcome::Accepted { .. })
    }
}
