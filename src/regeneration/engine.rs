//! The regeneration engine: runs the repair chain with the validator as gate.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use super::attempt::{Candidate, GenerationAttempt, RepairOutcome, StrategyKind};
use super::strategies::{default_strategies, RepairContext, RepairStrategy};
use crate::llm::{GenerationOptions, Generator};
use crate::metrics::MetricsCollector;
use crate::utils::json_extraction::{extract_json, JsonExtraction};
use crate::validation::{validate, ArtifactSchema, IssuePath, ValidationIssue};

/// Engine-level defaults. Each `regenerate` call may override the strategy
/// list and attempt budget.
#[derive(Debug, Clone)]
pub struct RegenerationConfig {
    pub enabled: Vec<StrategyKind>,
    pub max_attempts_per_strategy: u32,
    /// Options for critique and partial regeneration.
    pub generation: GenerationOptions,
    /// Options for model escalation.
    pub escalation: GenerationOptions,
}

impl Default for RegenerationConfig {
    fn default() -> Self {
        Self {
            enabled: StrategyKind::ALL.to_vec(),
            max_attempts_per_strategy: 2,
            generation: GenerationOptions::default(),
            escalation: GenerationOptions::default().with_max_tokens(8192),
        }
    }
}

impl RegenerationConfig {
    pub fn with_enabled(mut self, enabled: Vec<StrategyKind>) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_attempts_per_strategy(mut self, attempts: u32) -> Self {
        self.max_attempts_per_strategy = attempts.max(1);
        self
    }

    pub fn with_generation(mut self, options: GenerationOptions) -> Self {
        self.generation = options;
        self
    }

    pub fn with_escalation(mut self, options: GenerationOptions) -> Self {
        self.escalation = options;
        self
    }
}

/// Outcome of one `regenerate` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RegenerationResult {
    Success {
        artifact: Value,
        /// `"none"` when the initial output already passed.
        strategy_used: String,
        attempts: u32,
        /// Set when the artifact is a synthesized placeholder.
        degraded: bool,
    },
    Failure {
        error: String,
        /// Outstanding issues of the closest candidate. Never empty.
        issues: Vec<ValidationIssue>,
        attempts_exhausted: u32,
    },
}

impl RegenerationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RegenerationResult::Success { .. })
    }

    pub fn artifact(&self) -> Option<&Value> {
        match self {
            RegenerationResult::Success { artifact, .. } => Some(artifact),
            RegenerationResult::Failure { .. } => None,
        }
    }
}

/// Runs the ranked repair chain against invalid generator output.
pub struct RegenerationEngine {
    strategies: Vec<Arc<dyn RepairStrategy>>,
    generator: Option<Arc<dyn Generator>>,
    config: RegenerationConfig,
    metrics: MetricsCollector,
}

impl RegenerationEngine {
    pub fn new(config: RegenerationConfig) -> Self {
        Self {
            strategies: default_strategies(),
            generator: None,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Installs a strategy, replacing any existing one of the same kind.
    pub fn with_strategy(mut self, strategy: Arc<dyn RepairStrategy>) -> Self {
        self.strategies.retain(|existing| existing.kind() != strategy.kind());
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|strategy| strategy.kind().rank());
        self
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub fn config(&self) -> &RegenerationConfig {
        &self.config
    }

    /// Regenerates with the engine's configured strategies and attempt budget.
    pub async fn regenerate_default(
        &self,
        initial_raw: &str,
        prompt: &str,
        schema: &ArtifactSchema,
    ) -> RegenerationResult {
        self.regenerate(
            initial_raw,
            prompt,
            schema,
            &self.config.enabled,
            self.config.max_attempts_per_strategy,
        )
        .await
    }

    /// Validates `initial_raw` against `schema` and, when it fails, runs the
    /// enabled strategies in rank order until one produces a valid artifact.
    pub async fn regenerate(
        &self,
        initial_raw: &str,
        prompt: &str,
        schema: &ArtifactSchema,
        enabled: &[StrategyKind],
        max_attempts_per_strategy: u32,
    ) -> RegenerationResult {
        let value = match extract_json(initial_raw) {
            JsonExtraction::Complete(json) => serde_json::from_str::<Value>(&json).ok(),
            _ => None,
        };
        let issues = match &value {
            Some(value) => validate(schema, value).issues,
            None => vec![ValidationIssue::new(IssuePath::root(), "output is not valid JSON")],
        };

        if issues.is_empty() {
            if let Some(artifact) = value {
                self.metrics.record_regeneration("none", "success");
                return RegenerationResult::Success {
                    artifact,
                    strategy_used: "none".to_string(),
                    attempts: 0,
                    degraded: false,
                };
            }
        }

        tracing::debug!(issues = issues.len(), "Initial output failed validation");

        let mut state = GenerationAttempt {
            schema,
            prompt,
            raw: initial_raw.to_string(),
            value,
            issues,
            attempt: 0,
        };
        let ctx = RepairContext {
            generator: self.generator.as_deref(),
            options: &self.config.generation,
            escalation: &self.config.escalation,
        };

        for strategy in self
            .strategies
            .iter()
            .filter(|strategy| enabled.contains(&strategy.kind()))
        {
            if strategy.requires_generator() && ctx.generator.is_none() {
                tracing::warn!(strategy = strategy.name(), "Skipping repair strategy: no generator configured");
                continue;
            }

            let tries = if strategy.is_deterministic() {
                1
            } else {
                max_attempts_per_strategy.max(1)
            };

            for _ in 0..tries {
                state.attempt += 1;
                let outcome = strategy.attempt(&state, &ctx).await;

                match outcome {
                    RepairOutcome::Accepted { artifact } => {
                        // Strategies gate their own output; the engine does not trust that.
                        let report = validate(schema, &artifact);
                        if report.valid {
                            let degraded = strategy.kind() == StrategyKind::EmergencyFallback;
                            self.metrics.record_repair_attempt(strategy.name(), "accepted");
                            self.metrics.record_regeneration(
                                strategy.name(),
                                if degraded { "degraded" } else { "success" },
                            );
                            tracing::info!(
                                strategy = strategy.name(),
                                attempts = state.attempt,
                                degraded,
                                "Artifact accepted after repair"
                            );
                            return RegenerationResult::Success {
                                artifact,
                                strategy_used: strategy.name().to_string(),
                                attempts: state.attempt,
                                degraded,
                            };
                        }

                        tracing::warn!(
                            strategy = strategy.name(),
                            issues = report.issues.len(),
                            "Strategy claimed acceptance for an invalid artifact"
                        );
                        self.metrics.record_repair_attempt(strategy.name(), "rejected");
                        let raw = serde_json::to_string(&artifact).unwrap_or_default();
                        state.adopt(Candidate { raw, value: artifact }, report.issues);
                    }
                    RepairOutcome::Rejected {
                        reason, candidate, ..
                    } => {
                        self.metrics.record_repair_attempt(strategy.name(), "rejected");
                        tracing::debug!(
                            strategy = strategy.name(),
                            attempt = state.attempt,
                            reason = %reason,
                            "Repair attempt rejected"
                        );
                        if let Some(candidate) = candidate {
                            let issues = validate(schema, &candidate.value).issues;
                            if !issues.is_empty() {
                                state.adopt(candidate, issues);
                            }
                        }
                    }
                }
            }
        }

        self.metrics.record_regeneration("exhausted", "failure");
        let error = if state.attempt == 0 {
            "no applicable repair strategy is enabled".to_string()
        } else {
            format!(
                "all enabled repair strategies exhausted after {} attempt(s)",
                state.attempt
            )
        };
        tracing::warn!(attempts = state.attempt, issues = state.issues.len(), "{}", error);

        RegenerationResult::Failure {
            error,
            issues: state.issues,
            attempts_exhausted: state.attempt,
        }
    }
}
