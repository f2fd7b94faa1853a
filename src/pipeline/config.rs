//! Runtime configuration for the course pipeline.
//!
//! Covers the progress store, the work queue and worker pool, the generator
//! connection and the regeneration engine defaults.

use std::time::Duration;
use thiserror::Error;

use crate::llm::GenerationOptions;
use crate::regeneration::{RegenerationConfig, StrategyKind};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the pipeline orchestrator and its workers.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Storage settings
    /// SQLite connection URL of the progress store.
    pub database_url: String,

    // Queue settings
    /// Redis connection URL. The in-memory queue is used when unset.
    pub redis_url: Option<String>,
    /// Name of the work queue (prefix for Redis keys).
    pub queue_name: String,

    // Worker settings
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Maximum time allowed for one stage invocation.
    pub job_timeout: Duration,
    /// How long a worker waits on an empty queue before checking for shutdown.
    pub poll_interval: Duration,
    /// Attempts per work item before it is dead-lettered and the stage failed.
    pub max_stage_attempts: u32,

    // Generator settings
    /// Base URL of the OpenAI-compatible endpoint.
    pub llm_api_base: Option<String>,
    pub llm_api_key: Option<String>,
    /// Model for stage handlers, critique and partial regeneration.
    pub model: String,
    /// Higher-capability model used by model escalation.
    pub escalation_model: String,
    pub temperature: f64,
    /// Deadline for a single generator call.
    pub generation_timeout: Duration,

    // Regeneration settings
    pub max_attempts_per_strategy: u32,
    /// Enabled repair strategies. Order is irrelevant, the chain is ranked.
    pub strategies: Vec<StrategyKind>,
    /// Whether emergency fallback may accept a synthesized placeholder.
    pub allow_degraded: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://course_forge.db".to_string(),

            redis_url: None,
            queue_name: "course_forge:stages".to_string(),

            num_workers: 4,
            job_timeout: Duration::from_secs(900), // 15 minutes
            poll_interval: Duration::from_millis(1000),
            max_stage_attempts: 3,

            llm_api_base: None,
            llm_api_key: None,
            model: "gpt-4o-mini".to_string(),
            escalation_model: "gpt-4o".to_string(),
            temperature: 0.3,
            generation_timeout: Duration::from_secs(120),

            max_attempts_per_strategy: 2,
            strategies: StrategyKind::ALL.to_vec(),
            allow_degraded: true,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `COURSE_FORGE_DATABASE_URL`: Progress store URL (default: sqlite://course_forge.db)
    /// - `COURSE_FORGE_REDIS_URL`: Redis URL for the work queue (default: in-memory queue)
    /// - `COURSE_FORGE_QUEUE_NAME`: Queue name (default: course_forge:stages)
    /// - `COURSE_FORGE_WORKERS`: Number of workers (default: 4)
    /// - `COURSE_FORGE_JOB_TIMEOUT_SECS`: Per-stage timeout in seconds (default: 900)
    /// - `COURSE_FORGE_POLL_INTERVAL_MS`: Queue poll interval (default: 1000)
    /// - `COURSE_FORGE_MAX_STAGE_ATTEMPTS`: Attempts per work item (default: 3)
    /// - `LITELLM_API_BASE`: Generator endpoint
    /// - `LITELLM_API_KEY`: Generator API key
    /// - `COURSE_FORGE_MODEL`: Default model (default: gpt-4o-mini)
    /// - `COURSE_FORGE_ESCALATION_MODEL`: Escalation model (default: gpt-4o)
    /// - `COURSE_FORGE_TEMPERATURE`: Sampling temperature (default: 0.3)
    /// - `COURSE_FORGE_GENERATION_TIMEOUT_SECS`: Generator call timeout (default: 120)
    /// - `COURSE_FORGE_MAX_ATTEMPTS_PER_STRATEGY`: Repair attempts per strategy (default: 2)
    /// - `COURSE_FORGE_STRATEGIES`: Comma-separated strategy names (default: all)
    /// - `COURSE_FORGE_ALLOW_DEGRADED`: Enable emergency fallback (default: true)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Storage settings
        if let Ok(val) = std::env::var("COURSE_FORGE_DATABASE_URL") {
            config.database_url = val;
        }

        // Queue settings
        if let Ok(val) = std::env::var("COURSE_FORGE_REDIS_URL") {
            if !val.trim().is_empty() {
                config.redis_url = Some(val);
            }
        }

        if let Ok(val) = std::env::var("COURSE_FORGE_QUEUE_NAME") {
            config.queue_name = val;
        }

        // Worker settings
        if let Ok(val) = std::env::var("COURSE_FORGE_WORKERS") {
            config.num_workers = parse_env_value(&val, "COURSE_FORGE_WORKERS")?;
        }

        if let Ok(val) = std::env::var("COURSE_FORGE_JOB_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "COURSE_FORGE_JOB_TIMEOUT_SECS")?;
            config.job_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("COURSE_FORGE_POLL_INTERVAL_MS") {
            let millis: u64 = parse_env_value(&val, "COURSE_FORGE_POLL_INTERVAL_MS")?;
            config.poll_interval = Duration::from_millis(millis);
        }

        if let Ok(val) = std::env::var("COURSE_FORGE_MAX_STAGE_ATTEMPTS") {
            config.max_stage_attempts = parse_env_value(&val, "COURSE_FORGE_MAX_STAGE_ATTEMPTS")?;
        }

        // Generator settings
        config.llm_api_base = std::env::var("LITELLM_API_BASE").ok();
        config.llm_api_key = std::env::var("LITELLM_API_KEY").ok();

        if let Ok(val) = std::env::var("COURSE_FORGE_MODEL") {
            config.model = val;
        }

        if let Ok(val) = std::env::var("COURSE_FORGE_ESCALATION_MODEL") {
            config.escalation_model = val;
        }

        if let Ok(val) = std::env::var("COURSE_FORGE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "COURSE_FORGE_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("COURSE_FORGE_GENERATION_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "COURSE_FORGE_GENERATION_TIMEOUT_SECS")?;
            config.generation_timeout = Duration::from_secs(secs);
        }

        // Regeneration settings
        if let Ok(val) = std::env::var("COURSE_FORGE_MAX_ATTEMPTS_PER_STRATEGY") {
            config.max_attempts_per_strategy =
                parse_env_value(&val, "COURSE_FORGE_MAX_ATTEMPTS_PER_STRATEGY")?;
        }

        if let Ok(val) = std::env::var("COURSE_FORGE_STRATEGIES") {
            config.strategies = parse_strategies(&val, "COURSE_FORGE_STRATEGIES")?;
        }

        if let Ok(val) = std::env::var("COURSE_FORGE_ALLOW_DEGRADED") {
            config.allow_degraded = parse_env_bool(&val, "COURSE_FORGE_ALLOW_DEGRADED")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Storage validation
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        // Queue validation
        if self.queue_name.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue_name cannot be empty".to_string(),
            ));
        }

        // Worker validation
        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        if self.job_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "job_timeout must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.max_stage_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_stage_attempts must be greater than 0".to_string(),
            ));
        }

        // Generator validation
        if self.model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }

        if self.escalation_model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "escalation_model cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.generation_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "generation_timeout must be greater than 0".to_string(),
            ));
        }

        // Regeneration validation
        if self.max_attempts_per_strategy == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts_per_strategy must be greater than 0".to_string(),
            ));
        }

        if self.enabled_strategies().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one repair strategy must be enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Strategies the engine may run, with emergency fallback removed when
    /// degraded artifacts are not allowed.
    pub fn enabled_strategies(&self) -> Vec<StrategyKind> {
        let mut enabled: Vec<StrategyKind> = self
            .strategies
            .iter()
            .copied()
            .filter(|kind| self.allow_degraded || *kind != StrategyKind::EmergencyFallback)
            .collect();
        enabled.sort_by_key(StrategyKind::rank);
        enabled.dedup();
        enabled
    }

    /// Generator options for stage handlers and first-line repairs.
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions::default()
            .with_model(self.model.clone())
            .with_temperature(self.temperature)
            .with_timeout(self.generation_timeout)
    }

    /// Generator options for model escalation: the escalation model, a larger
    /// token budget and twice the timeout.
    pub fn escalation_options(&self) -> GenerationOptions {
        GenerationOptions::default()
            .with_model(self.escalation_model.clone())
            .with_temperature(self.temperature)
            .with_max_tokens(8192)
            .with_timeout(self.generation_timeout * 2)
    }

    /// Engine defaults derived from this configuration.
    pub fn regeneration_config(&self) -> RegenerationConfig {
        RegenerationConfig::default()
            .with_enabled(self.enabled_strategies())
            .with_max_attempts_per_strategy(self.max_attempts_per_strategy)
            .with_generation(self.generation_options())
            .with_escalation(self.escalation_options())
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Builder method to set the queue name.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Builder method to set the number of workers.
    pub fn with_num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers;
        self
    }

    /// Builder method to set the per-stage timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Builder method to set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set attempts per work item.
    pub fn with_max_stage_attempts(mut self, attempts: u32) -> Self {
        self.max_stage_attempts = attempts;
        self
    }

    /// Builder method to set the default model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder method to set the escalation model.
    pub fn with_escalation_model(mut self, model: impl Into<String>) -> Self {
        self.escalation_model = model.into();
        self
    }

    /// Builder method to set temperature.
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    /// Builder method to set the generator call timeout.
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Builder method to set repair attempts per strategy.
    pub fn with_max_attempts_per_strategy(mut self, attempts: u32) -> Self {
        self.max_attempts_per_strategy = attempts;
        self
    }

    /// Builder method to set the enabled strategies.
    pub fn with_strategies(mut self, strategies: Vec<StrategyKind>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Builder method to allow or forbid degraded artifacts.
    pub fn with_allow_degraded(mut self, allow: bool) -> Self {
        self.allow_degraded = allow;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

/// Parse a comma-separated list of strategy names.
fn parse_strategies(value: &str, key: &str) -> Result<Vec<StrategyKind>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse().map_err(|message| ConfigError::InvalidValue {
                key: key.to_string(),
                message,
            })
        })
        .collect()
}
