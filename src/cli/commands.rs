//! CLI command definitions for course-forge.
//!
//! Operator surface for the course generation pipeline: job administration,
//! stage enqueueing, workers and offline artifact validation.

use crate::llm::{Generator, LiteLlmClient, LlmGenerator};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{
    ArtifactKind, PipelineConfig, PipelineOrchestrator, PipelineStep, Stage, StageOutcome,
};
use crate::regeneration::{RegenerationEngine, RegenerationResult};
use crate::scheduler::{open_queue, WorkItem, WorkerPool, WorkerPoolConfig};
use crate::storage::{ProgressStore, TraceFilter, TraceStatus};
use crate::validation::{describe, validate};
use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Default number of rows for list commands.
const DEFAULT_LIST_LIMIT: i64 = 50;

/// Course generation pipeline with quality-gated regeneration.
#[derive(Parser)]
#[command(name = "course-forge")]
#[command(about = "Drive course generation jobs through the quality-gated pipeline")]
#[command(version)]
#[command(
    long_about = "course-forge tracks course generation jobs through a fixed stage table and gates every generated artifact through a validator with ranked repair strategies.\n\nExample usage:\n  course-forge migrate\n  course-forge create-job\n  course-forge enqueue <JOB_ID> --step summarization --payload '{\"document_text\": \"...\"}'\n  course-forge worker --workers 4"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// SQLite database URL (overrides COURSE_FORGE_DATABASE_URL).
    #[arg(long, global = true)]
    pub database_url: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Apply pending database migrations.
    Migrate,

    /// Create a job in the `pending` stage.
    CreateJob(CreateJobArgs),

    /// Show a job's stage and per-step progress.
    #[command(alias = "show")]
    Status(JobArgs),

    /// List jobs, most recently updated first.
    ListJobs(ListJobsArgs),

    /// Show the transition audit log of a job.
    Transitions(JobArgs),

    /// List generation traces.
    Traces(TracesArgs),

    /// Report a step status for a job, as an external service would.
    Advance(AdvanceArgs),

    /// Cancel a job.
    Cancel(CancelArgs),

    /// Restart a terminal job from `pending`.
    Restart(JobArgs),

    /// Initialize a stage and put it on the work queue.
    Enqueue(StageArgs),

    /// Initialize and run a stage in this process.
    RunStage(StageArgs),

    /// Run a worker pool until interrupted.
    Worker(WorkerArgs),

    /// Validate an artifact file, optionally running the repair chain.
    Validate(ValidateArgs),

    /// Print the shape description of an artifact.
    Describe(DescribeArgs),
}

/// Output format for structured results.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

#[derive(Parser, Debug)]
pub struct CreateJobArgs {
    /// Use this id instead of a random one.
    #[arg(long)]
    pub id: Option<Uuid>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct JobArgs {
    pub job_id: Uuid,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct ListJobsArgs {
    /// Only jobs in this stage (e.g. stage_2_running, failed).
    #[arg(long)]
    pub stage: Option<Stage>,

    #[arg(short = 'n', long, default_value_t = DEFAULT_LIST_LIMIT)]
    pub limit: i64,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct TracesArgs {
    #[arg(long)]
    pub job_id: Option<Uuid>,

    /// Step id (1-5) or name.
    #[arg(long)]
    pub step: Option<PipelineStep>,

    /// accepted, degraded or exhausted.
    #[arg(long)]
    pub status: Option<TraceStatus>,

    #[arg(short = 'n', long, default_value_t = DEFAULT_LIST_LIMIT)]
    pub limit: i64,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct AdvanceArgs {
    pub job_id: Uuid,

    /// Step id (1-5) or name.
    #[arg(long)]
    pub step: PipelineStep,

    /// Reported status (pending, running, completed, failed, cancelled or an alias).
    #[arg(long)]
    pub status: String,

    #[arg(long)]
    pub message: Option<String>,

    /// JSON object stored with the step record.
    #[arg(long)]
    pub metadata: Option<String>,
}

#[derive(Parser, Debug)]
pub struct CancelArgs {
    pub job_id: Uuid,

    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Parser, Debug)]
pub struct StageArgs {
    pub job_id: Uuid,

    /// Step id (1-5) or name.
    #[arg(long)]
    pub step: PipelineStep,

    /// Handler payload as a JSON object.
    #[arg(long, conflicts_with = "payload_file")]
    pub payload: Option<String>,

    /// File holding the handler payload as a JSON object.
    #[arg(long)]
    pub payload_file: Option<String>,
}

#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Number of workers (overrides COURSE_FORGE_WORKERS).
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Queue name (overrides COURSE_FORGE_QUEUE_NAME).
    #[arg(long)]
    pub queue: Option<String>,

    /// Print Prometheus metrics on shutdown.
    #[arg(long)]
    pub print_metrics: bool,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// File holding the raw artifact text.
    pub file: String,

    /// Artifact kind to validate against.
    #[arg(short, long)]
    pub artifact: ArtifactKind,

    /// Run the repair chain when validation fails.
    #[arg(long)]
    pub regenerate: bool,

    /// Prompt passed to generator-backed repairs.
    #[arg(long, default_value = "")]
    pub prompt: String,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct DescribeArgs {
    pub artifact: ArtifactKind,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(url) = cli.database_url {
        config = config.with_database_url(url);
    }

    match cli.command {
        Commands::Migrate => run_migrate_command(&config).await,
        Commands::CreateJob(args) => run_create_job_command(&config, args).await,
        Commands::Status(args) => run_status_command(&config, args).await,
        Commands::ListJobs(args) => run_list_jobs_command(&config, args).await,
        Commands::Transitions(args) => run_transitions_command(&config, args).await,
        Commands::Traces(args) => run_traces_command(&config, args).await,
        Commands::Advance(args) => run_advance_command(&config, args).await,
        Commands::Cancel(args) => run_cancel_command(&config, args).await,
        Commands::Restart(args) => run_restart_command(&config, args).await,
        Commands::Enqueue(args) => run_enqueue_command(&config, args).await,
        Commands::RunStage(args) => run_stage_command(&config, args).await,
        Commands::Worker(args) => run_worker_command(config, args).await,
        Commands::Validate(args) => run_validate_command(&config, args).await,
        Commands::Describe(args) => {
            println!("{}", describe(&args.artifact.schema()));
            Ok(())
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn open_store(config: &PipelineConfig) -> anyhow::Result<ProgressStore> {
    let store = ProgressStore::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    store.run_migrations().await?;
    Ok(store)
}

fn build_generator(config: &PipelineConfig) -> anyhow::Result<Arc<dyn Generator>> {
    let api_base = config.llm_api_base.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "LITELLM_API_BASE is required but not set.\n\
             Set it to the base URL of an OpenAI-compatible endpoint."
        )
    })?;

    let client = LiteLlmClient::new(api_base, config.llm_api_key.clone(), config.model.clone())?;
    info!(api_base = %client.api_base(), model = %config.model, "Using LiteLLM endpoint");
    Ok(Arc::new(LlmGenerator::new(Arc::new(client))))
}

fn read_payload(args: &StageArgs) -> anyhow::Result<Value> {
    let raw = match (&args.payload, &args.payload_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload file {}", path))?,
        (None, None) => return Ok(Value::Object(Default::default())),
    };

    let payload: Value = serde_json::from_str(&raw).context("Payload is not valid JSON")?;
    if !payload.is_object() {
        anyhow::bail!("Payload must be a JSON object");
    }
    Ok(payload)
}

fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Json | OutputFormat::Text => {
            println!("{}", serde_json::to_string_pretty(value)?)
        }
    }
    Ok(())
}

fn print_job(job: &crate::storage::JobSnapshot, format: OutputFormat) -> anyhow::Result<()> {
    if format != OutputFormat::Text {
        return print_structured(job, format);
    }

    println!("Job {}", job.id);
    println!("  Stage:   {}", job.stage);
    println!("  Run:     {}", job.progress.run);
    println!("  Updated: {}", job.updated_at.to_rfc3339());
    for record in &job.progress.steps {
        let mut line = format!("  [{}] {}: {}", record.step.id(), record.step, record.status);
        if let Some(message) = &record.message {
            line.push_str(&format!(" ({})", message));
        }
        println!("{}", line);
    }
    Ok(())
}

// ============================================================================
// Job administration
// ============================================================================

async fn run_migrate_command(config: &PipelineConfig) -> anyhow::Result<()> {
    let store = ProgressStore::connect(&config.database_url).await?;
    let applied = store.run_migrations().await?;

    if applied.is_empty() {
        println!("Database is up to date");
    } else {
        for name in &applied {
            println!("Applied migration {}", name);
        }
    }
    Ok(())
}

async fn run_create_job_command(config: &PipelineConfig, args: CreateJobArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let job = match args.id {
        Some(id) => store.create_job_with_id(id).await?,
        None => store.create_job().await?,
    };

    if args.format == OutputFormat::Text {
        println!("{}", job.id);
        Ok(())
    } else {
        print_structured(&job, args.format)
    }
}

async fn run_status_command(config: &PipelineConfig, args: JobArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let job = store.get_job(args.job_id).await?;
    print_job(&job, args.format)
}

async fn run_list_jobs_command(config: &PipelineConfig, args: ListJobsArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let jobs = store.list_jobs(args.stage, args.limit).await?;

    if args.format != OutputFormat::Text {
        return print_structured(&jobs, args.format);
    }

    if jobs.is_empty() {
        println!("No jobs");
    }
    for job in &jobs {
        println!(
            "{}  {:<16}  run {}  {}",
            job.id,
            job.stage.as_str(),
            job.progress.run,
            job.updated_at.to_rfc3339()
        );
    }
    Ok(())
}

async fn run_transitions_command(config: &PipelineConfig, args: JobArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    // Fail with "not found" rather than an empty log for unknown ids.
    store.get_job(args.job_id).await?;
    let transitions = store.list_transitions(args.job_id).await?;

    if args.format != OutputFormat::Text {
        return print_structured(&transitions, args.format);
    }

    for record in &transitions {
        let verdict = if record.accepted { "accepted" } else { "rejected" };
        let mut line = format!(
            "{}  {} -> {}  ({}, {})",
            record.created_at.to_rfc3339(),
            record.from_stage,
            record.to_stage,
            record.raw_status,
            verdict
        );
        if let Some(reason) = &record.reason {
            line.push_str(&format!(": {}", reason));
        }
        println!("{}", line);
    }
    Ok(())
}

async fn run_traces_command(config: &PipelineConfig, args: TracesArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;

    let mut filter = TraceFilter::new().with_limit(args.limit);
    if let Some(job_id) = args.job_id {
        filter = filter.with_job_id(job_id);
    }
    if let Some(step) = args.step {
        filter = filter.with_step(step);
    }
    if let Some(status) = args.status {
        filter = filter.with_status(status);
    }

    let traces = store.list_traces(&filter).await?;

    if args.format != OutputFormat::Text {
        return print_structured(&traces, args.format);
    }

    for trace in &traces {
        println!(
            "{}  {}  {}  {}  strategy={}  attempts={}  issues={}",
            trace.created_at.to_rfc3339(),
            trace.job_id,
            trace.step,
            trace.status,
            trace.strategy_used.as_deref().unwrap_or("-"),
            trace.attempts,
            trace.issues.len()
        );
    }
    Ok(())
}

async fn run_advance_command(config: &PipelineConfig, args: AdvanceArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let metadata = args
        .metadata
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("Metadata is not valid JSON")?;

    store
        .advance_stage(
            args.job_id,
            args.step,
            &args.status,
            args.message.as_deref(),
            metadata,
        )
        .await?;

    let job = store.get_job(args.job_id).await?;
    println!("{} -> {}", job.id, job.stage);
    Ok(())
}

async fn run_cancel_command(config: &PipelineConfig, args: CancelArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let job = store.cancel_job(args.job_id, args.reason.as_deref()).await?;
    println!("{} -> {}", job.id, job.stage);
    Ok(())
}

async fn run_restart_command(config: &PipelineConfig, args: JobArgs) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let job = store.restart_job(args.job_id).await?;
    println!("{} -> {} (run {})", job.id, job.stage, job.progress.run);
    Ok(())
}

// ============================================================================
// Stage execution
// ============================================================================

async fn run_enqueue_command(config: &PipelineConfig, args: StageArgs) -> anyhow::Result<()> {
    if config.redis_url.is_none() {
        anyhow::bail!(
            "COURSE_FORGE_REDIS_URL is required to enqueue for other processes.\n\
             Use `course-forge run-stage` to run the stage in this process."
        );
    }

    let payload = read_payload(&args)?;
    let store = open_store(config).await?;
    let queue = open_queue(config.redis_url.as_deref(), &config.queue_name).await?;

    // Enqueueing needs no handlers or generator.
    let orchestrator =
        PipelineOrchestrator::new(store, RegenerationEngine::new(config.regeneration_config()))
            .with_queue(queue)
            .with_max_stage_attempts(config.max_stage_attempts);

    match orchestrator.enqueue_stage(args.job_id, args.step, payload).await? {
        Some(item) => println!("Enqueued {} for job {} ({})", item.id, item.job_id, item.step),
        None => println!("Job {} is terminal, nothing enqueued", args.job_id),
    }
    Ok(())
}

async fn run_stage_command(config: &PipelineConfig, args: StageArgs) -> anyhow::Result<()> {
    let payload = read_payload(&args)?;
    let store = open_store(config).await?;
    let generator = build_generator(config)?;
    let orchestrator = PipelineOrchestrator::from_config(config, store, generator)?;

    let item = WorkItem::new(args.job_id, args.step, payload);
    let outcome = orchestrator.run_stage(&item).await?;

    match &outcome {
        StageOutcome::Completed {
            strategy_used,
            attempts,
            degraded,
            step_completed,
            finalized,
        } => {
            println!(
                "Completed {} (strategy: {}, attempts: {}{}{}{})",
                args.step,
                strategy_used,
                attempts,
                if *degraded { ", degraded" } else { "" },
                if *step_completed { "" } else { ", items pending" },
                if *finalized { ", job completed" } else { "" }
            );
        }
        StageOutcome::Failed { error, issues } => {
            println!("Failed {}: {}", args.step, error);
            for issue in issues {
                println!("  - {}: {}", issue.path, issue.message);
            }
        }
        StageOutcome::Halted { stage } => println!("Job is {}, stage not run", stage),
        StageOutcome::Skipped { stage } => println!("Step already done (job is {})", stage),
    }
    Ok(())
}

async fn run_worker_command(mut config: PipelineConfig, args: WorkerArgs) -> anyhow::Result<()> {
    if let Some(workers) = args.workers {
        config = config.with_num_workers(workers);
    }
    if let Some(queue) = args.queue {
        config = config.with_queue_name(queue);
    }
    config.validate()?;

    if let Err(e) = init_metrics() {
        warn!(error = %e, "Failed to initialize metrics");
    }

    if config.redis_url.is_none() {
        warn!("No Redis URL configured; only items enqueued in this process will be seen");
    }

    let store = open_store(&config).await?;
    let generator = build_generator(&config)?;
    let queue = open_queue(config.redis_url.as_deref(), &config.queue_name).await?;
    let orchestrator = Arc::new(
        PipelineOrchestrator::from_config(&config, store, generator)?.with_queue(Arc::clone(&queue)),
    );

    let mut pool = WorkerPool::new(
        WorkerPoolConfig::from_pipeline_config(&config),
        queue,
        Arc::clone(&orchestrator),
    );
    pool.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    pool.shutdown().await?;

    let stats = pool.stats();
    println!(
        "Processed {} items: {} completed, {} failed, {} halted, {} retried, {} dead-lettered",
        stats.total_processed(),
        stats.items_completed,
        stats.items_failed,
        stats.items_halted,
        stats.items_retried,
        stats.items_dead_lettered
    );

    if args.print_metrics {
        print!("{}", export_metrics());
    }
    Ok(())
}

// ============================================================================
// Offline validation
// ============================================================================

async fn run_validate_command(config: &PipelineConfig, args: ValidateArgs) -> anyhow::Result<()> {
    let path = Path::new(&args.file);
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read artifact file {}", args.file))?;
    let schema = args.artifact.schema();

    if !args.regenerate {
        let value: Value = serde_json::from_str(&raw).context("Artifact is not valid JSON")?;
        let report = validate(&schema, &value);
        print_report(&report, args.format)?;
        if !report.valid {
            anyhow::bail!("{} is not a valid {}", args.file, args.artifact);
        }
        return Ok(());
    }

    let mut engine = RegenerationEngine::new(config.regeneration_config());
    match build_generator(config) {
        Ok(generator) => engine = engine.with_generator(generator),
        Err(_) => warn!("No LLM endpoint configured; only deterministic repairs will run"),
    }

    let result = engine.regenerate_default(&raw, &args.prompt, &schema).await;
    if args.format == OutputFormat::Text {
        match &result {
            RegenerationResult::Success {
                artifact,
                strategy_used,
                ..
            } => {
                eprintln!("Accepted (strategy: {})", strategy_used);
                println!("{}", serde_json::to_string_pretty(artifact)?);
            }
            RegenerationResult::Failure { error, issues, .. } => {
                eprintln!("{}", error);
                for issue in issues {
                    eprintln!("  - {}: {}", issue.path, issue.message);
                }
            }
        }
    } else {
        print_structured(&result, args.format)?;
    }

    if !result.is_success() {
        anyhow::bail!("Regeneration exhausted for {}", args.file);
    }
    Ok(())
}

fn print_report(report: &crate::validation::ValidationReport, format: OutputFormat) -> anyhow::Result<()> {
    if format != OutputFormat::Text {
        return print_structured(report, format);
    }

    if report.valid {
        println!("Valid");
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}
