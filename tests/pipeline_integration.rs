//! End-to-end tests of the progress store, orchestrator and regeneration
//! engine working together. No network access.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use course_forge::error::{HandlerError, LlmError};
use course_forge::llm::{GenerationOptions, Generator};
use course_forge::pipeline::artifacts::{learning_outcomes, section_metadata, structure_analysis, summary};
use course_forge::pipeline::{
    InitOrigin, InitOutcome, PipelineOrchestrator, PipelineStep, RawArtifact, Stage, StageHandler,
    StageOutcome, GENERATION_FAILED_MESSAGE,
};
use course_forge::regeneration::{RegenerationConfig, RegenerationEngine, StrategyKind};
use course_forge::scheduler::{InMemoryWorkQueue, WorkItem, WorkQueue};
use course_forge::storage::{JobSnapshot, ProgressError, ProgressStore, TraceFilter, TraceStatus};
use course_forge::validation::ArtifactSchema;

// ============================================================================
// Fakes
// ============================================================================

/// Returns queued replies in order, then errors.
struct ScriptedGenerator {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn new<const N: usize>(replies: [&str; N]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _options: &GenerationOptions) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(LlmError::EmptyResponse)
    }
}

/// Handler returning a fixed raw output for one step.
struct CannedHandler {
    step: PipelineStep,
    schema: ArtifactSchema,
    output: String,
}

impl CannedHandler {
    fn new(step: PipelineStep, schema: ArtifactSchema, output: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            step,
            schema,
            output: output.into(),
        })
    }
}

#[async_trait]
impl StageHandler for CannedHandler {
    fn step(&self) -> PipelineStep {
        self.step
    }

    fn artifact_schema(&self) -> ArtifactSchema {
        self.schema.clone()
    }

    async fn handle(&self, _job: &JobSnapshot, _payload: &Value) -> Result<RawArtifact, HandlerError> {
        Ok(RawArtifact::new(self.output.clone(), "Produce the artifact"))
    }
}

/// Summarizes whichever document the payload names and records it.
struct DocumentHandler {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl StageHandler for DocumentHandler {
    fn step(&self) -> PipelineStep {
        PipelineStep::Summarization
    }

    fn artifact_schema(&self) -> ArtifactSchema {
        summary()
    }

    async fn handle(&self, _job: &JobSnapshot, payload: &Value) -> Result<RawArtifact, HandlerError> {
        let doc = payload["doc"].as_str().unwrap_or_default().to_string();
        self.seen.lock().unwrap().push(doc.clone());
        let output = json!({
            "title": format!("Document {}", doc),
            "summary": format!("An overview of document {}.", doc),
            "key_points": [doc],
        });
        Ok(RawArtifact::new(output.to_string(), "Summarize the document"))
    }
}

fn engine() -> RegenerationEngine {
    RegenerationEngine::new(RegenerationConfig::default())
}

// ============================================================================
// Stage table
// ============================================================================

#[tokio::test]
async fn test_stage_table_scenario() {
    let store = ProgressStore::in_memory().await.unwrap();
    let job = store.create_job().await.unwrap();
    assert_eq!(job.stage, Stage::Pending);

    store
        .advance_stage(job.id, PipelineStep::Summarization, "pending", None, None)
        .await
        .unwrap();
    assert_eq!(store.get_job(job.id).await.unwrap().stage, Stage::Stage2Init);

    let repeat = store
        .advance_stage(job.id, PipelineStep::Summarization, "pending", None, None)
        .await;
    assert!(matches!(repeat, Err(ProgressError::IllegalTransition { .. })));
    assert_eq!(store.get_job(job.id).await.unwrap().stage, Stage::Stage2Init);

    store
        .advance_stage(job.id, PipelineStep::Summarization, "completed", None, None)
        .await
        .unwrap();
    assert_eq!(store.get_job(job.id).await.unwrap().stage, Stage::Stage2Complete);

    let skip = store
        .advance_stage(job.id, PipelineStep::SectionGeneration, "pending", None, None)
        .await;
    match skip {
        Err(ProgressError::IllegalTransition { from, to, allowed, .. }) => {
            assert_eq!(from, Stage::Stage2Complete);
            assert_eq!(to, Stage::Stage4Init);
            assert!(allowed.contains(&Stage::Stage3Init));
        }
        other => panic!("expected illegal transition, got {other:?}"),
    }
    assert_eq!(store.get_job(job.id).await.unwrap().stage, Stage::Stage2Complete);

    let transitions = store.list_transitions(job.id).await.unwrap();
    assert_eq!(transitions.len(), 4);
    assert_eq!(transitions.iter().filter(|t| t.accepted).count(), 2);
}

#[tokio::test]
async fn test_concurrent_initialization_accepts_once() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("progress.db").display());
    let store = ProgressStore::connect(&url).await.unwrap();
    store.run_migrations().await.unwrap();
    let job = store.create_job().await.unwrap();

    let (a, b) = tokio::join!(
        store.advance_stage(job.id, PipelineStep::Summarization, "pending", None, None),
        store.advance_stage(job.id, PipelineStep::Summarization, "pending", None, None),
    );

    let accepted = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(accepted, 1);
    for result in [a, b] {
        if let Err(err) = result {
            assert!(matches!(
                err,
                ProgressError::IllegalTransition {
                    from: Stage::Stage2Init,
                    ..
                }
            ));
        }
    }
    assert_eq!(store.get_job(job.id).await.unwrap().stage, Stage::Stage2Init);

    let accepted_inits = store
        .list_transitions(job.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.accepted && t.to_stage == Stage::Stage2Init)
        .count();
    assert_eq!(accepted_inits, 1);
}

#[tokio::test]
async fn test_dual_path_initialization_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("progress.db").display());
    let store = ProgressStore::connect(&url).await.unwrap();
    store.run_migrations().await.unwrap();
    let job = store.create_job().await.unwrap();

    let orchestrator = PipelineOrchestrator::new(store.clone(), engine());
    let (primary, fallback) = tokio::join!(
        orchestrator.initialize_stage(job.id, PipelineStep::Summarization, InitOrigin::Primary),
        orchestrator.initialize_stage(job.id, PipelineStep::Summarization, InitOrigin::Fallback),
    );

    let outcomes = [primary.unwrap(), fallback.unwrap()];
    let initialized = outcomes
        .iter()
        .filter(|o| **o == InitOutcome::Initialized)
        .count();
    assert_eq!(initialized, 1);
    assert!(outcomes.iter().all(|o| matches!(
        o,
        InitOutcome::Initialized
            | InitOutcome::AlreadyInitialized { .. }
            | InitOutcome::BenignRace { .. }
    )));
    assert_eq!(store.get_job(job.id).await.unwrap().stage, Stage::Stage2Init);
}

// ============================================================================
// Regeneration through the orchestrator
// ============================================================================

#[tokio::test]
async fn test_critique_repairs_outcomes_and_completes_stage() {
    let generator = ScriptedGenerator::new([r#"["Explain X", "Explain Y"]"#]);
    let store = ProgressStore::in_memory().await.unwrap();
    let orchestrator = PipelineOrchestrator::new(store, engine().with_generator(generator.clone()))
        .with_handler(CannedHandler::new(
            PipelineStep::Summarization,
            learning_outcomes(),
            r#"{"outcomes": [{"text": "Explain X"}, {"text": "Explain Y"}]}"#,
        ));
    let job = orchestrator.store().create_job().await.unwrap();

    let item = WorkItem::new(job.id, PipelineStep::Summarization, json!({}));
    let outcome = orchestrator.run_stage(&item).await.unwrap();

    match outcome {
        StageOutcome::Completed {
            strategy_used,
            degraded,
            finalized,
            ..
        } => {
            assert_eq!(strategy_used, "critique-and-revise");
            assert!(!degraded);
            assert!(!finalized);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(generator.prompt_count(), 1);

    let job = orchestrator.store().get_job(job.id).await.unwrap();
    assert_eq!(job.stage, Stage::Stage2Complete);
    let record = job.progress.step(PipelineStep::Summarization).unwrap();
    assert_eq!(record.metadata["strategy_used"], "critique-and-revise");
    assert_eq!(record.metadata["degraded"], false);

    let traces = orchestrator
        .store()
        .list_traces(&TraceFilter::new().with_job_id(job.id))
        .await
        .unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].strategy_used.as_deref(), Some("critique-and-revise"));
}

#[tokio::test]
async fn test_exhaustion_fails_job() {
    let generator = ScriptedGenerator::new(["still wrong", "still wrong", "still wrong"]);
    let config = RegenerationConfig::default()
        .with_enabled(vec![StrategyKind::SyntaxRepair, StrategyKind::CritiqueAndRevise])
        .with_max_attempts_per_strategy(1);
    let store = ProgressStore::in_memory().await.unwrap();
    let orchestrator = PipelineOrchestrator::new(
        store,
        RegenerationEngine::new(config).with_generator(generator),
    )
    .with_handler(CannedHandler::new(
        PipelineStep::Summarization,
        summary(),
        r#"{"title": "Cells"}"#,
    ));
    let job = orchestrator.store().create_job().await.unwrap();

    let item = WorkItem::new(job.id, PipelineStep::Summarization, json!({}));
    let outcome = orchestrator.run_stage(&item).await.unwrap();

    let issues = match outcome {
        StageOutcome::Failed { issues, .. } => issues,
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(!issues.is_empty());

    let job = orchestrator.store().get_job(job.id).await.unwrap();
    assert_eq!(job.stage, Stage::Failed);
    let record = job.progress.step(PipelineStep::Summarization).unwrap();
    assert_eq!(record.message.as_deref(), Some(GENERATION_FAILED_MESSAGE));
    assert_eq!(
        record.metadata["issues"].as_array().map(Vec::len),
        Some(issues.len())
    );

    let exhausted = orchestrator
        .store()
        .list_traces(&TraceFilter::new().with_status(TraceStatus::Exhausted))
        .await
        .unwrap();
    assert_eq!(exhausted.len(), 1);
    assert!(!exhausted[0].issues.is_empty());

    // A failed job can be restarted from the beginning.
    let restarted = orchestrator.restart_job(job.id).await.unwrap();
    assert_eq!(restarted.stage, Stage::Pending);
    assert_eq!(restarted.progress.run, job.progress.run + 1);
}

#[tokio::test]
async fn test_cancelled_job_halts_queued_stage() {
    let queue = Arc::new(InMemoryWorkQueue::new("test"));
    let store = ProgressStore::in_memory().await.unwrap();
    let orchestrator = PipelineOrchestrator::new(store, engine())
        .with_queue(queue.clone())
        .with_handler(CannedHandler::new(
            PipelineStep::Summarization,
            summary(),
            r#"{"title": "Cells", "summary": "An overview of cell biology.", "key_points": ["cells"]}"#,
        ));
    let job = orchestrator.store().create_job().await.unwrap();

    orchestrator
        .enqueue_stage(job.id, PipelineStep::Summarization, json!({}))
        .await
        .unwrap()
        .unwrap();
    orchestrator.cancel_job(job.id, Some("author withdrew")).await.unwrap();

    let item = queue
        .dequeue(std::time::Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    let outcome = orchestrator.run_stage(&item).await.unwrap();

    assert_eq!(
        outcome,
        StageOutcome::Halted {
            stage: Stage::Cancelled
        }
    );
    assert!(orchestrator
        .enqueue_stage(job.id, PipelineStep::Summarization, json!({}))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_step_with_two_documents_runs_both() {
    let queue = Arc::new(InMemoryWorkQueue::new("test"));
    let store = ProgressStore::in_memory().await.unwrap();
    let handler = Arc::new(DocumentHandler {
        seen: Mutex::new(Vec::new()),
    });
    let orchestrator = PipelineOrchestrator::new(store, engine())
        .with_queue(queue.clone())
        .with_handler(handler.clone());
    let job = orchestrator.store().create_job().await.unwrap();

    let enqueued = orchestrator
        .enqueue_stage_batch(
            job.id,
            PipelineStep::Summarization,
            vec![json!({"doc": "A"}), json!({"doc": "B"})],
        )
        .await
        .unwrap();
    assert_eq!(enqueued.len(), 2);

    let mut outcomes = Vec::new();
    while let Some(item) = queue
        .dequeue(std::time::Duration::from_millis(10))
        .await
        .unwrap()
    {
        outcomes.push(orchestrator.run_stage(&item).await.unwrap());
    }

    assert_eq!(outcomes.len(), 2);
    assert!(matches!(
        outcomes[0],
        StageOutcome::Completed {
            step_completed: false,
            ..
        }
    ));
    assert!(matches!(
        outcomes[1],
        StageOutcome::Completed {
            step_completed: true,
            ..
        }
    ));
    assert_eq!(*handler.seen.lock().unwrap(), vec!["A", "B"]);

    let job = orchestrator.store().get_job(job.id).await.unwrap();
    assert_eq!(job.stage, Stage::Stage2Complete);
    let record = job.progress.step(PipelineStep::Summarization).unwrap();
    assert_eq!(record.pending_items(), 0);
    assert_eq!(record.metadata["items"], 2);

    let audit = orchestrator.store().list_transitions(job.id).await.unwrap();
    let completions = audit
        .iter()
        .filter(|t| t.accepted && t.to_stage == Stage::Stage2Complete)
        .count();
    assert_eq!(completions, 1);
}

// ============================================================================
// Full run
// ============================================================================

#[tokio::test]
async fn test_full_run_finalizes_after_last_step() {
    let store = ProgressStore::in_memory().await.unwrap();
    let handlers: [Arc<dyn StageHandler>; 3] = [
        CannedHandler::new(
            PipelineStep::Summarization,
            summary(),
            r#"{"title": "Cells", "summary": "An overview of cell biology.", "key_points": ["cells"]}"#,
        ),
        CannedHandler::new(
            PipelineStep::StructureAnalysis,
            structure_analysis(),
            r#"```json
{"modules": [{"title": "Intro", "summary": "Basics", "topics": ["cells"]}],
 "difficulty": "beginner",
 "learning_outcomes": {"outcomes": ["Explain cells"]},}
```"#,
        ),
        CannedHandler::new(
            PipelineStep::SectionGeneration,
            section_metadata(),
            r#"{"sections": [{"title": "Basics", "lesson_count": 1,
                "lessons": [{"title": "Cells", "objective": "Describe cells", "duration_minutes": 15}]}]}"#,
        ),
    ];
    let orchestrator = PipelineOrchestrator::new(store, engine()).with_handlers(handlers);
    let job = orchestrator.store().create_job().await.unwrap();

    let mut last = None;
    for step in [
        PipelineStep::Summarization,
        PipelineStep::StructureAnalysis,
        PipelineStep::SectionGeneration,
    ] {
        let item = WorkItem::new(job.id, step, json!({}));
        last = Some(orchestrator.run_stage(&item).await.unwrap());
    }

    assert!(matches!(
        last,
        Some(StageOutcome::Completed { finalized: true, .. })
    ));

    let job = orchestrator.store().get_job(job.id).await.unwrap();
    assert_eq!(job.stage, Stage::Completed);

    let structure = job.progress.step(PipelineStep::StructureAnalysis).unwrap();
    assert_eq!(structure.metadata["strategy_used"], "syntax-repair");

    let stats = orchestrator.stats().await;
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.failed, 0);

    // A late duplicate of the last item changes nothing.
    let duplicate = WorkItem::new(job.id, PipelineStep::SectionGeneration, json!({}));
    assert_eq!(
        orchestrator.run_stage(&duplicate).await.unwrap(),
        StageOutcome::Halted {
            stage: Stage::Completed
        }
    );
}
