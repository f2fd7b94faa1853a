//! The static stage transition table.
//!
//! Built once per process and never mutated. Every stage write goes through
//! [`is_legal_transition`] inside the store's transaction.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use super::stage::{PipelineStep, Stage};

type TransitionTable = HashMap<Stage, HashSet<Stage>>;

static TABLE: OnceLock<TransitionTable> = OnceLock::new();

fn build_table() -> TransitionTable {
    let mut table: TransitionTable = Stage::ALL.iter().map(|stage| (*stage, HashSet::new())).collect();
    let mut allow = |from: Stage, to: Stage| {
        if let Some(targets) = table.get_mut(&from) {
            targets.insert(to);
        }
    };

    for step in PipelineStep::ALL.into_iter().filter(PipelineStep::is_work_step) {
        for predecessor in step.init_predecessors() {
            allow(*predecessor, step.init_stage());
        }
        allow(step.init_stage(), step.running_stage());
        allow(step.init_stage(), step.complete_stage());
        allow(step.running_stage(), step.complete_stage());
    }
    for predecessor in PipelineStep::Finalization.init_predecessors() {
        allow(*predecessor, Stage::Finalizing);
    }
    allow(Stage::Finalizing, Stage::Completed);

    for stage in Stage::ALL.into_iter().filter(|stage| !stage.is_terminal()) {
        allow(stage, Stage::Failed);
        allow(stage, Stage::Cancelled);
    }

    // Explicit restarts.
    allow(Stage::Completed, Stage::Pending);
    allow(Stage::Failed, Stage::Pending);
    allow(Stage::Cancelled, Stage::Pending);

    table
}

fn table() -> &'static TransitionTable {
    TABLE.get_or_init(build_table)
}

/// Whether `from -> to` is in the table.
pub fn is_legal_transition(from: Stage, to: Stage) -> bool {
    table().get(&from).is_some_and(|targets| targets.contains(&to))
}

/// Legal next stages from `from`, in progression order.
pub fn allowed_next(from: Stage) -> Vec<Stage> {
    let mut next: Vec<Stage> = table()
        .get(&from)
        .map(|targets| targets.iter().copied().collect())
        .unwrap_or_default();
    next.sort_by_key(|stage| (stage.rank(), stage.as_str()));
    next
}
