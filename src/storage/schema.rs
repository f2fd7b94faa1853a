//! SQLite schema for the progress store.
//!
//! Timestamps are stored as RFC 3339 text, ids as hyphenated UUID text and
//! JSON payloads as text.

/// Jobs and their current stage. `progress` holds the serialized `JobProgress`.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY NOT NULL,
    stage TEXT NOT NULL,
    progress TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// Append-only audit log of every attempted transition, accepted or not.
pub const CREATE_STAGE_TRANSITIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS stage_transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES jobs(id),
    step INTEGER,
    raw_status TEXT NOT NULL,
    from_stage TEXT NOT NULL,
    to_stage TEXT NOT NULL,
    accepted INTEGER NOT NULL,
    reason TEXT,
    message TEXT,
    created_at TEXT NOT NULL
)
"#;

/// One row per regeneration engine run.
pub const CREATE_GENERATION_TRACES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS generation_traces (
    id TEXT PRIMARY KEY NOT NULL,
    job_id TEXT NOT NULL REFERENCES jobs(id),
    step INTEGER NOT NULL,
    status TEXT NOT NULL,
    strategy_used TEXT,
    attempts INTEGER NOT NULL,
    issues TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

pub const CREATE_JOBS_STAGE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_stage ON jobs(stage)";

pub const CREATE_TRANSITIONS_JOB_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_stage_transitions_job_id ON stage_transitions(job_id, id)";

pub const CREATE_TRACES_JOB_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_generation_traces_job_id ON generation_traces(job_id)";

pub const CREATE_TRACES_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_generation_traces_status ON generation_traces(status, created_at)";

/// Named migrations in application order. Names are recorded in `_migrations`
/// and must never change once released.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_create_jobs", CREATE_JOBS_TABLE),
    ("0002_create_stage_transitions", CREATE_STAGE_TRANSITIONS_TABLE),
    ("0003_create_generation_traces", CREATE_GENERATION_TRACES_TABLE),
    ("0004_index_jobs_stage", CREATE_JOBS_STAGE_INDEX),
    ("0005_index_transitions_job", CREATE_TRANSITIONS_JOB_INDEX),
    ("0006_index_traces_job", CREATE_TRACES_JOB_INDEX),
    ("0007_index_traces_status", CREATE_TRACES_STATUS_INDEX),
];

/// Table names in the schema.
pub mod tables {
    pub const JOBS: &str = "jobs";
    pub const STAGE_TRANSITIONS: &str = "stage_transitions";
    pub const GENERATION_TRACES: &str = "generation_traces";
    pub const MIGRATIONS: &str = "_migrations";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_created_before_indexes() {
        let first_index = MIGRATIONS
            .iter()
            .position(|(_, sql)| sql.contains("CREATE INDEX"))
            .unwrap();
        assert!(MIGRATIONS[..first_index]
            .iter()
            .all(|(_, sql)| sql.contains("CREATE TABLE")));
        assert!(MIGRATIONS[0].1.contains(tables::JOBS));
    }

    #[test]
    fn test_migration_names_unique() {
        let mut names: Vec<&str> = MIGRATIONS.iter().map(|(name, _)| *name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), MIGRATIONS.len());
    }
}
