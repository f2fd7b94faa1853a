//! Schema migrations for the SQLite progress store.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use super::schema::{self, tables};

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Applies the named migrations in `schema::MIGRATIONS` that have not run yet.
pub struct MigrationRunner {
    pool: SqlitePool,
}

impl MigrationRunner {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Runs all pending migrations. Returns the names applied by this call.
    ///
    /// Idempotent: already-recorded migrations are skipped.
    pub async fn run_migrations(&self) -> Result<Vec<String>, MigrationError> {
        self.ensure_migrations_table().await?;

        let mut applied = Vec::new();
        for (name, statement) in schema::MIGRATIONS {
            if !self.is_migration_applied(name).await? {
                self.apply_migration(name, statement).await?;
                tracing::info!(migration = %name, "Applied migration");
                applied.push(name.to_string());
            }
        }

        Ok(applied)
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL
            )",
            tables::MIGRATIONS
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn is_migration_applied(&self, name: &str) -> Result<bool, MigrationError> {
        let row = sqlx::query("SELECT id FROM _migrations WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn apply_migration(&self, name: &str, sql: &str) -> Result<(), MigrationError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| MigrationError::MigrationFailed(format!("{}: {}", name, e)))?;

        sqlx::query("INSERT INTO _migrations (name, applied_at) VALUES (?, ?)")
            .bind(name)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Migrations recorded so far, oldest first.
    pub async fn list_applied_migrations(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        self.ensure_migrations_table().await?;

        let rows = sqlx::query("SELECT name, applied_at FROM _migrations ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| AppliedMigration {
                name: row.get("name"),
                applied_at: row.get("applied_at"),
            })
            .collect())
    }
}

/// Record of an applied migration.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let runner = MigrationRunner::new(memory_pool().await);

        let first = runner.run_migrations().await.unwrap();
        assert_eq!(first.len(), schema::MIGRATIONS.len());

        let second = runner.run_migrations().await.unwrap();
        assert!(second.is_empty());

        let applied = runner.list_applied_migrations().await.unwrap();
        assert_eq!(applied[0].name, "0001_create_jobs");
        assert_eq!(applied.len(), schema::MIGRATIONS.len());
    }

    #[test]
    fn test_migration_error_display() {
        let err = MigrationError::MigrationFailed("0001_create_jobs: syntax error".to_string());
        assert!(err.to_string().contains("0001_create_jobs"));
    }
}
