//! Database access for codecheck-jit
//!
//! SQLite holds three tables:
//! - `jurisdiction_data_status`: one row per jurisdiction, the load mutex
//! - `agent_jobs`: one row per background run
//! - `code_rules`: the cached rule set of each jurisdiction

pub mod jobs;
pub mod jurisdiction_status;
pub mod rules;

use chrono::{DateTime, SecondsFormat, Utc};
use codecheck_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;

/// Per-connection SQLite busy_timeout
const BUSY_TIMEOUT_MS: u64 = 250;

/// Total retry budget for operations hitting lock contention
pub const MAX_LOCK_WAIT_MS: u64 = 5000;

const POOL_SIZE: u32 = 8;

/// Open (creating if needed) the database and ensure tables exist
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(POOL_SIZE)
        .acquire_timeout(Duration::from_millis(MAX_LOCK_WAIT_MS))
        .connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await?;

    init_tables(&pool).await?;

    tracing::info!(
        "Database pool ready: {} connections, busy_timeout={}ms",
        POOL_SIZE,
        BUSY_TIMEOUT_MS
    );

    Ok(pool)
}

/// Create tables and indexes if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jurisdiction_data_status (
            jurisdiction_id TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'loading', 'complete', 'failed')),
            rules_count INTEGER NOT NULL DEFAULT 0 CHECK (rules_count >= 0),
            last_fetch_attempt TEXT,
            last_successful_fetch TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (status != 'complete' OR rules_count > 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_jobs (
            id TEXT PRIMARY KEY,
            jurisdiction_id TEXT NOT NULL
                REFERENCES jurisdiction_data_status(jurisdiction_id),
            job_type TEXT NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('pending', 'running', 'completed', 'failed')),
            progress_percentage INTEGER NOT NULL DEFAULT 0
                CHECK (progress_percentage BETWEEN 0 AND 100),
            progress_message TEXT,
            result TEXT,
            error_message TEXT,
            started_at TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_agent_jobs_jurisdiction \
         ON agent_jobs(jurisdiction_id, created_at)",
    )
    .execute(pool)
    .await?;

    // At most one non-terminal job per jurisdiction, even across processes
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_agent_jobs_one_active \
         ON agent_jobs(jurisdiction_id) WHERE status IN ('pending', 'running')",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS code_rules (
            id TEXT PRIMARY KEY,
            jurisdiction_id TEXT NOT NULL
                REFERENCES jurisdiction_data_status(jurisdiction_id),
            code_family TEXT NOT NULL,
            edition TEXT NOT NULL,
            section_ref TEXT NOT NULL,
            category TEXT NOT NULL CHECK (length(category) > 0),
            requirement TEXT NOT NULL
                CHECK (requirement IN ('min', 'max', 'exact', 'range')),
            value REAL NOT NULL,
            unit TEXT NOT NULL,
            rule_json TEXT NOT NULL,
            confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
            extraction_method TEXT NOT NULL CHECK (extraction_method IN ('ai', 'pattern')),
            validation_status TEXT NOT NULL DEFAULT 'auto',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_code_rules_jurisdiction \
         ON code_rules(jurisdiction_id, category)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (jurisdiction_data_status, agent_jobs, code_rules)");

    Ok(())
}

/// Timestamp text stored in every `*_at` column
///
/// Fixed width and UTC so lexical order matches chronological order.
pub(crate) fn timestamp_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now_text() -> String {
    timestamp_text(Utc::now())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let (_dir, pool) = test_support::test_pool().await;
        init_tables(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables, vec!["agent_jobs", "code_rules", "jurisdiction_data_status"]);
    }

    #[tokio::test]
    async fn test_complete_requires_rules() {
        let (_dir, pool) = test_support::test_pool().await;
        let now = now_text();
        let result = sqlx::query(
            "INSERT INTO jurisdiction_data_status \
             (jurisdiction_id, status, rules_count, created_at, updated_at) \
             VALUES ('empty', 'complete', 0, ?, ?)",
        )
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_timestamp_text_orders_lexically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(1500);
        assert!(timestamp_text(earlier) < timestamp_text(later));
        assert!(timestamp_text(earlier).ends_with('Z'));
    }
}
