//! Jurisdiction load status operations
//!
//! The status row is the load mutex: a run exists only after a successful
//! compare-and-set `pending/failed → loading`, committed together with the
//! job row. Works across processes sharing the database file.

use codecheck_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{jobs, now_text, MAX_LOCK_WAIT_MS};
use crate::models::{parse_optional_timestamp, parse_timestamp, AgentJob, JurisdictionDataStatus, LoadStatus};
use crate::utils::retry_on_lock;

/// Outcome of a load trigger
#[derive(Debug, Clone)]
pub enum BeginLoad {
    /// This caller won the transition; the job row is `pending`
    Started(AgentJob),
    /// Another run holds the jurisdiction
    AlreadyLoading(Option<Uuid>),
    /// Rules are cached and no refresh was requested
    AlreadyLoaded,
}

fn status_from_row(row: &SqliteRow) -> Result<JurisdictionDataStatus> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(JurisdictionDataStatus {
        jurisdiction_id: row.try_get("jurisdiction_id")?,
        status: status.parse().map_err(Error::Corrupt)?,
        rules_count: row.try_get("rules_count")?,
        last_fetch_attempt: parse_optional_timestamp(
            "last_fetch_attempt",
            row.try_get("last_fetch_attempt")?,
        )?,
        last_successful_fetch: parse_optional_timestamp(
            "last_successful_fetch",
            row.try_get("last_successful_fetch")?,
        )?,
        error_message: row.try_get("error_message")?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

pub async fn get_status(pool: &SqlitePool, jurisdiction_id: &str) -> Result<Option<JurisdictionDataStatus>> {
    let row = sqlx::query(
        "SELECT jurisdiction_id, status, rules_count, last_fetch_attempt, \
                last_successful_fetch, error_message, created_at, updated_at \
         FROM jurisdiction_data_status WHERE jurisdiction_id = ?",
    )
    .bind(jurisdiction_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(status_from_row).transpose()
}

/// Atomically claim the jurisdiction for a new run
///
/// Creates the status row on first trigger. `refresh` additionally lets a
/// `complete` jurisdiction be reloaded; `loading` is never re-entered.
pub async fn begin_load(pool: &SqlitePool, jurisdiction_id: &str, refresh: bool) -> Result<BeginLoad> {
    retry_on_lock("begin_load", MAX_LOCK_WAIT_MS, || async {
        let now = now_text();
        let mut tx = pool.begin().await?;

        // First statement writes, so the transaction takes the write lock
        // before reading anything.
        sqlx::query(
            "INSERT INTO jurisdiction_data_status \
                 (jurisdiction_id, status, rules_count, created_at, updated_at) \
             VALUES (?, 'pending', 0, ?, ?) \
             ON CONFLICT(jurisdiction_id) DO NOTHING",
        )
        .bind(jurisdiction_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let claimed = sqlx::query(
            "UPDATE jurisdiction_data_status SET \
                 status = 'loading', last_fetch_attempt = ?, error_message = NULL, updated_at = ? \
             WHERE jurisdiction_id = ? \
               AND (status IN ('pending', 'failed') OR (? AND status = 'complete')) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM agent_jobs \
                   WHERE jurisdiction_id = ? AND status IN ('pending', 'running'))",
        )
        .bind(&now)
        .bind(&now)
        .bind(jurisdiction_id)
        .bind(refresh)
        .bind(jurisdiction_id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 1 {
            let job = AgentJob::new_load(jurisdiction_id);
            jobs::insert_job(&mut *tx, &job).await?;
            tx.commit().await?;
            return Ok(BeginLoad::Started(job));
        }

        let status: String = sqlx::query_scalar(
            "SELECT status FROM jurisdiction_data_status WHERE jurisdiction_id = ?",
        )
        .bind(jurisdiction_id)
        .fetch_one(&mut *tx)
        .await?;
        let status: LoadStatus = status.parse().map_err(Error::Corrupt)?;

        // A run that already committed its rules may still be finishing its
        // job row; it keeps the jurisdiction until then.
        let active = jobs::active_job(&mut *tx, jurisdiction_id).await?;
        let outcome = match (active, status) {
            (Some(job), _) => BeginLoad::AlreadyLoading(Some(job.id)),
            (None, LoadStatus::Complete) => BeginLoad::AlreadyLoaded,
            (None, _) => BeginLoad::AlreadyLoading(None),
        };
        tx.commit().await?;
        Ok(outcome)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;

    #[tokio::test]
    async fn test_first_trigger_creates_row_and_job() {
        let (_dir, pool) = test_pool().await;
        assert!(get_status(&pool, "boulder-co").await.unwrap().is_none());

        let job = match begin_load(&pool, "boulder-co", false).await.unwrap() {
            BeginLoad::Started(job) => job,
            other => panic!("expected Started, got {:?}", other),
        };

        let status = get_status(&pool, "boulder-co").await.unwrap().unwrap();
        assert_eq!(status.status, LoadStatus::Loading);
        assert_eq!(status.rules_count, 0);
        assert!(status.last_fetch_attempt.is_some());
        assert!(jobs::get_job(&pool, job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_trigger_returns_existing_job() {
        let (_dir, pool) = test_pool().await;
        let first = match begin_load(&pool, "boulder-co", false).await.unwrap() {
            BeginLoad::Started(job) => job,
            other => panic!("expected Started, got {:?}", other),
        };

        match begin_load(&pool, "boulder-co", true).await.unwrap() {
            BeginLoad::AlreadyLoading(Some(id)) => assert_eq!(id, first.id),
            other => panic!("expected AlreadyLoading, got {:?}", other),
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agent_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_failed_jurisdiction_can_be_retriggered() {
        let (_dir, pool) = test_pool().await;
        let first = match begin_load(&pool, "boulder-co", false).await.unwrap() {
            BeginLoad::Started(job) => job,
            other => panic!("expected Started, got {:?}", other),
        };
        jobs::fail_job(&pool, first.id, "boulder-co", "All sources failed")
            .await
            .unwrap();

        let failed = get_status(&pool, "boulder-co").await.unwrap().unwrap();
        assert_eq!(failed.status, LoadStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("All sources failed"));

        match begin_load(&pool, "boulder-co", false).await.unwrap() {
            BeginLoad::Started(job) => assert_ne!(job.id, first.id),
            other => panic!("expected Started, got {:?}", other),
        }
        let retried = get_status(&pool, "boulder-co").await.unwrap().unwrap();
        assert_eq!(retried.status, LoadStatus::Loading);
        assert!(retried.error_message.is_none());
    }

    #[tokio::test]
    async fn test_refresh_waits_for_finishing_run() {
        let (_dir, pool) = test_pool().await;
        let first = match begin_load(&pool, "boulder-co", false).await.unwrap() {
            BeginLoad::Started(job) => job,
            other => panic!("expected Started, got {:?}", other),
        };
        // Rules committed, job row not yet completed
        sqlx::query("UPDATE jurisdiction_data_status SET status = 'complete', rules_count = 3")
            .execute(&pool)
            .await
            .unwrap();

        match begin_load(&pool, "boulder-co", true).await.unwrap() {
            BeginLoad::AlreadyLoading(Some(id)) => assert_eq!(id, first.id),
            other => panic!("expected AlreadyLoading, got {:?}", other),
        }
        let status = get_status(&pool, "boulder-co").await.unwrap().unwrap();
        assert_eq!(status.status, LoadStatus::Complete);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_start_exactly_one_run() {
        let (_dir, pool) = test_pool().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                begin_load(&pool, "lakewood-co", false).await.unwrap()
            }));
        }

        let mut started = 0;
        for handle in handles {
            if let BeginLoad::Started(_) = handle.await.unwrap() {
                started += 1;
            }
        }
        assert_eq!(started, 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agent_jobs WHERE jurisdiction_id = ?")
            .bind("lakewood-co")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
