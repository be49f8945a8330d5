//! Agent job database operations
//!
//! Every state change is a single guarded statement (or one transaction), so a
//! poller never observes a torn write and terminal rows never change again.

use chrono::Utc;
use codecheck_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::time::Duration;
use uuid::Uuid;

use super::{now_text, timestamp_text, MAX_LOCK_WAIT_MS};
use crate::models::{parse_optional_timestamp, parse_timestamp, AgentJob, JobStatus, LoadSummary};
use crate::utils::retry_on_lock;

const JOB_COLUMNS: &str = "id, jurisdiction_id, job_type, status, progress_percentage, \
     progress_message, result, error_message, started_at, completed_at, created_at, updated_at";

fn job_from_row(row: &SqliteRow) -> Result<AgentJob> {
    let id: String = row.try_get("id")?;
    let job_type: String = row.try_get("job_type")?;
    let status: String = row.try_get("status")?;
    let progress: i64 = row.try_get("progress_percentage")?;
    let result: Option<String> = row.try_get("result")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let result = result
        .map(|text| serde_json::from_str::<LoadSummary>(&text))
        .transpose()
        .map_err(|e| Error::Corrupt(format!("job {} result: {}", id, e)))?;

    Ok(AgentJob {
        id: Uuid::parse_str(&id).map_err(|e| Error::Corrupt(format!("job id '{}': {}", id, e)))?,
        jurisdiction_id: row.try_get("jurisdiction_id")?,
        job_type: job_type.parse().map_err(Error::Corrupt)?,
        status: status.parse().map_err(Error::Corrupt)?,
        progress_percentage: progress.clamp(0, 100) as u8,
        progress_message: row.try_get("progress_message")?,
        result,
        error_message: row.try_get("error_message")?,
        started_at: parse_optional_timestamp("started_at", row.try_get("started_at")?)?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

/// Insert a new job row (caller owns the transaction)
pub async fn insert_job(conn: &mut SqliteConnection, job: &AgentJob) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO agent_jobs (
            id, jurisdiction_id, job_type, status, progress_percentage,
            progress_message, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.id.to_string())
    .bind(&job.jurisdiction_id)
    .bind(job.job_type.as_str())
    .bind(job.status.as_str())
    .bind(job.progress_percentage as i64)
    .bind(&job.progress_message)
    .bind(timestamp_text(job.created_at))
    .bind(timestamp_text(job.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<AgentJob>> {
    let sql = format!("SELECT {} FROM agent_jobs WHERE id = ?", JOB_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// The jurisdiction's pending or running job, if any
pub async fn active_job(
    conn: &mut SqliteConnection,
    jurisdiction_id: &str,
) -> Result<Option<AgentJob>> {
    let sql = format!(
        "SELECT {} FROM agent_jobs \
         WHERE jurisdiction_id = ? AND status IN ('pending', 'running') \
         ORDER BY created_at DESC LIMIT 1",
        JOB_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(jurisdiction_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Most recently created job of a jurisdiction, whatever its status
pub async fn latest_job(pool: &SqlitePool, jurisdiction_id: &str) -> Result<Option<AgentJob>> {
    Ok(list_jobs(pool, jurisdiction_id, 1).await?.into_iter().next())
}

/// Job history, newest first
pub async fn list_jobs(pool: &SqlitePool, jurisdiction_id: &str, limit: u32) -> Result<Vec<AgentJob>> {
    let sql = format!(
        "SELECT {} FROM agent_jobs WHERE jurisdiction_id = ? \
         ORDER BY created_at DESC, rowid DESC LIMIT ?",
        JOB_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(jurisdiction_id)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    rows.iter().map(job_from_row).collect()
}

/// `pending → running`; false if the job was not pending
pub async fn mark_running(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let id = job_id.to_string();
    retry_on_lock("mark_job_running", MAX_LOCK_WAIT_MS, || async {
        let now = now_text();
        let result = sqlx::query(
            "UPDATE agent_jobs SET status = 'running', started_at = ?, updated_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(&now)
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    })
    .await
}

/// Write a progress checkpoint
///
/// The stored percentage only ever grows: a lower value keeps the old number
/// but still refreshes the message and heartbeat. Returns false when the job
/// is not running.
pub async fn record_progress(
    pool: &SqlitePool,
    job_id: Uuid,
    percentage: u8,
    message: &str,
) -> Result<bool> {
    let id = job_id.to_string();
    let percentage = percentage.min(100) as i64;
    retry_on_lock("record_job_progress", MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            "UPDATE agent_jobs SET \
                 progress_percentage = MAX(progress_percentage, ?), \
                 progress_message = ?, \
                 updated_at = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(percentage)
        .bind(message)
        .bind(now_text())
        .bind(&id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    })
    .await
}

/// `running → completed` at 100% with the run summary
pub async fn complete_job(pool: &SqlitePool, job_id: Uuid, summary: &LoadSummary) -> Result<bool> {
    let id = job_id.to_string();
    let result_json = serde_json::to_string(summary)
        .map_err(|e| Error::Internal(format!("Failed to serialize job result: {}", e)))?;
    let message = summary.headline();

    retry_on_lock("complete_job", MAX_LOCK_WAIT_MS, || async {
        let now = now_text();
        let result = sqlx::query(
            "UPDATE agent_jobs SET \
                 status = 'completed', progress_percentage = 100, progress_message = ?, \
                 result = ?, error_message = NULL, completed_at = ?, updated_at = ? \
             WHERE id = ? AND status = 'running'",
        )
        .bind(&message)
        .bind(&result_json)
        .bind(&now)
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    })
    .await
}

/// Status of a jurisdiction whose run ended without completing: a
/// previously cached rule set stays served as `complete`, otherwise `failed`
const RELEASE_STATUS: &str = "\
    status = CASE WHEN EXISTS ( \
        SELECT 1 FROM code_rules c WHERE c.jurisdiction_id = jurisdiction_data_status.jurisdiction_id) \
        THEN 'complete' ELSE 'failed' END, \
    rules_count = (SELECT COUNT(*) FROM code_rules c \
        WHERE c.jurisdiction_id = jurisdiction_data_status.jurisdiction_id)";

/// Fail a job and release its jurisdiction in one transaction
///
/// The jurisdiction leaves `loading` only if this call actually ended the
/// job; a job that was already terminal leaves both rows alone. A failed
/// reload of a cached jurisdiction returns it to `complete` with the rules
/// it still has.
pub async fn fail_job(
    pool: &SqlitePool,
    job_id: Uuid,
    jurisdiction_id: &str,
    error_message: &str,
) -> Result<bool> {
    let id = job_id.to_string();
    retry_on_lock("fail_job", MAX_LOCK_WAIT_MS, || async {
        let now = now_text();
        let mut tx = pool.begin().await?;

        let job_update = sqlx::query(
            "UPDATE agent_jobs SET \
                 status = 'failed', error_message = ?, progress_message = ?, \
                 completed_at = ?, updated_at = ? \
             WHERE id = ? AND status IN ('pending', 'running')",
        )
        .bind(error_message)
        .bind(format!("Failed: {}", error_message))
        .bind(&now)
        .bind(&now)
        .bind(&id)
        .execute(&mut *tx)
        .await?;

        if job_update.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(&format!(
            "UPDATE jurisdiction_data_status SET {}, error_message = ?, updated_at = ? \
             WHERE jurisdiction_id = ? AND status = 'loading'",
            RELEASE_STATUS
        ))
        .bind(error_message)
        .bind(&now)
        .bind(jurisdiction_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    })
    .await
}

/// Fail runs whose heartbeat is older than `stale_after`
///
/// Called at startup so a crashed process never leaves a jurisdiction stuck
/// in `loading`. Also releases `loading` rows that have no active job at all.
/// Returns the number of rows recovered.
pub async fn recover_stale_jobs(pool: &SqlitePool, stale_after: Duration) -> Result<usize> {
    let stale_after = chrono::Duration::from_std(stale_after)
        .map_err(|e| Error::InvalidInput(format!("stale timeout out of range: {}", e)))?;
    let cutoff = timestamp_text(Utc::now() - stale_after);

    let stale: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT id, jurisdiction_id, updated_at FROM agent_jobs \
         WHERE status IN ('pending', 'running') AND updated_at < ?",
    )
    .bind(&cutoff)
    .fetch_all(pool)
    .await?;

    let mut recovered = 0;
    for (id, jurisdiction_id, updated_at) in stale {
        let job_id = Uuid::parse_str(&id)
            .map_err(|e| Error::Corrupt(format!("job id '{}': {}", id, e)))?;
        let message = format!("Run interrupted: no progress since {}", updated_at);
        if fail_job(pool, job_id, &jurisdiction_id, &message).await? {
            tracing::warn!(job_id = %job_id, jurisdiction_id = %jurisdiction_id, "Recovered stale job");
            recovered += 1;
        }
    }

    let orphaned = sqlx::query(&format!(
        "UPDATE jurisdiction_data_status SET {}, \
             error_message = 'Load interrupted before completion', updated_at = ? \
         WHERE status = 'loading' AND NOT EXISTS ( \
             SELECT 1 FROM agent_jobs j \
             WHERE j.jurisdiction_id = jurisdiction_data_status.jurisdiction_id \
               AND j.status IN ('pending', 'running'))",
        RELEASE_STATUS
    ))
    .bind(now_text())
    .execute(pool)
    .await?;

    let orphaned = orphaned.rows_affected() as usize;
    if orphaned > 0 {
        tracing::warn!(count = orphaned, "Released jurisdictions stuck in loading without a job");
    }

    Ok(recovered + orphaned)
}

/// True if the job exists and is still pending or running
pub async fn is_active(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM agent_jobs WHERE id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    match status {
        Some(text) => {
            let status: JobStatus = text.parse().map_err(Error::Corrupt)?;
            Ok(!status.is_terminal())
        }
        None => Ok(false),
    }
}
