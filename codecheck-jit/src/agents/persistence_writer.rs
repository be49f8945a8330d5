//! Transactional rule persistence
//!
//! The rule set swap and the `loading → complete` transition commit
//! together or not at all. A jurisdiction that is no longer `loading`
//! (cancelled, recovered as stale) is never marked complete.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{PersistError, Writer};
use crate::db::rules::replace_rules;
use crate::db::{now_text, MAX_LOCK_WAIT_MS};
use crate::models::ExtractedRule;
use crate::utils::retry_on_lock;

/// Writer backed by the service's SQLite database
#[derive(Clone)]
pub struct SqliteRuleWriter {
    pool: SqlitePool,
}

impl SqliteRuleWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Writer for SqliteRuleWriter {
    async fn persist(&self, jurisdiction_id: &str, rules: &[ExtractedRule]) -> Result<usize, PersistError> {
        if rules.is_empty() {
            return Err(PersistError::EmptyRuleSet);
        }

        let stored = retry_on_lock("persist_rules", MAX_LOCK_WAIT_MS, || async {
            let now = now_text();
            let mut tx = self.pool.begin().await?;

            // Guarded transition first: takes the write lock and confirms
            // this run still owns the jurisdiction.
            let claimed = sqlx::query(
                "UPDATE jurisdiction_data_status SET \
                     status = 'complete', rules_count = ?, last_successful_fetch = ?, \
                     error_message = NULL, updated_at = ? \
                 WHERE jurisdiction_id = ? AND status = 'loading'",
            )
            .bind(rules.len() as i64)
            .bind(&now)
            .bind(&now)
            .bind(jurisdiction_id)
            .execute(&mut *tx)
            .await?;

            if claimed.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(None);
            }

            let stored = replace_rules(&mut *tx, jurisdiction_id, rules).await?;
            tx.commit().await?;
            Ok(Some(stored))
        })
        .await?;

        match stored {
            Some(count) => {
                tracing::info!(jurisdiction_id, rules = count, "Persisted rule set");
                Ok(count)
            }
            None => Err(PersistError::StatusConflict(jurisdiction_id.to_string())),
        }
    }
}
