//! Cached rule set queries

use codecheck_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::now_text;
use crate::models::{parse_timestamp, ExtractedRule, StoredRule};

/// Replace a jurisdiction's rule set (caller owns the transaction)
///
/// Returns the number of rules inserted.
pub async fn replace_rules(
    conn: &mut SqliteConnection,
    jurisdiction_id: &str,
    rules: &[ExtractedRule],
) -> Result<usize> {
    let removed = sqlx::query("DELETE FROM code_rules WHERE jurisdiction_id = ?")
        .bind(jurisdiction_id)
        .execute(&mut *conn)
        .await?;

    tracing::debug!(
        jurisdiction_id,
        removed = removed.rows_affected(),
        inserting = rules.len(),
        "Replacing cached rules"
    );

    let created_at = now_text();
    for rule in rules {
        let rule_json = serde_json::to_string(rule)
            .map_err(|e| Error::Internal(format!("Failed to serialize rule: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO code_rules (
                id, jurisdiction_id, code_family, edition, section_ref, category,
                requirement, value, unit, rule_json, confidence, extraction_method,
                validation_status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'auto', ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(jurisdiction_id)
        .bind(&rule.code_family)
        .bind(&rule.edition)
        .bind(&rule.section_ref)
        .bind(&rule.category)
        .bind(rule.requirement.as_str())
        .bind(rule.value)
        .bind(&rule.unit)
        .bind(&rule_json)
        .bind(rule.confidence)
        .bind(rule.extraction_method.as_str())
        .bind(&created_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(rules.len())
}

fn stored_rule_from_row(row: &SqliteRow) -> Result<StoredRule> {
    let id: String = row.try_get("id")?;
    let rule_json: String = row.try_get("rule_json")?;
    let created_at: String = row.try_get("created_at")?;

    let rule: ExtractedRule = serde_json::from_str(&rule_json)
        .map_err(|e| Error::Corrupt(format!("rule {}: {}", id, e)))?;

    Ok(StoredRule {
        id: Uuid::parse_str(&id).map_err(|e| Error::Corrupt(format!("rule id '{}': {}", id, e)))?,
        jurisdiction_id: row.try_get("jurisdiction_id")?,
        rule,
        validation_status: row.try_get("validation_status")?,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

/// Cached rules of a jurisdiction, optionally narrowed to a category prefix
/// (`stairs` matches `stairs.riser`, `stairs.tread`, ...)
pub async fn list_rules(
    pool: &SqlitePool,
    jurisdiction_id: &str,
    category: Option<&str>,
) -> Result<Vec<StoredRule>> {
    let rows = match category {
        Some(category) => {
            sqlx::query(
                "SELECT id, jurisdiction_id, rule_json, validation_status, created_at \
                 FROM code_rules \
                 WHERE jurisdiction_id = ? AND (category = ? OR category LIKE ? || '.%') \
                 ORDER BY category, section_ref",
            )
            .bind(jurisdiction_id)
            .bind(category)
            .bind(category)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT id, jurisdiction_id, rule_json, validation_status, created_at \
                 FROM code_rules WHERE jurisdiction_id = ? \
                 ORDER BY category, section_ref",
            )
            .bind(jurisdiction_id)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(stored_rule_from_row).collect()
}

pub async fn count_rules(pool: &SqlitePool, jurisdiction_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM code_rules WHERE jurisdiction_id = ?")
        .bind(jurisdiction_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
