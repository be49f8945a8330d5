//! Jurisdiction API handlers
//!
//! GET /jurisdictions/:id/status, POST /jurisdictions/:id/load-codes,
//! GET /jurisdictions/:id/rules, GET /jurisdictions/:id/jobs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jobs::JobResponse;
use crate::db::{jobs, jurisdiction_status, rules};
use crate::error::{ApiError, ApiResult};
use crate::models::{JobStatus, JurisdictionRef, LoadStatus, StoredRule};
use crate::services::{LoadOutcome, LoadRequest};
use crate::AppState;

const MAX_JURISDICTION_ID_LEN: usize = 128;
const DEFAULT_JOB_LIMIT: u32 = 20;
const MAX_JOB_LIMIT: u32 = 100;

/// Client-facing load state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicStatus {
    Ready,
    Loading,
    NotLoaded,
    Failed,
}

impl From<LoadStatus> for PublicStatus {
    fn from(status: LoadStatus) -> Self {
        match status {
            LoadStatus::Pending => PublicStatus::NotLoaded,
            LoadStatus::Loading => PublicStatus::Loading,
            LoadStatus::Complete => PublicStatus::Ready,
            LoadStatus::Failed => PublicStatus::Failed,
        }
    }
}

/// GET /jurisdictions/:id/status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: PublicStatus,
    pub rule_count: i64,
    pub progress: u8,
    pub message: String,
    pub job_id: Option<Uuid>,
}

/// POST /jurisdictions/:id/load-codes body (all optional)
#[derive(Debug, Default, Deserialize)]
pub struct LoadCodesRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoadCodesQuery {
    #[serde(default)]
    pub refresh: bool,
}

/// POST /jurisdictions/:id/load-codes response
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadCodesResponse {
    pub status: LoadOutcome,
    pub job_id: Option<Uuid>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RulesQuery {
    /// Category or category prefix (`stairs` matches `stairs.riser`)
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub jurisdiction_id: String,
    pub count: usize,
    pub rules: Vec<StoredRule>,
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jurisdiction_id: String,
    pub jobs: Vec<JobResponse>,
}

fn validate_jurisdiction_id(id: &str) -> ApiResult<()> {
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if id.is_empty() || id.len() > MAX_JURISDICTION_ID_LEN || !valid_chars {
        return Err(ApiError::BadRequest(format!("Invalid jurisdiction id: '{}'", id)));
    }
    Ok(())
}

/// GET /jurisdictions/:id/status
///
/// Cheap poll: reads the status row and the newest job only.
pub async fn get_status(
    State(state): State<AppState>,
    Path(jurisdiction_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    validate_jurisdiction_id(&jurisdiction_id)?;

    let Some(row) = jurisdiction_status::get_status(&state.db, &jurisdiction_id).await? else {
        return Ok(Json(StatusResponse {
            status: PublicStatus::NotLoaded,
            rule_count: 0,
            progress: 0,
            message: "Building codes have not been loaded for this jurisdiction".to_string(),
            job_id: None,
        }));
    };

    let job = jobs::latest_job(&state.db, &jurisdiction_id).await?;
    let job_id = job.as_ref().map(|j| j.id);

    let response = match row.status {
        LoadStatus::Pending => StatusResponse {
            status: PublicStatus::NotLoaded,
            rule_count: 0,
            progress: 0,
            message: "Building codes have not been loaded for this jurisdiction".to_string(),
            job_id,
        },
        LoadStatus::Loading => {
            let (progress, message) = match &job {
                Some(job) if !job.status.is_terminal() => (
                    job.progress_percentage,
                    job.progress_message
                        .clone()
                        .unwrap_or_else(|| "Loading building codes".to_string()),
                ),
                _ => (0, "Loading building codes".to_string()),
            };
            StatusResponse {
                status: PublicStatus::Loading,
                rule_count: 0,
                progress,
                message,
                job_id,
            }
        }
        LoadStatus::Complete => StatusResponse {
            status: PublicStatus::Ready,
            rule_count: row.rules_count,
            progress: 100,
            message: match &row.error_message {
                Some(error) => format!("{} rules available (last reload failed: {})", row.rules_count, error),
                None => format!("{} rules available", row.rules_count),
            },
            job_id,
        },
        LoadStatus::Failed => StatusResponse {
            status: PublicStatus::Failed,
            rule_count: 0,
            progress: job
                .as_ref()
                .filter(|j| j.status == JobStatus::Failed)
                .map(|j| j.progress_percentage)
                .unwrap_or(0),
            message: row
                .error_message
                .unwrap_or_else(|| "Code load failed".to_string()),
            job_id,
        },
    };

    Ok(Json(response))
}

/// POST /jurisdictions/:id/load-codes
///
/// Idempotent trigger. 202 Accepted when a new load started, 200 when one
/// is already running or rules are cached.
pub async fn load_codes(
    State(state): State<AppState>,
    Path(jurisdiction_id): Path<String>,
    Query(query): Query<LoadCodesQuery>,
    body: Option<Json<LoadCodesRequest>>,
) -> ApiResult<(StatusCode, Json<LoadCodesResponse>)> {
    validate_jurisdiction_id(&jurisdiction_id)?;
    let body = body.map(|Json(body)| body).unwrap_or_default();

    let name = body
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| jurisdiction_id.clone());
    let mut jurisdiction = JurisdictionRef::new(jurisdiction_id.clone(), name);
    if let Some(kind) = body.kind.filter(|k| !k.trim().is_empty()) {
        jurisdiction = jurisdiction.with_kind(kind);
    }
    if let Some(us_state) = body.state.filter(|s| !s.trim().is_empty()) {
        jurisdiction = jurisdiction.with_state(us_state);
    }

    let request = LoadRequest::new(jurisdiction).refresh(query.refresh);
    let ticket = match state.coordinator.load_codes(request).await {
        Ok(ticket) => ticket,
        Err(e) => {
            state
                .record_error(format!("load-codes {}: {}", jurisdiction_id, e))
                .await;
            return Err(e.into());
        }
    };

    let (status, message) = match ticket.outcome {
        LoadOutcome::Initiated => (StatusCode::ACCEPTED, "Code loading initiated"),
        LoadOutcome::Loading => (StatusCode::OK, "Codes are already being loaded"),
        LoadOutcome::AlreadyLoaded => (StatusCode::OK, "Codes already loaded"),
    };

    Ok((
        status,
        Json(LoadCodesResponse {
            status: ticket.outcome,
            job_id: ticket.job_id,
            message: message.to_string(),
        }),
    ))
}

/// GET /jurisdictions/:id/rules
pub async fn list_rules(
    State(state): State<AppState>,
    Path(jurisdiction_id): Path<String>,
    Query(query): Query<RulesQuery>,
) -> ApiResult<Json<RulesResponse>> {
    validate_jurisdiction_id(&jurisdiction_id)?;

    let category = query.category.as_deref().filter(|c| !c.trim().is_empty());
    let rules = rules::list_rules(&state.db, &jurisdiction_id, category).await?;

    Ok(Json(RulesResponse {
        jurisdiction_id,
        count: rules.len(),
        rules,
    }))
}

/// GET /jurisdictions/:id/jobs (newest first)
pub async fn list_jobs(
    State(state): State<AppState>,
    Path(jurisdiction_id): Path<String>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Json<JobsResponse>> {
    validate_jurisdiction_id(&jurisdiction_id)?;

    let limit = query.limit.unwrap_or(DEFAULT_JOB_LIMIT).clamp(1, MAX_JOB_LIMIT);
    let jobs = jobs::list_jobs(&state.db, &jurisdiction_id, limit).await?;

    Ok(Json(JobsResponse {
        jurisdiction_id,
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
    }))
}

pub fn jurisdiction_routes() -> Router<AppState> {
    Router::new()
        .route("/jurisdictions/:id/status", get(get_status))
        .route("/jurisdictions/:id/load-codes", post(load_codes))
        .route("/jurisdictions/:id/rules", get(list_rules))
        .route("/jurisdictions/:id/jobs", get(list_jobs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jurisdiction_id_validation() {
        assert!(validate_jurisdiction_id("boulder-co").is_ok());
        assert!(validate_jurisdiction_id("fips_08013").is_ok());
        assert!(validate_jurisdiction_id("").is_err());
        assert!(validate_jurisdiction_id("../etc").is_err());
        assert!(validate_jurisdiction_id("has space").is_err());
        assert!(validate_jurisdiction_id(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_public_status_mapping() {
        assert_eq!(PublicStatus::from(LoadStatus::Pending), PublicStatus::NotLoaded);
        assert_eq!(PublicStatus::from(LoadStatus::Complete), PublicStatus::Ready);
        assert_eq!(
            serde_json::to_value(PublicStatus::NotLoaded).unwrap(),
            serde_json::json!("not_loaded")
        );
    }
}
