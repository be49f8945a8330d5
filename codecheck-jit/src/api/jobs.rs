//! Job API handlers
//!
//! GET /jobs/:job_id, POST /jobs/:job_id/cancel

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::jobs;
use crate::error::{ApiError, ApiResult};
use crate::models::{AgentJob, JobStatus, JobType, LoadSummary};
use crate::AppState;

/// GET /jobs/:job_id response
#[derive(Debug, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub jurisdiction_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub result: Option<LoadSummary>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<AgentJob> for JobResponse {
    fn from(job: AgentJob) -> Self {
        Self {
            id: job.id,
            jurisdiction_id: job.jurisdiction_id,
            job_type: job.job_type,
            status: job.status,
            progress: job.progress_percentage,
            message: job.progress_message,
            result: job.result,
            error: job.error_message,
            started_at: job.started_at,
            completed_at: job.completed_at,
            created_at: job.created_at,
        }
    }
}

/// POST /jobs/:job_id/cancel response
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// GET /jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobResponse>> {
    let job = jobs::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", job_id)))?;

    Ok(Json(JobResponse::from(job)))
}

/// POST /jobs/:job_id/cancel
///
/// 409 Conflict if the job already finished.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<CancelJobResponse>> {
    if !state.coordinator.cancel(job_id).await? {
        return Err(ApiError::Conflict(format!("Job {} already finished", job_id)));
    }

    tracing::info!(job_id = %job_id, "Job cancelled via API");
    Ok(Json(CancelJobResponse {
        id: job_id,
        status: JobStatus::Failed,
        message: "Load cancelled by administrator".to_string(),
    }))
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
}
