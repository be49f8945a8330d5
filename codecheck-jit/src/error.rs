//! Error types for codecheck-jit
//!
//! - [`ApiError`]: HTTP-facing errors with JSON bodies
//! - [`LoadError`]: fatal outcomes of a code-load run
//! - [`Degradation`]: non-fatal events recorded in the job result

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. cancelling a finished job
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error("Common error: {0}")]
    Common(#[from] codecheck_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(codecheck_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(codecheck_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", message);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Non-fatal pipeline events
///
/// A run that records any of these still completes; they are kept in the
/// job result so operators can see what was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Degradation {
    /// Discovery errored or found nothing; the default model codes were used
    DiscoveryDegraded { reason: String },
    /// One source could not be fetched or failed validation
    FetchFailed { source: String, reason: String },
    /// AI extraction failed for a section; pattern extraction was used
    ExtractionDegraded { section_ref: String, reason: String },
    /// Every extraction method failed for a section; it contributed no rules
    ExtractionExhausted { section_ref: String, reason: String },
    /// A capability is unavailable (e.g. no AI credential)
    ConfigurationDegraded { reason: String },
}

impl Degradation {
    pub fn kind(&self) -> &'static str {
        match self {
            Degradation::DiscoveryDegraded { .. } => "DiscoveryDegraded",
            Degradation::FetchFailed { .. } => "FetchFailed",
            Degradation::ExtractionDegraded { .. } => "ExtractionDegraded",
            Degradation::ExtractionExhausted { .. } => "ExtractionExhausted",
            Degradation::ConfigurationDegraded { .. } => "ConfigurationDegraded",
        }
    }
}

/// Fatal outcomes of a load run; the job and jurisdiction end `failed`
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("No usable code sources: all {attempted} sources failed to fetch")]
    NoUsableSources { attempted: usize },

    #[error("No rules could be extracted from {sections} sections")]
    NoRulesExtracted { sections: usize },

    #[error("Failed to save rules: {0}")]
    PersistenceFailed(String),

    #[error("Load cancelled by administrator")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] codecheck_common::Error),
}

impl LoadError {
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::NoUsableSources { .. } => "NoUsableSources",
            LoadError::NoRulesExtracted { .. } => "NoRulesExtracted",
            LoadError::PersistenceFailed(_) => "PersistenceFailed",
            LoadError::Cancelled => "Cancelled",
            LoadError::Store(_) => "StoreError",
        }
    }
}
