//! Data models for codecheck-jit
//!
//! - Jurisdiction load status and job state machines (durable)
//! - Code sources, fetched documents and extracted rules (per run)

pub mod agent_job;
pub mod code_source;
pub mod document;
pub mod jurisdiction;
pub mod rule;

pub use agent_job::{AgentJob, JobStatus, JobType, LoadSummary};
pub use code_source::{CodeSource, SourceType};
pub use document::{DocumentStats, FetchedDocument};
pub use jurisdiction::{JurisdictionDataStatus, JurisdictionRef, LoadStatus};
pub use rule::{ExtractedRule, ExtractionMethod, Requirement, StoredRule};

use chrono::{DateTime, Utc};
use codecheck_common::{Error, Result};

/// Parse an RFC 3339 timestamp column
pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt(format!("{} '{}': {}", column, value, e)))
}

/// Parse an optional RFC 3339 timestamp column
pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}
