//! Background job records
//!
//! `pending → running → {completed, failed}`. Terminal jobs are immutable;
//! the store guards every transition on the source state.

use crate::error::Degradation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    LoadCodes,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::LoadCodes => "load_codes",
        }
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "load_codes" => Ok(JobType::LoadCodes),
            other => Err(format!("unknown job type '{}'", other)),
        }
    }
}

/// One background run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentJob {
    pub id: Uuid,
    pub jurisdiction_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    /// 0-100, never decreasing
    pub progress_percentage: u8,
    pub progress_message: Option<String>,
    /// Set on completion
    pub result: Option<LoadSummary>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Last write to the row; doubles as the run's heartbeat
    pub updated_at: DateTime<Utc>,
}

impl AgentJob {
    /// Fresh `pending` load job for a jurisdiction
    pub fn new_load(jurisdiction_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            jurisdiction_id: jurisdiction_id.into(),
            job_type: JobType::LoadCodes,
            status: JobStatus::Pending,
            progress_percentage: 0,
            progress_message: Some("Queued".to_string()),
            result: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome summary stored in `agent_jobs.result`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSummary {
    pub rules_count: usize,
    pub sources_found: usize,
    pub sources_used: usize,
    pub sections_total: usize,
    /// Sections whose rules came from the AI path
    pub sections_ai: usize,
    /// Sections that fell back to (or only had) pattern extraction
    pub sections_pattern: usize,
    /// Sections where every extraction method failed
    pub sections_exhausted: usize,
    /// Rules dropped for scoring below the confidence threshold
    pub rules_discarded: usize,
    pub average_confidence: f64,
    #[serde(default)]
    pub degradations: Vec<Degradation>,
}

impl LoadSummary {
    /// Short human-readable outcome for progress messages
    pub fn headline(&self) -> String {
        if self.degradations.is_empty() {
            format!(
                "Complete! Loaded {} rules from {} sources",
                self.rules_count, self.sources_used
            )
        } else {
            format!(
                "Complete! Loaded {} rules from {} sources ({} warnings)",
                self.rules_count,
                self.sources_used,
                self.degradations.len()
            )
        }
    }
}
