//! Per-jurisdiction load status
//!
//! `pending → loading → {complete, failed}`; `failed → loading` on a new
//! trigger, `complete → loading` only on an explicit refresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Load status of a jurisdiction's cached rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Pending,
    Loading,
    Complete,
    Failed,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Pending => "pending",
            LoadStatus::Loading => "loading",
            LoadStatus::Complete => "complete",
            LoadStatus::Failed => "failed",
        }
    }

    /// Statuses a new trigger may move to `loading`
    pub fn accepts_trigger(&self, refresh: bool) -> bool {
        match self {
            LoadStatus::Pending | LoadStatus::Failed => true,
            LoadStatus::Complete => refresh,
            LoadStatus::Loading => false,
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LoadStatus::Pending),
            "loading" => Ok(LoadStatus::Loading),
            "complete" => Ok(LoadStatus::Complete),
            "failed" => Ok(LoadStatus::Failed),
            other => Err(format!("unknown load status '{}'", other)),
        }
    }
}

/// Durable status row, one per jurisdiction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionDataStatus {
    pub jurisdiction_id: String,
    pub status: LoadStatus,
    pub rules_count: i64,
    pub last_fetch_attempt: Option<DateTime<Utc>>,
    pub last_successful_fetch: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Jurisdiction metadata handed to discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JurisdictionRef {
    pub id: String,
    pub name: String,
    /// city, county, state ...
    pub kind: Option<String>,
    /// Two-letter state code
    pub state: Option<String>,
}

impl JurisdictionRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: None,
            state: None,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}
