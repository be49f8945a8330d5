//! Structured numeric rules extracted from code text

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How a rule's value constrains a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    Min,
    Max,
    Exact,
    /// `value` is the lower bound, `max_value` the upper
    Range,
}

impl Requirement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Requirement::Min => "min",
            Requirement::Max => "max",
            Requirement::Exact => "exact",
            Requirement::Range => "range",
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Requirement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "min" | "minimum" => Ok(Requirement::Min),
            "max" | "maximum" => Ok(Requirement::Max),
            "exact" | "equal" => Ok(Requirement::Exact),
            "range" => Ok(Requirement::Range),
            other => Err(format!("unknown requirement '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Ai,
    Pattern,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Ai => "ai",
            ExtractionMethod::Pattern => "pattern",
        }
    }
}

impl FromStr for ExtractionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai" => Ok(ExtractionMethod::Ai),
            "pattern" => Ok(ExtractionMethod::Pattern),
            other => Err(format!("unknown extraction method '{}'", other)),
        }
    }
}

/// One measurable requirement, value already in the category's canonical unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRule {
    pub section_ref: String,
    pub code_family: String,
    pub edition: String,
    /// Dotted category such as `stairs.riser` or `railings.height`
    pub category: String,
    #[serde(default)]
    pub title: Option<String>,
    pub requirement: Requirement,
    pub value: f64,
    /// Upper bound for `Requirement::Range`
    #[serde(default)]
    pub max_value: Option<f64>,
    pub unit: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub exceptions: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// 0.0-1.0
    pub confidence: f64,
    pub extraction_method: ExtractionMethod,
}

impl ExtractedRule {
    /// True when `measured` (in the rule's unit) satisfies the rule
    pub fn permits(&self, measured: f64) -> bool {
        match self.requirement {
            Requirement::Min => measured >= self.value,
            Requirement::Max => measured <= self.value,
            Requirement::Exact => (measured - self.value).abs() < 1e-6,
            Requirement::Range => {
                measured >= self.value && self.max_value.map_or(true, |max| measured <= max)
            }
        }
    }
}

/// A persisted rule as served from the cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRule {
    pub id: Uuid,
    pub jurisdiction_id: String,
    #[serde(flatten)]
    pub rule: ExtractedRule,
    pub validation_status: String,
    pub created_at: DateTime<Utc>,
}
