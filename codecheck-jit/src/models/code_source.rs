//! Candidate code sources produced by discovery

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a source sits in the adoption chain
///
/// Local amendments override municipal codes, which override state codes,
/// which override the national model codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    ModelCode,
    StateCode,
    MunicipalCode,
    Amendment,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::ModelCode => "model_code",
            SourceType::StateCode => "state_code",
            SourceType::MunicipalCode => "municipal_code",
            SourceType::Amendment => "amendment",
        }
    }

    /// Authority rank, higher wins
    pub fn priority(&self) -> u8 {
        match self {
            SourceType::Amendment => 4,
            SourceType::MunicipalCode => 3,
            SourceType::StateCode => 2,
            SourceType::ModelCode => 1,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "model_code" => Ok(SourceType::ModelCode),
            "state_code" => Ok(SourceType::StateCode),
            "municipal_code" => Ok(SourceType::MunicipalCode),
            "amendment" => Ok(SourceType::Amendment),
            other => Err(format!("unknown source type '{}'", other)),
        }
    }
}

/// A code document worth fetching for one jurisdiction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSource {
    pub name: String,
    /// IRC, IBC, NEC ...
    pub code_family: String,
    pub edition: String,
    /// URL or other retrieval hint
    pub locator: String,
    /// Who the source applies to ("national", a state code, a city name)
    pub applicability: String,
    pub source_type: SourceType,
    pub priority: u8,
}

impl CodeSource {
    pub fn new(
        name: impl Into<String>,
        code_family: impl Into<String>,
        edition: impl Into<String>,
        locator: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            name: name.into(),
            code_family: code_family.into(),
            edition: edition.into(),
            locator: locator.into(),
            applicability: "national".to_string(),
            source_type,
            priority: source_type.priority(),
        }
    }

    pub fn with_applicability(mut self, applicability: impl Into<String>) -> Self {
        self.applicability = applicability.into();
        self
    }

    /// `IRC 2021` style label used in logs and messages
    pub fn label(&self) -> String {
        format!("{} {}", self.code_family, self.edition)
    }
}
