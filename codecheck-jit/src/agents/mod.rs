//! Pipeline agents
//!
//! Each stage of a code load is a small capability trait so the coordinator
//! can be assembled from real implementations in production and stubs in
//! tests:
//!
//! - [`Discoverer`]: jurisdiction → candidate code sources
//! - [`Fetcher`]: source → validated document text
//! - [`Extractor`]: section text → scored rules (AI or pattern based)
//! - [`Writer`]: rules → committed cache + `complete` status

pub mod document_fetcher;
pub mod persistence_writer;
pub mod rule_extractor;
pub mod source_discovery;

pub use document_fetcher::DocumentFetcher;
pub use persistence_writer::SqliteRuleWriter;
pub use rule_extractor::{RuleExtractor, Section};
pub use source_discovery::CatalogDiscoverer;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::models::{CodeSource, ExtractedRule, ExtractionMethod, FetchedDocument, JurisdictionRef};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Source lookup failed: {0}")]
    Lookup(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Unsupported content type '{0}'")]
    UnsupportedContent(String),

    #[error("No retrievable text for {0}")]
    Unavailable(String),

    #[error("Document failed validation: {0}")]
    Invalid(String),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Extractor not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Could not parse extractor output: {0}")]
    Parse(String),

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Refusing to persist an empty rule set")]
    EmptyRuleSet,

    #[error("Jurisdiction {0} is no longer loading")]
    StatusConflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] codecheck_common::Error),
}

/// Finds candidate code sources for a jurisdiction
#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn discover(&self, jurisdiction: &JurisdictionRef) -> Result<Vec<CodeSource>, DiscoveryError>;
}

/// Retrieves and validates one source's text
///
/// Implementations return only documents that passed validation.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &CodeSource) -> Result<FetchedDocument, FetchError>;
}

/// Turns one section of code text into scored rules
#[async_trait]
pub trait Extractor: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    /// False when the extractor lacks what it needs to run (e.g. credentials)
    fn is_available(&self) -> bool {
        true
    }

    async fn extract(&self, section: &Section) -> Result<Vec<ExtractedRule>, ExtractionError>;
}

/// Commits a jurisdiction's rule set and marks it complete
#[async_trait]
pub trait Writer: Send + Sync {
    /// Returns the number of rules stored
    async fn persist(&self, jurisdiction_id: &str, rules: &[ExtractedRule]) -> Result<usize, PersistError>;
}
