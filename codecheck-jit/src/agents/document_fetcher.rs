//! Document fetching and validation
//!
//! Sources resolve to text in two ways:
//! - remote HTTP(S) retrieval of the locator, when enabled in `[fetch]`
//! - bundled model-code excerpts compiled into the binary
//!
//! Only model-code sources have bundled excerpts. A remote failure on one
//! falls back to the excerpt of the same family; state, municipal and
//! amendment sources have no fallback and fail with
//! [`FetchError::Unavailable`] when their text cannot be retrieved. Whatever
//! the origin, text must pass [`validate_document`] before it is handed on.

use async_trait::async_trait;
use codecheck_common::config::FetchConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

use super::{FetchError, Fetcher};
use crate::models::{CodeSource, FetchedDocument, SourceType};

const IRC_2021: &str = include_str!("../../assets/model_codes/irc_2021.txt");
const IBC_2021: &str = include_str!("../../assets/model_codes/ibc_2021.txt");

/// Phrases that mark an error page served with a 200 status
const ERROR_INDICATORS: &[&str] = &[
    "404 not found",
    "access denied",
    "page not found",
    "error occurred",
];

static SCRIPT_OR_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid regex"));
static BLOCK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?(p|div|br|li|h[1-6]|tr|section)[^>]*>").expect("valid regex"));
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("valid regex"));
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n\s*\n+").expect("valid regex"));

/// Bundled excerpt for a family, preferring the requested edition
///
/// Returns the edition actually used with its text.
pub fn bundled_text(code_family: &str, edition: &str) -> Option<(&'static str, &'static str)> {
    match (code_family.to_ascii_uppercase().as_str(), edition) {
        ("IRC", "2021") => Some(("2021", IRC_2021)),
        ("IBC", "2021") => Some(("2021", IBC_2021)),
        ("IRC", _) => Some(("2021", IRC_2021)),
        ("IBC", _) => Some(("2021", IBC_2021)),
        _ => None,
    }
}

/// Bundled excerpt standing in for `source`, model codes only
fn bundled_for(source: &CodeSource) -> Option<(&'static str, &'static str)> {
    match source.source_type {
        SourceType::ModelCode => bundled_text(&source.code_family, &source.edition),
        _ => None,
    }
}

/// Reject text that is too short, lacks metadata or looks like an error page
///
/// Marks the document valid on success.
pub fn validate_document(document: &mut FetchedDocument, min_chars: usize) -> Result<(), FetchError> {
    if document.length < min_chars {
        return Err(FetchError::Invalid(format!(
            "{} characters, need at least {}",
            document.length, min_chars
        )));
    }
    if document.source.code_family.trim().is_empty() || document.source.edition.trim().is_empty() {
        return Err(FetchError::Invalid("missing code family or edition".to_string()));
    }

    let lowered = document.text.to_lowercase();
    if let Some(indicator) = ERROR_INDICATORS.iter().find(|i| lowered.contains(*i)) {
        return Err(FetchError::Invalid(format!("content contains '{}'", indicator)));
    }

    document.valid = true;
    Ok(())
}

/// Reduce an HTML page to readable text, keeping block boundaries as newlines
pub fn html_to_text(html: &str) -> String {
    let text = SCRIPT_OR_STYLE.replace_all(html, " ");
    let text = BLOCK_TAG.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let text = SPACE_RUN.replace_all(&text, " ");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Production fetcher: remote retrieval (optional) with bundled fallback
pub struct DocumentFetcher {
    http_client: Option<reqwest::Client>,
    min_chars: usize,
}

impl DocumentFetcher {
    /// Build from `[fetch]` settings
    ///
    /// `timeout` bounds each HTTP request; the coordinator enforces its own
    /// per-fetch timeout around the whole call as well.
    pub fn new(config: &FetchConfig, timeout: Duration) -> Result<Self, FetchError> {
        let http_client = if config.remote_enabled {
            Some(
                reqwest::Client::builder()
                    .user_agent(config.user_agent.clone())
                    .timeout(timeout)
                    .build()?,
            )
        } else {
            None
        };

        Ok(Self {
            http_client,
            min_chars: config.min_document_chars,
        })
    }

    /// Fetcher that never touches the network
    pub fn bundled_only(min_chars: usize) -> Self {
        Self {
            http_client: None,
            min_chars,
        }
    }

    async fn fetch_remote(
        &self,
        client: &reqwest::Client,
        source: &CodeSource,
    ) -> Result<FetchedDocument, FetchError> {
        let response = client.get(&source.locator).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: source.locator.clone(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("text/plain")
            .to_ascii_lowercase();

        let body = response.text().await?;
        let text = if content_type.contains("html") {
            html_to_text(&body)
        } else if content_type.starts_with("text/") {
            body
        } else {
            return Err(FetchError::UnsupportedContent(content_type));
        };

        Ok(FetchedDocument::new(source.clone(), text, content_type))
    }

    fn fetch_bundled(&self, source: &CodeSource) -> Result<FetchedDocument, FetchError> {
        let (edition, text) = bundled_for(source).ok_or_else(|| FetchError::Unavailable(source.label()))?;

        if edition != source.edition {
            tracing::warn!(
                source = %source.label(),
                bundled_edition = edition,
                "Requested edition not bundled, using nearest bundled edition"
            );
        }

        Ok(FetchedDocument::new(source.clone(), text.to_string(), "text/plain"))
    }

    fn accept(&self, mut document: FetchedDocument) -> Result<FetchedDocument, FetchError> {
        validate_document(&mut document, self.min_chars)?;
        let stats = document.stats();
        tracing::info!(
            source = %document.source.label(),
            chars = stats.chars,
            words = stats.words,
            sections = stats.sections,
            chapters = stats.chapters,
            "Fetched document"
        );
        Ok(document)
    }
}

#[async_trait]
impl Fetcher for DocumentFetcher {
    async fn fetch(&self, source: &CodeSource) -> Result<FetchedDocument, FetchError> {
        let is_url = source.locator.starts_with("http://") || source.locator.starts_with("https://");

        if let (Some(client), true) = (&self.http_client, is_url) {
            let remote = self
                .fetch_remote(client, source)
                .await
                .and_then(|document| self.accept(document));
            match remote {
                Ok(document) => return Ok(document),
                Err(e) if bundled_for(source).is_some() => {
                    tracing::warn!(
                        source = %source.label(),
                        error = %e,
                        "Remote fetch failed, using bundled excerpt"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.accept(self.fetch_bundled(source)?)
    }
}
