//! FETCH stage
//!
//! Sources are fetched concurrently (bounded) with a per-source timeout.
//! Results come back in discovery order, so higher-priority sources lead
//! the document list. Fatal only when no source yields a usable document.

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::Coordinator;
use crate::agents::FetchError;
use crate::error::{Degradation, LoadError};
use crate::models::{CodeSource, FetchedDocument, LoadSummary};
use crate::services::progress::{ProgressReporter, Stage};

impl Coordinator {
    pub(super) async fn stage_fetch(
        &self,
        sources: Vec<CodeSource>,
        reporter: &ProgressReporter,
        summary: &mut LoadSummary,
        cancel: &CancellationToken,
    ) -> Result<Vec<FetchedDocument>, LoadError> {
        let total = sources.len();
        reporter
            .stage(Stage::Fetch, 0.0, format!("Fetching {} code sources", total))
            .await;

        let timeout = self.settings.fetch_timeout;
        let fetcher = &self.fetcher;
        let mut results = stream::iter(sources)
            .map(|source| async move {
                let result = match tokio::time::timeout(timeout, fetcher.fetch(&source)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(timeout)),
                };
                (source, result)
            })
            .buffered(self.settings.fetch_concurrency);

        let mut documents = Vec::new();
        let mut done = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LoadError::Cancelled),
                next = results.next() => next,
            };
            let Some((source, result)) = next else {
                break;
            };
            done += 1;

            match result {
                Ok(document) => {
                    tracing::debug!(source = %source.label(), chars = document.length, "Fetched code source");
                    documents.push(document);
                }
                Err(e) => {
                    tracing::warn!(source = %source.label(), error = %e, "Code source fetch failed");
                    summary.degradations.push(Degradation::FetchFailed {
                        source: source.label(),
                        reason: e.to_string(),
                    });
                }
            }

            reporter
                .stage(
                    Stage::Fetch,
                    done as f64 / total.max(1) as f64,
                    format!("Fetched {}/{} code sources", done, total),
                )
                .await;
        }

        if documents.is_empty() {
            return Err(LoadError::NoUsableSources { attempted: total });
        }

        summary.sources_used = documents.len();
        Ok(documents)
    }
}
