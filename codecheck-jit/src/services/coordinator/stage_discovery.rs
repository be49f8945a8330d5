//! DISCOVERY stage
//!
//! Never fatal: a failing or empty discovery falls back to the default
//! model-code set.

use super::Coordinator;
use crate::agents::source_discovery::default_code_set;
use crate::error::Degradation;
use crate::models::{CodeSource, JurisdictionRef, LoadSummary};
use crate::services::progress::{ProgressReporter, Stage};

impl Coordinator {
    pub(super) async fn stage_discovery(
        &self,
        jurisdiction: &JurisdictionRef,
        reporter: &ProgressReporter,
        summary: &mut LoadSummary,
    ) -> Vec<CodeSource> {
        reporter
            .stage(Stage::Discovery, 0.0, format!("Discovering code sources for {}", jurisdiction.name))
            .await;

        let sources = match self.discoverer.discover(jurisdiction).await {
            Ok(sources) if !sources.is_empty() => sources,
            Ok(_) => {
                tracing::warn!(jurisdiction_id = %jurisdiction.id, "Discovery found no sources, using default model codes");
                summary.degradations.push(Degradation::DiscoveryDegraded {
                    reason: "No code sources found; using default model codes".to_string(),
                });
                default_code_set()
            }
            Err(e) => {
                tracing::warn!(jurisdiction_id = %jurisdiction.id, error = %e, "Discovery failed, using default model codes");
                summary.degradations.push(Degradation::DiscoveryDegraded {
                    reason: e.to_string(),
                });
                default_code_set()
            }
        };

        summary.sources_found = sources.len();
        reporter
            .stage(Stage::Discovery, 1.0, format!("Found {} code sources", sources.len()))
            .await;

        sources
    }
}
