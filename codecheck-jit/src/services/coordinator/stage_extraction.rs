//! EXTRACTION stage
//!
//! Documents are split into sections and each section runs through the
//! AI → pattern chain. A section that exhausts every extractor is skipped;
//! the stage is fatal only if nothing at all survives.

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::Coordinator;
use crate::agents::rule_extractor::{split_sections, SectionExtraction};
use crate::error::LoadError;
use crate::models::{ExtractedRule, ExtractionMethod, FetchedDocument, LoadSummary};
use crate::services::progress::{ProgressReporter, Stage};

impl Coordinator {
    pub(super) async fn stage_extraction(
        &self,
        documents: Vec<FetchedDocument>,
        reporter: &ProgressReporter,
        summary: &mut LoadSummary,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractedRule>, LoadError> {
        let sections: Vec<_> = documents.iter().flat_map(split_sections).collect();
        let total = sections.len();
        summary.sections_total = total;

        reporter
            .stage(Stage::Extraction, 0.0, format!("Extracting rules from {} sections", total))
            .await;

        let extractor = &self.extractor;
        let sections = &sections;
        let mut results = stream::iter(0..sections.len())
            .map(|i| extractor.extract_section(&sections[i]))
            .buffered(self.settings.extraction_concurrency);

        let mut rules = Vec::new();
        let mut done = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LoadError::Cancelled),
                next = results.next() => next,
            };
            let Some(extraction) = next else {
                break;
            };
            done += 1;

            record_section(summary, &extraction);
            rules.extend(extraction.rules);

            reporter
                .stage(
                    Stage::Extraction,
                    done as f64 / total.max(1) as f64,
                    format!("Extracted {}/{} sections ({} rules)", done, total, rules.len()),
                )
                .await;
        }

        if rules.is_empty() {
            return Err(LoadError::NoRulesExtracted { sections: total });
        }

        tracing::info!(
            sections = total,
            ai = summary.sections_ai,
            pattern = summary.sections_pattern,
            exhausted = summary.sections_exhausted,
            rules = rules.len(),
            discarded = summary.rules_discarded,
            "Extraction finished"
        );
        Ok(rules)
    }
}

fn record_section(summary: &mut LoadSummary, extraction: &SectionExtraction) {
    match extraction.method {
        Some(ExtractionMethod::Ai) => summary.sections_ai += 1,
        Some(ExtractionMethod::Pattern) => summary.sections_pattern += 1,
        None => summary.sections_exhausted += 1,
    }
    summary.rules_discarded += extraction.discarded;
    if let Some(degradation) = &extraction.degradation {
        summary.degradations.push(degradation.clone());
    }
}
