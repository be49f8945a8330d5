//! PERSISTENCE stage

use super::Coordinator;
use crate::error::LoadError;
use crate::models::{ExtractedRule, LoadSummary};
use crate::services::progress::{ProgressReporter, Stage};

impl Coordinator {
    pub(super) async fn stage_persistence(
        &self,
        jurisdiction_id: &str,
        rules: Vec<ExtractedRule>,
        reporter: &ProgressReporter,
        summary: &mut LoadSummary,
    ) -> Result<(), LoadError> {
        reporter
            .stage(Stage::Persistence, 0.0, format!("Saving {} rules", rules.len()))
            .await;

        let stored = self
            .writer
            .persist(jurisdiction_id, &rules)
            .await
            .map_err(|e| LoadError::PersistenceFailed(e.to_string()))?;

        summary.rules_count = stored;
        summary.average_confidence = average_confidence(&rules);

        reporter
            .stage(Stage::Persistence, 1.0, format!("Saved {} rules", stored))
            .await;
        Ok(())
    }
}

/// Mean confidence rounded to 3 decimals; 0 for an empty set
fn average_confidence(rules: &[ExtractedRule]) -> f64 {
    if rules.is_empty() {
        return 0.0;
    }
    let mean = rules.iter().map(|rule| rule.confidence).sum::<f64>() / rules.len() as f64;
    (mean * 1000.0).round() / 1000.0
}
