//! Rule extraction
//!
//! [`RuleExtractor`] composes a primary extractor (AI) with a deterministic
//! fallback (patterns) section by section:
//!
//! 1. primary rules, when any of them clears the confidence threshold in time
//! 2. otherwise fallback rules; a primary error is recorded as
//!    `ExtractionDegraded`
//! 3. if the fallback also fails the section contributes nothing and is
//!    recorded as `ExtractionExhausted`
//!
//! Rules under the confidence threshold are discarded here, before they
//! can reach persistence.

pub mod ai;
pub mod claude_client;
pub mod pattern;
pub mod scoring;
pub mod sections;
pub mod units;

pub use ai::AiExtractor;
pub use claude_client::{ClaudeClient, CompletionProvider};
pub use pattern::PatternExtractor;
pub use sections::split_sections;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::{ExtractionError, Extractor};
use crate::error::Degradation;
use crate::models::{ExtractedRule, ExtractionMethod};

/// A unit of code text with the reference rules will cite
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub section_ref: String,
    pub title: Option<String>,
    pub text: String,
    pub code_family: String,
    pub edition: String,
}

/// Result of extracting one section
#[derive(Debug, Clone)]
pub struct SectionExtraction {
    pub section_ref: String,
    /// Extractor whose output was used; `None` when every extractor failed
    pub method: Option<ExtractionMethod>,
    /// Rules at or above the confidence threshold
    pub rules: Vec<ExtractedRule>,
    /// Rules dropped for low confidence
    pub discarded: usize,
    pub degradation: Option<Degradation>,
}

pub struct RuleExtractor {
    primary: Option<Arc<dyn Extractor>>,
    fallback: Arc<dyn Extractor>,
    timeout: Duration,
    threshold: f64,
}

impl RuleExtractor {
    /// Compose extractors
    ///
    /// A primary that reports itself unavailable is dropped, leaving the
    /// fallback as the only path.
    pub fn new(
        primary: Option<Arc<dyn Extractor>>,
        fallback: Arc<dyn Extractor>,
        timeout: Duration,
        threshold: f64,
    ) -> Self {
        let primary = primary.filter(|extractor| {
            let available = extractor.is_available();
            if !available {
                tracing::warn!(
                    method = extractor.method().as_str(),
                    "Primary extractor unavailable, using fallback only"
                );
            }
            available
        });

        Self {
            primary,
            fallback,
            timeout,
            threshold,
        }
    }

    /// Pattern extraction only
    pub fn pattern_only(timeout: Duration, threshold: f64) -> Self {
        Self::new(None, Arc::new(PatternExtractor::new()), timeout, threshold)
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    async fn run(&self, extractor: &dyn Extractor, section: &Section) -> Result<Vec<ExtractedRule>, ExtractionError> {
        tokio::time::timeout(self.timeout, extractor.extract(section))
            .await
            .map_err(|_| ExtractionError::Timeout(self.timeout))?
    }

    fn accept(
        &self,
        section: &Section,
        method: ExtractionMethod,
        rules: Vec<ExtractedRule>,
        degradation: Option<Degradation>,
    ) -> SectionExtraction {
        let total = rules.len();
        let rules: Vec<ExtractedRule> = rules
            .into_iter()
            .filter(|rule| rule.confidence >= self.threshold)
            .collect();

        SectionExtraction {
            section_ref: section.section_ref.clone(),
            method: Some(method),
            discarded: total - rules.len(),
            rules,
            degradation,
        }
    }

    /// Extract one section through the fallback chain
    pub async fn extract_section(&self, section: &Section) -> SectionExtraction {
        let mut primary_error = None;
        let mut primary_discarded = 0;

        if let Some(primary) = &self.primary {
            match self.run(primary.as_ref(), section).await {
                Ok(rules) => {
                    let accepted = self.accept(section, primary.method(), rules, None);
                    if !accepted.rules.is_empty() {
                        return accepted;
                    }
                    tracing::debug!(
                        section = %section.section_ref,
                        discarded = accepted.discarded,
                        "Primary extractor found no usable rules, trying fallback"
                    );
                    primary_discarded = accepted.discarded;
                }
                Err(e) => {
                    tracing::warn!(section = %section.section_ref, error = %e, "Primary extraction failed, using fallback");
                    primary_error = Some(e.to_string());
                }
            }
        }

        match self.run(self.fallback.as_ref(), section).await {
            Ok(rules) => {
                let degradation = primary_error.map(|reason| Degradation::ExtractionDegraded {
                    section_ref: section.section_ref.clone(),
                    reason,
                });
                let mut extraction = self.accept(section, self.fallback.method(), rules, degradation);
                extraction.discarded += primary_discarded;
                extraction
            }
            Err(e) => {
                tracing::warn!(section = %section.section_ref, error = %e, "Fallback extraction failed");
                let reason = match primary_error {
                    Some(primary) => format!("{}; {}", primary, e),
                    None => e.to_string(),
                };
                SectionExtraction {
                    section_ref: section.section_ref.clone(),
                    method: None,
                    rules: Vec::new(),
                    discarded: primary_discarded,
                    degradation: Some(Degradation::ExtractionExhausted {
                        section_ref: section.section_ref.clone(),
                        reason,
                    }),
                }
            }
        }
    }

    /// Rules of one section that pass the threshold
    pub async fn extract(&self, section: &Section) -> Vec<ExtractedRule> {
        self.extract_section(section).await.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn section() -> Section {
        Section {
            section_ref: "R311.7.3".to_string(),
            title: Some("Riser height and tread depth".to_string()),
            text: "Stairway riser heights shall be 7 3/4 inches maximum and 4 inches minimum.".to_string(),
            code_family: "IRC".to_string(),
            edition: "2021".to_string(),
        }
    }

    enum Behavior {
        Fail,
        Hang,
        Empty,
        Rules(f64),
    }

    struct Stub {
        method: ExtractionMethod,
        behavior: Behavior,
        available: bool,
    }

    impl Stub {
        fn ai(behavior: Behavior) -> Arc<dyn Extractor> {
            Arc::new(Self {
                method: ExtractionMethod::Ai,
                behavior,
                available: true,
            })
        }

        fn pattern(behavior: Behavior) -> Arc<dyn Extractor> {
            Arc::new(Self {
                method: ExtractionMethod::Pattern,
                behavior,
                available: true,
            })
        }
    }

    #[async_trait]
    impl Extractor for Stub {
        fn method(&self) -> ExtractionMethod {
            self.method
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn extract(&self, section: &Section) -> Result<Vec<ExtractedRule>, ExtractionError> {
            match self.behavior {
                Behavior::Fail => Err(ExtractionError::Api {
                    status: 529,
                    body: "overloaded".to_string(),
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Vec::new())
                }
                Behavior::Empty => Ok(Vec::new()),
                Behavior::Rules(confidence) => {
                    let mut rules = PatternExtractor::new().extract_rules(section);
                    for rule in &mut rules {
                        rule.confidence = confidence;
                        rule.extraction_method = self.method;
                    }
                    Ok(rules)
                }
            }
        }
    }

    fn extractor(primary: Option<Arc<dyn Extractor>>, fallback: Arc<dyn Extractor>) -> RuleExtractor {
        RuleExtractor::new(primary, fallback, Duration::from_millis(200), 0.5)
    }

    #[tokio::test]
    async fn test_primary_rules_used_when_present() {
        let result = extractor(Some(Stub::ai(Behavior::Rules(0.95))), Stub::pattern(Behavior::Fail))
            .extract_section(&section())
            .await;
        assert_eq!(result.method, Some(ExtractionMethod::Ai));
        assert_eq!(result.rules.len(), 2);
        assert!(result.degradation.is_none());
    }

    #[tokio::test]
    async fn test_primary_error_degrades_to_fallback() {
        let result = extractor(Some(Stub::ai(Behavior::Fail)), Arc::new(PatternExtractor::new()))
            .extract_section(&section())
            .await;
        assert_eq!(result.method, Some(ExtractionMethod::Pattern));
        assert_eq!(result.rules.len(), 2);
        match result.degradation {
            Some(Degradation::ExtractionDegraded { section_ref, reason }) => {
                assert_eq!(section_ref, "R311.7.3");
                assert!(reason.contains("529"));
            }
            other => panic!("expected ExtractionDegraded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_primary_timeout_degrades_to_fallback() {
        let result = extractor(Some(Stub::ai(Behavior::Hang)), Arc::new(PatternExtractor::new()))
            .extract_section(&section())
            .await;
        assert_eq!(result.method, Some(ExtractionMethod::Pattern));
        assert!(matches!(result.degradation, Some(Degradation::ExtractionDegraded { .. })));
    }

    #[tokio::test]
    async fn test_empty_primary_falls_back_without_degradation() {
        let result = extractor(Some(Stub::ai(Behavior::Empty)), Arc::new(PatternExtractor::new()))
            .extract_section(&section())
            .await;
        assert_eq!(result.method, Some(ExtractionMethod::Pattern));
        assert_eq!(result.rules.len(), 2);
        assert!(result.degradation.is_none());
    }

    #[tokio::test]
    async fn test_low_confidence_primary_falls_back() {
        let result = extractor(Some(Stub::ai(Behavior::Rules(0.3))), Arc::new(PatternExtractor::new()))
            .extract_section(&section())
            .await;
        assert_eq!(result.method, Some(ExtractionMethod::Pattern));
        assert_eq!(result.rules.len(), 2);
        assert!(result.rules.iter().all(|r| r.extraction_method == ExtractionMethod::Pattern));
        assert_eq!(result.discarded, 2);
        assert!(result.degradation.is_none());
    }

    #[tokio::test]
    async fn test_both_failing_exhausts_section() {
        let result = extractor(Some(Stub::ai(Behavior::Fail)), Stub::pattern(Behavior::Fail))
            .extract_section(&section())
            .await;
        assert!(result.method.is_none());
        assert!(result.rules.is_empty());
        assert!(matches!(result.degradation, Some(Degradation::ExtractionExhausted { .. })));
    }

    #[tokio::test]
    async fn test_low_confidence_rules_discarded() {
        let result = extractor(None, Stub::pattern(Behavior::Rules(0.3)))
            .extract_section(&section())
            .await;
        assert!(result.rules.is_empty());
        assert_eq!(result.discarded, 2);
    }

    #[tokio::test]
    async fn test_unavailable_primary_dropped() {
        let unavailable: Arc<dyn Extractor> = Arc::new(Stub {
            method: ExtractionMethod::Ai,
            behavior: Behavior::Rules(0.95),
            available: false,
        });
        let composed = extractor(Some(unavailable), Arc::new(PatternExtractor::new()));
        assert!(!composed.has_primary());
        let rules = composed.extract(&section()).await;
        assert!(rules.iter().all(|r| r.extraction_method == ExtractionMethod::Pattern));
    }
}
