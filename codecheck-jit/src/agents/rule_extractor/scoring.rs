//! Confidence scoring for extracted rules
//!
//! Both paths share the same first three signals. The AI path starts higher
//! and can earn more, so pattern rules average lower confidence.

use super::units::{is_standard_unit, written_forms};
use crate::models::ExtractedRule;

/// Top-level categories the scorers recognize
pub const COMMON_CATEGORIES: &[&str] = &[
    "stairs",
    "railings",
    "doors",
    "egress",
    "electrical",
    "accessibility",
    "windows",
];

pub fn is_common_category(category: &str) -> bool {
    let top = category.split('.').next().unwrap_or_default();
    COMMON_CATEGORIES.contains(&top)
}

fn shared_signals(rule: &ExtractedRule) -> f64 {
    let mut score = 0.0;
    if rule.value > 0.0 {
        score += 0.2;
    }
    if is_standard_unit(&rule.unit) {
        score += 0.1;
    }
    if is_common_category(&rule.category) {
        score += 0.1;
    }
    score
}

/// Score an AI-extracted rule against the section it came from
///
/// `raw_value` is the value as the model returned it, before unit
/// normalization, so it can be matched against the source text.
pub fn score_ai_rule(rule: &ExtractedRule, raw_value: f64, section_text: &str) -> f64 {
    let mut score = 0.5 + shared_signals(rule);
    if written_forms(raw_value).iter().any(|form| section_text.contains(form.as_str())) {
        score += 0.1;
    }
    if !rule.conditions.is_empty() {
        score += 0.05;
    }
    if !rule.exceptions.is_empty() {
        score += 0.05;
    }
    score.min(1.0)
}

pub fn score_pattern_rule(rule: &ExtractedRule) -> f64 {
    (0.4 + shared_signals(rule)).min(0.8)
}
