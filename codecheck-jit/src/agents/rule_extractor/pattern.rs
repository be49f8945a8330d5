//! Deterministic pattern extraction
//!
//! Works sentence by sentence. Each measurement ("7 3/4 inches",
//! "6 feet 8 inches") needs a qualifier in its clause to become a rule:
//! "not less than"/"minimum" give `min`, "not more than"/"shall not
//! exceed"/"maximum" give `max`. Tolerances ("by more than 3/8 inch") and
//! rates ("0.3 inch per occupant") are skipped. Text under an
//! `Exceptions:` marker is attached to the section's rules rather than
//! extracted.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::scoring::score_pattern_rule;
use super::units::{normalize, parse_quantity, LengthUnit};
use super::Section;
use crate::agents::{ExtractionError, Extractor};
use crate::models::{ExtractedRule, ExtractionMethod, Requirement};

static MEASUREMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (?:
            (?P<feet>\d+)\s*(?:feet|foot|ft)\.?\s+
            (?P<inches>\d+\s+\d+/\d+|\d+/\d+|\d+)\s*(?:inches|inch)\b
          |
            (?P<qty>\d+\s+\d+/\d+|\d+/\d+|\d+(?:\.\d+)?)\s*
            (?P<unit>inches\b|inch\b|in\.|feet\b|foot\b|ft\b|millimeters\b|millimetres\b|mm\b
                |centimeters\b|centimetres\b|cm\b|meters\b|metres\b)
        )",
    )
    .expect("valid regex")
});
static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\([^)]*\)").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static SENTENCE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\s+").expect("valid regex"));
static EXCEPTIONS_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*Exceptions?:").expect("valid regex"));
static EXCEPTION_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*\d+\.\s+").expect("valid regex"));
static TRAILING_QUALIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*,?\s*(maximum|minimum|max\b|min\b)").expect("valid regex"));

/// Characters after a measurement that may still describe it
const AFTER_WINDOW: usize = 40;

const MIN_PHRASES: &[&str] = &["not less than", "not be less than", "at least", "minimum"];
const MAX_PHRASES: &[&str] = &[
    "not more than",
    "not be more than",
    "not exceed",
    "not to exceed",
    "maximum",
];

/// Keyword sets (all must appear) and the category they indicate, most
/// specific first
const CATEGORY_KEYWORDS: &[(&[&str], &str)] = &[
    (&["riser"], "stairs.riser"),
    (&["tread"], "stairs.tread"),
    (&["headroom"], "stairs.headroom"),
    (&["sphere"], "railings.spacing"),
    (&["handrail", "height"], "railings.handrail_height"),
    (&["guard"], "railings.height"),
    (&["threshold"], "doors.threshold"),
    (&["direction of travel"], "stairs.landing_depth"),
    (&["landing"], "stairs.landing_depth"),
    (&["stair", "width"], "stairs.width"),
    (&["door", "width"], "doors.width"),
    (&["width"], "egress.width"),
];

fn collapse(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Split a section body into the rule text and its exception items
fn split_exceptions(text: &str) -> (&str, Vec<String>) {
    let Some(marker) = EXCEPTIONS_MARKER.find(text) else {
        return (text, Vec::new());
    };

    let body = &text[..marker.start()];
    let exception_text = &text[marker.end()..];
    let items = EXCEPTION_ITEM
        .split(exception_text)
        .map(collapse)
        .filter(|item| !item.is_empty())
        .collect();
    (body, items)
}

fn sentences(text: &str) -> Vec<String> {
    let cleaned = collapse(&PARENTHETICAL.replace_all(text, ""));
    SENTENCE_BREAK
        .split(&cleaned)
        .map(|s| s.trim().trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn measurement_inches(caps: &Captures) -> Option<f64> {
    if let (Some(feet), Some(inches)) = (caps.name("feet"), caps.name("inches")) {
        let feet = parse_quantity(feet.as_str())?;
        let inches = parse_quantity(inches.as_str())?;
        return Some(LengthUnit::Foot.to_inches(feet) + inches);
    }
    let quantity = parse_quantity(caps.name("qty")?.as_str())?;
    normalize(quantity, caps.name("unit")?.as_str()).map(|(value, _)| value)
}

/// Requirement implied by the text around a measurement
///
/// `before` runs from the previous measurement (or sentence start), `after`
/// to the next measurement; both lowercase.
fn qualify(before: &str, after: &str) -> Option<Requirement> {
    let before_trimmed = before.trim_end();
    if after.trim_start().starts_with("per ")
        || before_trimmed.ends_with("by more than")
        || before_trimmed.ends_with("by less than")
        || before_trimmed.ends_with("need not exceed")
    {
        return None;
    }

    // "passage of a sphere 4 inches in diameter" caps the opening size
    if before_trimmed.ends_with("sphere") && after.trim_start().starts_with("in diameter") {
        return Some(Requirement::Max);
    }

    if let Some(caps) = TRAILING_QUALIFIER.captures(after) {
        return match &caps[1] {
            "maximum" | "max" => Some(Requirement::Max),
            _ => Some(Requirement::Min),
        };
    }

    let last = |phrases: &[&str]| phrases.iter().filter_map(|p| before.rfind(p)).max();
    match (last(MIN_PHRASES), last(MAX_PHRASES)) {
        (Some(min), Some(max)) if min > max => Some(Requirement::Min),
        (Some(_), Some(_)) => Some(Requirement::Max),
        (Some(_), None) => Some(Requirement::Min),
        (None, Some(_)) => Some(Requirement::Max),
        (None, None) => None,
    }
}

fn classify(text: &str) -> Option<&'static str> {
    CATEGORY_KEYWORDS
        .iter()
        .find(|(keywords, _)| keywords.iter().all(|k| text.contains(k)))
        .map(|(_, category)| *category)
}

/// Regex-based extractor used when AI extraction is unavailable or fails
#[derive(Debug, Clone, Default)]
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract every qualified measurement of a section
    pub fn extract_rules(&self, section: &Section) -> Vec<ExtractedRule> {
        let (body, exceptions) = split_exceptions(&section.text);
        let title = section.title.as_deref().unwrap_or_default().to_ascii_lowercase();
        let mut rules: Vec<ExtractedRule> = Vec::new();

        for sentence in sentences(body) {
            let lower = sentence.to_ascii_lowercase();
            let found: Vec<Captures> = MEASUREMENT.captures_iter(&sentence).collect();
            let mut previous_end = 0;

            for (i, caps) in found.iter().enumerate() {
                let Some(whole) = caps.get(0) else { continue };
                let next_start = found
                    .get(i + 1)
                    .and_then(|next| next.get(0))
                    .map_or(lower.len(), |m| m.start());
                let after_end = floor_char_boundary(&lower, (whole.end() + AFTER_WINDOW).min(next_start));
                let before = &lower[previous_end..whole.start()];
                let after = &lower[whole.end()..after_end];
                previous_end = whole.end();

                let Some(value) = measurement_inches(caps) else { continue };
                let Some(requirement) = qualify(before, after) else { continue };
                let focus = format!("{} {}", before, after);
                let Some(category) = classify(&focus)
                    .or_else(|| classify(&lower))
                    .or_else(|| classify(&title))
                else {
                    tracing::debug!(section = %section.section_ref, %sentence, "Measurement without a category");
                    continue;
                };

                let duplicate = rules
                    .iter()
                    .any(|r| r.category == category && r.requirement == requirement && r.value == value);
                if duplicate {
                    continue;
                }

                let mut rule = ExtractedRule {
                    section_ref: section.section_ref.clone(),
                    code_family: section.code_family.clone(),
                    edition: section.edition.clone(),
                    category: category.to_string(),
                    title: section.title.clone(),
                    requirement,
                    value,
                    max_value: None,
                    unit: super::units::INCH.to_string(),
                    conditions: Vec::new(),
                    exceptions: exceptions.clone(),
                    notes: Some(sentence.clone()),
                    confidence: 0.0,
                    extraction_method: ExtractionMethod::Pattern,
                };
                rule.confidence = score_pattern_rule(&rule);
                rules.push(rule);
            }
        }

        rules
    }
}

#[async_trait]
impl Extractor for PatternExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Pattern
    }

    async fn extract(&self, section: &Section) -> Result<Vec<ExtractedRule>, ExtractionError> {
        Ok(self.extract_rules(section))
    }
}
