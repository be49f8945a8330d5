//! AI-assisted extraction
//!
//! The model is asked for a JSON array of rules. Each candidate is validated
//! on its own; a bad candidate is dropped, a response without any array is
//! an error so the section falls back to pattern extraction.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::claude_client::CompletionProvider;
use super::scoring::score_ai_rule;
use super::units::{normalize, parse_quantity};
use super::Section;
use crate::agents::{ExtractionError, Extractor};
use crate::models::{ExtractedRule, ExtractionMethod, Requirement};

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    requirement: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    max_value: Option<Value>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    conditions: Vec<Value>,
    #[serde(default)]
    exceptions: Vec<Value>,
    #[serde(default)]
    notes: Option<String>,
}

pub fn build_prompt(section: &Section) -> String {
    format!(
        r#"You are an expert building code analyst. Extract measurable, machine-actionable rules from the building code section below.

Instructions:
1. Extract ONLY measurable requirements (dimensions, counts, ratios).
2. Report each value in the unit the text uses (inch, ft, mm, cm, m, percent, ...).
3. requirement is one of "min", "max", "exact", "range"; a range also sets "max_value".
4. List conditions and exceptions as short strings.
5. Extract only what is explicitly stated.
6. Respond with a JSON array and nothing else. Respond with [] when the section has no measurable requirement.

Example:
[
  {{
    "category": "stairs.tread",
    "title": "Tread depth",
    "requirement": "min",
    "value": 11,
    "unit": "inch",
    "conditions": ["occupancy R-2"],
    "exceptions": ["spiral stairways"],
    "notes": "Measured horizontally between vertical planes of adjacent nosings"
  }}
]

Categories to prefer: stairs.riser, stairs.tread, stairs.headroom, stairs.width, stairs.landing_depth,
railings.height, railings.spacing, doors.width, doors.threshold, egress.width.

Section: {section_ref}{title}
Code: {family} {edition}

Text:
{text}
"#,
        section_ref = section.section_ref,
        title = section.title.as_deref().map(|t| format!(" {}", t)).unwrap_or_default(),
        family = section.code_family,
        edition = section.edition,
        text = section.text,
    )
}

/// The outermost JSON array in a model response
fn json_array(response: &str) -> Result<&str, ExtractionError> {
    match (response.find('['), response.rfind(']')) {
        (Some(start), Some(end)) if start < end => Ok(&response[start..=end]),
        _ => Err(ExtractionError::Parse("response contains no JSON array".to_string())),
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => format!("{}: {}", k, s),
                    other => format!("{}: {}", k, other),
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_quantity(s),
        _ => None,
    };
    number.filter(|v| v.is_finite() && *v >= 0.0)
}

/// Validate, normalize and score one candidate
fn to_rule(candidate: Candidate, section: &Section) -> Result<ExtractedRule, String> {
    let category = candidate
        .category
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .ok_or("missing category")?;
    let requirement: Requirement = candidate
        .requirement
        .as_deref()
        .ok_or("missing requirement")?
        .parse()?;
    let raw_value = candidate
        .value
        .as_ref()
        .and_then(as_number)
        .ok_or("value is not a non-negative number")?;
    let raw_unit = candidate.unit.unwrap_or_default();
    let (value, unit) = normalize(raw_value, &raw_unit).ok_or("missing unit")?;

    let max_value = match requirement {
        Requirement::Range => {
            let raw_max = candidate
                .max_value
                .as_ref()
                .and_then(as_number)
                .ok_or("range without max_value")?;
            let (max_value, _) = normalize(raw_max, &raw_unit).ok_or("missing unit")?;
            if max_value < value {
                return Err("range max_value below value".to_string());
            }
            Some(max_value)
        }
        _ => None,
    };

    let mut rule = ExtractedRule {
        section_ref: section.section_ref.clone(),
        code_family: section.code_family.clone(),
        edition: section.edition.clone(),
        category,
        title: candidate.title.or_else(|| section.title.clone()),
        requirement,
        value,
        max_value,
        unit,
        conditions: candidate.conditions.iter().filter_map(as_text).collect(),
        exceptions: candidate.exceptions.iter().filter_map(as_text).collect(),
        notes: candidate.notes.filter(|n| !n.trim().is_empty()),
        confidence: 0.0,
        extraction_method: ExtractionMethod::Ai,
    };
    rule.confidence = score_ai_rule(&rule, raw_value, &section.text);
    Ok(rule)
}

/// Parse a model response into validated rules for `section`
pub fn parse_response(response: &str, section: &Section) -> Result<Vec<ExtractedRule>, ExtractionError> {
    let array = json_array(response)?;
    let candidates: Vec<Value> =
        serde_json::from_str(array).map_err(|e| ExtractionError::Parse(e.to_string()))?;

    let mut rules = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let parsed = serde_json::from_value::<Candidate>(candidate.clone())
            .map_err(|e| e.to_string())
            .and_then(|c| to_rule(c, section));
        match parsed {
            Ok(rule) => rules.push(rule),
            Err(reason) => {
                tracing::warn!(section = %section.section_ref, %reason, %candidate, "Dropping invalid AI rule");
            }
        }
    }
    Ok(rules)
}

/// LLM-backed extractor
pub struct AiExtractor {
    provider: Arc<dyn CompletionProvider>,
}

impl AiExtractor {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Extractor for AiExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Ai
    }

    fn is_available(&self) -> bool {
        self.provider.is_configured()
    }

    async fn extract(&self, section: &Section) -> Result<Vec<ExtractedRule>, ExtractionError> {
        let response = self.provider.complete(&build_prompt(section)).await?;
        let rules = parse_response(&response, section)?;
        tracing::debug!(section = %section.section_ref, rules = rules.len(), "AI extraction finished");
        Ok(rules)
    }
}
