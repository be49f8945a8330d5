//! Measurement parsing and unit normalization
//!
//! Length categories are stored in inches whatever unit the code text or
//! the model used.

/// Canonical unit for length categories
pub const INCH: &str = "inch";

/// Length units recognized in code text and model output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Inch,
    Foot,
    Millimeter,
    Centimeter,
    Meter,
}

impl LengthUnit {
    pub fn parse(unit: &str) -> Option<Self> {
        let unit = unit.trim().trim_end_matches('.').to_ascii_lowercase();
        match unit.as_str() {
            "in" | "inch" | "inches" | "\"" => Some(LengthUnit::Inch),
            "ft" | "foot" | "feet" | "'" => Some(LengthUnit::Foot),
            "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => Some(LengthUnit::Millimeter),
            "cm" | "centimeter" | "centimeters" | "centimetre" | "centimetres" => Some(LengthUnit::Centimeter),
            "m" | "meter" | "meters" | "metre" | "metres" => Some(LengthUnit::Meter),
            _ => None,
        }
    }

    pub fn to_inches(self, value: f64) -> f64 {
        match self {
            LengthUnit::Inch => value,
            LengthUnit::Foot => value * 12.0,
            LengthUnit::Millimeter => value / 25.4,
            LengthUnit::Centimeter => value / 2.54,
            LengthUnit::Meter => value / 0.0254,
        }
    }
}

/// Units the scorers treat as standard
pub fn is_standard_unit(unit: &str) -> bool {
    LengthUnit::parse(unit).is_some()
        || matches!(
            unit.trim().to_ascii_lowercase().as_str(),
            "percent" | "%" | "psf" | "psi" | "lb" | "lbs" | "sq ft" | "count" | "degrees"
        )
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Normalize a value/unit pair
///
/// Lengths become inches rounded to three decimals; any other unit is kept
/// (trimmed, lowercased). Returns `None` for an empty unit.
pub fn normalize(value: f64, unit: &str) -> Option<(f64, String)> {
    let trimmed = unit.trim();
    if trimmed.is_empty() {
        return None;
    }
    match LengthUnit::parse(trimmed) {
        Some(length) => Some((round3(length.to_inches(value)), INCH.to_string())),
        None => Some((value, trimmed.to_ascii_lowercase())),
    }
}

/// Parse a quantity as written in code text
///
/// Accepts integers, decimals, simple fractions (`3/8`) and mixed numbers
/// (`7 3/4`, `7-3/4`).
pub fn parse_quantity(text: &str) -> Option<f64> {
    let text = text.trim();
    let (whole, fraction) = match text.split_once(|c: char| c == ' ' || c == '-') {
        Some((whole, fraction)) if fraction.contains('/') => (Some(whole.trim()), fraction.trim()),
        _ if text.contains('/') => (None, text),
        _ => return text.parse::<f64>().ok().filter(|v| v.is_finite()),
    };

    let (numerator, denominator) = fraction.split_once('/')?;
    let numerator: f64 = numerator.trim().parse().ok()?;
    let denominator: f64 = denominator.trim().parse().ok()?;
    if denominator == 0.0 {
        return None;
    }

    let whole = match whole {
        Some(whole) => whole.parse::<f64>().ok()?,
        None => 0.0,
    };
    Some(whole + numerator / denominator)
}

/// Spellings of `value` as it might appear in code text
///
/// `7.75` is looked for as `7.75` and `7 3/4`.
pub fn written_forms(value: f64) -> Vec<String> {
    let mut forms = Vec::new();
    if value.fract() == 0.0 {
        forms.push(format!("{}", value as i64));
        return forms;
    }

    forms.push(format!("{}", value));
    let whole = value.trunc() as i64;
    let fract = value.fract();
    for denominator in [2_i64, 4, 8, 16] {
        let numerator = fract * denominator as f64;
        if (numerator - numerator.round()).abs() < 1e-9 {
            let numerator = numerator.round() as i64;
            if whole == 0 {
                forms.push(format!("{}/{}", numerator, denominator));
            } else {
                forms.push(format!("{} {}/{}", whole, numerator, denominator));
            }
            break;
        }
    }
    forms
}
