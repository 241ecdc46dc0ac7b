//! Normalisation of free-text OSM tag values (`height`, `building:height`,
//! `building:levels`) into positive reals.
//!
//! Nothing here fails: anything that cannot be read as a positive number
//! becomes `None` and the height cascade falls through to its next rule.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const FEET_TO_M: f64 = 0.3048;

static SIGNED_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(\.\d+)?").expect("valid signed number pattern"));
static UNSIGNED_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(\.\d+)?").expect("valid unsigned number pattern"));

/// Parse a height tag into meters.
///
/// Numbers are taken as meters. Strings yield their first signed decimal,
/// converted from feet when the text mentions `ft`, `feet` or a prime mark.
pub fn parse_height_to_m(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => positive(n.as_f64()?),
        Value::String(s) => parse_height_str(s),
        _ => None,
    }
}

pub fn parse_height_str(raw: &str) -> Option<f64> {
    let s = normalise(raw)?;
    let num = first_number(&SIGNED_NUMBER, &s)?;
    if s.contains("ft") || s.contains("feet") || s.contains('\'') {
        Some(num * FEET_TO_M)
    } else {
        Some(num)
    }
}

/// Parse a `building:levels` tag. No unit handling.
pub fn parse_levels(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => positive(n.as_f64()?),
        Value::String(s) => parse_levels_str(s),
        _ => None,
    }
}

pub fn parse_levels_str(raw: &str) -> Option<f64> {
    let s = normalise(raw)?;
    first_number(&UNSIGNED_NUMBER, &s)
}

/// Two-way priority merge: `preferred` when present, else `fallback`.
pub fn coalesce(preferred: Option<f64>, fallback: Option<f64>) -> Option<f64> {
    preferred.or(fallback)
}

fn positive(v: f64) -> Option<f64> {
    (v.is_finite() && v > 0.0).then_some(v)
}

// Lower-cased, trimmed text, or None for the usual null spellings.
fn normalise(raw: &str) -> Option<String> {
    let s = raw.trim().to_lowercase();
    match s.as_str() {
        "" | "nan" | "none" | "null" => None,
        _ => Some(s),
    }
}

fn first_number(pattern: &Regex, s: &str) -> Option<f64> {
    let m = pattern.find(s)?;
    let num: f64 = m.as_str().parse().ok()?;
    positive(num)
}
