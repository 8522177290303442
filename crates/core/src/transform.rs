//! Value transforms applied to external field values before they are written
//! to internal records.
//!
//! Transforms are pure and total: anything they cannot handle is returned
//! unchanged so a single odd cell never aborts a sync run.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;

/// A transform rule parsed from a field mapping's `transform_rule` JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformRule {
    /// Lookup table; values without an entry pass through.
    Map(HashMap<String, Value>),
    /// Parse a date in one of the accepted formats into RFC 3339 UTC.
    Date,
    /// Strip currency symbols and separators and parse as a number.
    Currency,
    Lowercase,
    Uppercase,
    /// Rule type this build does not understand. Treated as identity.
    Unknown(String),
}

impl TransformRule {
    /// Parse from `{"type": "...", ...}`. Returns `None` for JSON null or a
    /// value without a `type` string.
    pub fn from_json(value: &Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?;
        let rule = match kind {
            "map" => {
                let values = value
                    .get("values")
                    .and_then(Value::as_object)
                    .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
                TransformRule::Map(values)
            }
            "date" => TransformRule::Date,
            "currency" => TransformRule::Currency,
            "lowercase" => TransformRule::Lowercase,
            "uppercase" => TransformRule::Uppercase,
            other => TransformRule::Unknown(other.to_string()),
        };
        Some(rule)
    }
}

/// Render a JSON value the way values are compared and stored as text.
///
/// Strings are taken verbatim, null becomes the empty string, everything else
/// uses its JSON representation.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// True for null and for strings that are empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Apply `rule` to `value`.
pub fn transform_value(value: &Value, rule: Option<&TransformRule>) -> Value {
    let Some(rule) = rule else {
        return value.clone();
    };
    if is_empty_value(value) {
        return value.clone();
    }

    match rule {
        TransformRule::Map(table) => table
            .get(&value_to_string(value))
            .cloned()
            .unwrap_or_else(|| value.clone()),
        TransformRule::Date => parse_date(&value_to_string(value))
            .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
            .unwrap_or_else(|| value.clone()),
        TransformRule::Currency => parse_currency(&value_to_string(value))
            .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
            .unwrap_or_else(|| value.clone()),
        TransformRule::Lowercase => match value {
            Value::String(s) => Value::String(s.to_lowercase()),
            other => other.clone(),
        },
        TransformRule::Uppercase => match value {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other.clone(),
        },
        TransformRule::Unknown(_) => value.clone(),
    }
}

/// Whether a stored local value and a transformed remote value mean the same
/// thing.
///
/// Postgres renders `TIMESTAMPTZ`, `DATE` and `NUMERIC` columns as text in
/// its own formats (`2024-03-15 00:00:00+00`, `385000`), while transforms
/// emit RFC 3339 and JSON numbers (`2024-03-15T00:00:00.000Z`, `385000.0`).
/// Text equality is tried first, then instant equality, then numeric
/// equality.
pub fn same_value(local: &str, remote: &str) -> bool {
    let (local, remote) = (local.trim(), remote.trim());
    if local == remote {
        return true;
    }
    if let (Some(a), Some(b)) = (parse_stored_timestamp(local), parse_stored_timestamp(remote)) {
        return a == b;
    }
    match (parse_stored_number(local), parse_stored_number(remote)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Leading zeros mark identifiers such as phone numbers, not amounts.
fn parse_stored_number(raw: &str) -> Option<f64> {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.") {
        return None;
    }
    raw.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Dates as either side of a comparison may render them: transform output,
/// Postgres `TIMESTAMPTZ::TEXT` (with or without fractional seconds) and
/// `DATE::TEXT`.
fn parse_stored_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%#z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Zero is treated as unparseable so that "€0" style placeholders keep their
/// original text.
fn parse_currency(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    match cleaned.parse::<f64>() {
        Ok(n) if n != 0.0 && n.is_finite() => Some(n),
        _ => None,
    }
}
