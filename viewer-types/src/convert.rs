//! Total conversions from raw sandbox payloads.
//!
//! The sandbox hands back whatever its script produced: nested objects,
//! arrays, numbers that arrive as strings, fields that are missing or null.
//! Every converter here is total. Scalar converters fall back to a default
//! (`0`, empty text, `false`, `None`) instead of failing. Timestamp and
//! enumeration converters are the exception: malformed non-null text is
//! reported as a [`ConversionError`] so the caller of that one conversion can
//! decide what to do with it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Untyped payload as produced by the sandbox (null | scalar | list | map).
pub type RawValue = serde_json::Value;

/// String-keyed object payload.
pub type RawMap = serde_json::Map<String, RawValue>;

static NULL: RawValue = RawValue::Null;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unknown {kind} label: {label:?}")]
    UnknownLabel { kind: &'static str, label: String },
}

// ============================================================================
// Field Lookup
// ============================================================================

/// Fetch `key` from an object payload. Absent keys and non-object payloads
/// yield `Null`, which every scalar converter maps to its default.
pub fn field<'a>(details: &'a RawValue, key: &str) -> &'a RawValue {
    details.get(key).unwrap_or(&NULL)
}

/// Fetch `key` as an object, or an empty map.
pub fn map_field(details: &RawValue, key: &str) -> RawMap {
    to_map(field(details, key))
}

/// Fetch `key` as a list, or an empty slice.
pub fn list_field<'a>(details: &'a RawValue, key: &str) -> &'a [RawValue] {
    to_list(field(details, key))
}

pub fn to_map(value: &RawValue) -> RawMap {
    value.as_object().cloned().unwrap_or_default()
}

pub fn to_list(value: &RawValue) -> &[RawValue] {
    value.as_array().map(Vec::as_slice).unwrap_or(&[])
}

// ============================================================================
// Scalars
// ============================================================================

/// Text form used by the numeric parsers; `None` for null.
fn text_form(value: &RawValue) -> Option<String> {
    match value {
        RawValue::Null => None,
        RawValue::String(text) => Some(text.trim().to_string()),
        other => Some(other.to_string()),
    }
}

pub fn to_number(value: &RawValue) -> f64 {
    text_form(value)
        .and_then(|text| text.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Like [`to_number`] but `None` when the value is missing, unparsable or NaN.
pub fn to_null_number(value: &RawValue) -> Option<f64> {
    text_form(value)
        .and_then(|text| text.parse::<f64>().ok())
        .filter(|number| !number.is_nan())
}

pub fn to_integer(value: &RawValue) -> i64 {
    to_null_integer(value).unwrap_or(0)
}

pub fn to_null_integer(value: &RawValue) -> Option<i64> {
    text_form(value).and_then(|text| text.parse::<i64>().ok())
}

pub fn number_at(list: &[RawValue], index: usize) -> f64 {
    list.get(index).map(to_number).unwrap_or(0.0)
}

pub fn integer_at(list: &[RawValue], index: usize) -> i64 {
    list.get(index).map(to_integer).unwrap_or(0)
}

pub fn to_text(value: &RawValue) -> String {
    match value {
        RawValue::Null => String::new(),
        RawValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn to_bool(value: &RawValue) -> bool {
    match value {
        RawValue::Bool(flag) => *flag,
        RawValue::String(text) => text.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

// ============================================================================
// Timestamps
// ============================================================================

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|parsed| parsed.and_utc())
}

/// Parse a timestamp; null and malformed text are both errors.
pub fn to_timestamp(value: &RawValue) -> Result<DateTime<Utc>, ConversionError> {
    let text = text_form(value).ok_or_else(|| ConversionError::InvalidTimestamp("null".into()))?;
    parse_timestamp(&text).ok_or(ConversionError::InvalidTimestamp(text))
}

/// Parse a timestamp; null is `Ok(None)`, malformed text is an error.
pub fn to_null_timestamp(value: &RawValue) -> Result<Option<DateTime<Utc>>, ConversionError> {
    if value.is_null() {
        return Ok(None);
    }
    to_timestamp(value).map(Some)
}

// ============================================================================
// Enumerations
// ============================================================================

/// Enumerations that can be read from a sandbox label.
pub trait RawLabel: Sized {
    /// Name used in conversion errors.
    const KIND: &'static str;

    fn from_label(label: &str) -> Option<Self>;

    /// Member used for unrecognised labels, if the enumeration has one.
    fn fallback() -> Option<Self> {
        None
    }
}

pub fn to_enum<T: RawLabel>(value: &RawValue) -> Result<T, ConversionError> {
    let label = to_text(value);
    T::from_label(&label)
        .or_else(T::fallback)
        .ok_or(ConversionError::UnknownLabel {
            kind: T::KIND,
            label,
        })
}
