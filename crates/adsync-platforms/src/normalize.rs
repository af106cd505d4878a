//! Field access helpers for platform-native JSON rows.
//!
//! Platforms are loose about types: ids arrive as numbers or strings and
//! counters as numbers or numeric strings. These helpers turn a row into
//! typed values and report anything unusable as a [`ShapeError`].

use adsync_core::{MetricSet, ShapeError};
use chrono::NaiveDate;
use serde_json::{Map, Value};

/// A string field, accepting numeric ids. Empty strings and `null` are absent.
#[must_use]
pub fn opt_string(row: &Map<String, Value>, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// # Errors
///
/// Returns [`ShapeError`] when the field is absent.
pub fn require_string(row: &Map<String, Value>, field: &str) -> Result<String, ShapeError> {
    opt_string(row, field).ok_or_else(|| ShapeError::missing(field))
}

/// A `YYYY-MM-DD` date field. A trailing time component is ignored.
///
/// # Errors
///
/// Returns [`ShapeError`] when the field is absent or not a date.
pub fn require_date(row: &Map<String, Value>, field: &str) -> Result<NaiveDate, ShapeError> {
    let raw = require_string(row, field)?;
    let day = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| ShapeError::new(field, format!("\"{raw}\" is not a date: {e}")))
}

/// The row as an object.
///
/// # Errors
///
/// Returns [`ShapeError`] for any other JSON value.
pub fn as_object<'a>(row: &'a Value, what: &str) -> Result<&'a Map<String, Value>, ShapeError> {
    row.as_object()
        .ok_or_else(|| ShapeError::new(what, "expected a JSON object"))
}

/// Copy numeric `fields` of `row` into `metrics`. Absent and `null` fields
/// keep their declared zero.
///
/// # Errors
///
/// Returns [`ShapeError`] when a present field is not numeric.
pub fn copy_counters(
    row: &Map<String, Value>,
    fields: &[&str],
    metrics: &mut MetricSet,
) -> Result<(), ShapeError> {
    for field in fields {
        match row.get(*field) {
            None | Some(Value::Null) => {}
            Some(raw) => {
                if !metrics.set_raw(*field, raw) {
                    return Err(ShapeError::new(*field, format!("{raw} is not numeric")));
                }
            }
        }
    }
    Ok(())
}

/// Strings of a list field whose entries are either plain strings or
/// objects carrying the string under `inner`.
#[must_use]
pub fn string_list(value: Option<&Value>, inner: &str) -> Vec<String> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map.get(inner).and_then(Value::as_str).map(str::to_owned),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
