//! Value coercion rules shared by the loaders and the transform engine.
//!
//! Every conversion here is total: it either produces a value or reports failure through
//! `Option`/`Result`, and callers decide whether failure means `Null`, a warning, or a
//! strict [`crate::error::TransformError::TypeCoercion`].

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::types::{Category, DataType, Value};

/// Datetime layouts tried, in order, when no explicit format is configured.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Date-only layouts tried after [`DATETIME_FORMATS`]; they resolve to midnight.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d %B %Y", "%B %d, %Y"];

/// Parse a boolean, accepting `true/false/t/f/1/0/yes/no/y/n` (case-insensitive).
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Parse a trimmed integer.
pub fn parse_i64(s: &str) -> Option<i64> {
    s.trim().parse::<i64>().ok()
}

/// Parse a trimmed float. Empty input is not a number.
pub fn parse_f64(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok()
}

/// Parse a datetime.
///
/// With `format`, the text must match it exactly (date-only formats resolve to midnight).
/// Without, RFC 3339 is tried first (converted to UTC), then a fixed list of common layouts.
pub fn parse_datetime(s: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(fmt) = format {
        return NaiveDateTime::parse_from_str(s, fmt)
            .ok()
            .or_else(|| NaiveDate::parse_from_str(s, fmt).ok()?.and_hms_opt(0, 0, 0));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Convert a cell to a number.
///
/// Integers stay integers, integral text becomes `Int64`, other numeric text `Float64`,
/// booleans `0`/`1`, timestamps nanoseconds since the epoch. Returns `None` for `Null`,
/// NaN and anything unparsable.
pub fn to_numeric(v: &Value) -> Option<Value> {
    match v {
        Value::Null => None,
        Value::Int64(i) => Some(Value::Int64(*i)),
        Value::Float64(f) if f.is_nan() => None,
        Value::Float64(f) => Some(Value::Float64(*f)),
        Value::Bool(b) => Some(Value::Int64(i64::from(*b))),
        Value::Timestamp(ts) => ts.and_utc().timestamp_nanos_opt().map(Value::Int64),
        Value::Utf8(_) | Value::Categorical(_) => {
            let text = v.as_text()?;
            parse_i64(text)
                .map(Value::Int64)
                .or_else(|| parse_f64(text).filter(|f| !f.is_nan()).map(Value::Float64))
        }
    }
}

/// Convert a cell to `target`, or `None` if the conversion is not possible.
///
/// `Null` converts to `Null` for every target. Categorical targets need a category set and
/// are never produced here.
pub fn coerce_to(v: &Value, target: DataType) -> Option<Value> {
    if v.is_null() {
        return Some(Value::Null);
    }
    if v.data_type() == Some(target) {
        return Some(v.clone());
    }
    match target {
        DataType::Int64 => match to_numeric(v)? {
            Value::Int64(i) => Some(Value::Int64(i)),
            Value::Float64(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some(Value::Int64(f as i64)),
            _ => None,
        },
        DataType::Float64 => to_numeric(v)?.as_f64().map(Value::Float64),
        DataType::Bool => match v {
            Value::Int64(0) => Some(Value::Bool(false)),
            Value::Int64(1) => Some(Value::Bool(true)),
            _ => parse_bool(v.as_text()?).map(Value::Bool),
        },
        DataType::Utf8 => Some(Value::Utf8(v.to_string())),
        DataType::Timestamp => parse_datetime(v.as_text()?, None).map(Value::Timestamp),
        DataType::Categorical => None,
    }
}

/// Convert a literal into a cell that can be stored in a column of `target`.
///
/// Categorical columns accept a label only if it is a member of `categories` (the column's
/// category set). Returns `None` when the literal does not fit.
pub(crate) fn coerce_for_column(
    literal: &Value,
    target: DataType,
    categories: Option<&Arc<[String]>>,
) -> Option<Value> {
    if target != DataType::Categorical || literal.is_null() {
        return coerce_to(literal, target);
    }
    let label = literal.to_string();
    let categories = categories?;
    categories.contains(&label).then(|| {
        Value::Categorical(Category {
            label,
            categories: categories.clone(),
        })
    })
}

/// Convert a scalar JSON literal from a configuration object into a [`Value`].
///
/// When the target column is a timestamp column, string literals are parsed as datetimes so
/// they compare naturally. Arrays and objects are not scalars and yield `None`.
pub fn literal_from_json(json: &serde_json::Value, target: Option<DataType>) -> Option<Value> {
    let v = match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int64(i),
            None => Value::Float64(n.as_f64()?),
        },
        serde_json::Value::String(s) => {
            if target == Some(DataType::Timestamp) {
                if let Some(ts) = parse_datetime(s, None) {
                    return Some(Value::Timestamp(ts));
                }
            }
            Value::Utf8(s.clone())
        }
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => return None,
    };
    Some(v)
}

/// Parse raw text into a cell of `data_type`. Empty text is `Null`.
pub fn parse_cell(raw: &str, data_type: DataType) -> Result<Value, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    match data_type {
        DataType::Utf8 => Ok(Value::Utf8(trimmed.to_owned())),
        DataType::Int64 => trimmed
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|e| e.to_string()),
        DataType::Float64 => trimmed
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|e| e.to_string()),
        DataType::Bool => parse_bool(trimmed)
            .map(Value::Bool)
            .ok_or_else(|| "expected bool (true/false/1/0/yes/no)".to_string()),
        DataType::Timestamp => parse_datetime(trimmed, None)
            .map(Value::Timestamp)
            .ok_or_else(|| "expected a date or datetime".to_string()),
        DataType::Categorical => Err("categorical columns must be derived with a transform".to_string()),
    }
}

/// Infer the narrowest type that every non-empty raw value parses as.
///
/// Preference order: `Int64`, `Float64`, `Bool` (only literal `true`/`false`), `Timestamp`,
/// falling back to `Utf8`. A column with no non-empty values is `Utf8`.
pub fn infer_data_type<'a>(values: impl IntoIterator<Item = &'a str>) -> DataType {
    let (mut int, mut float, mut boolean, mut ts) = (true, true, true, true);
    let mut seen = false;
    for raw in values {
        let s = raw.trim();
        if s.is_empty() {
            continue;
        }
        seen = true;
        int = int && parse_i64(s).is_some();
        float = float && parse_f64(s).is_some();
        boolean = boolean && (s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false"));
        ts = ts && parse_datetime(s, None).is_some();
        if !(int || float || boolean || ts) {
            return DataType::Utf8;
        }
    }
    if !seen {
        DataType::Utf8
    } else if int {
        DataType::Int64
    } else if float {
        DataType::Float64
    } else if boolean {
        DataType::Bool
    } else if ts {
        DataType::Timestamp
    } else {
        DataType::Utf8
    }
}
