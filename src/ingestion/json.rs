//! JSON ingestion implementation.
//!
//! Supported inputs:
//! - A JSON array of objects: `[{"a":1}, {"a":2}]`
//! - A single object, which becomes one row: `{"a":1}`
//! - An object of equal-length arrays, one per column: `{"a":[1,2], "b":["x","y"]}`
//! - An array of scalars, which becomes a single `value` column: `[1, 2, 3]`
//! - Newline-delimited JSON (NDJSON): `{"a":1}\n{"a":2}\n`
//!
//! Nested objects are addressed with dot paths (e.g. `user.name`), both in explicit schemas
//! and in the column names produced by inference.

use std::fs;
use std::path::Path;

use crate::coercion::parse_datetime;
use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Name of the column produced from an array of scalars.
pub const SCALAR_COLUMN: &str = "value";

type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Ingest a JSON file using an explicit schema.
pub fn ingest_json_from_path(path: impl AsRef<Path>, schema: &Schema) -> IngestionResult<DataSet> {
    let text = fs::read_to_string(path)?;
    ingest_json_from_str(&text, schema)
}

/// Ingest JSON text using an explicit schema.
///
/// Every schema field must be present in every row (explicit `null` is allowed).
pub fn ingest_json_from_str(input: &str, schema: &Schema) -> IngestionResult<DataSet> {
    let records = parse_records(input)?;
    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(records.len());

    for (idx0, obj) in records.iter().enumerate() {
        let row_num = idx0 + 1;
        let mut row: Vec<Value> = Vec::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let jv = get_by_dot_path(obj, &field.name).ok_or_else(|| IngestionError::SchemaMismatch {
                message: format!("row {row_num} missing required field '{}'", field.name),
            })?;
            row.push(convert_json_value(row_num, &field.name, field.data_type, jv)?);
        }
        rows.push(row);
    }

    Ok(DataSet::new(schema.clone(), rows))
}

/// Ingest a JSON file, flattening nested objects and inferring column types.
pub fn infer_json_from_path(path: impl AsRef<Path>) -> IngestionResult<DataSet> {
    let text = fs::read_to_string(path)?;
    infer_json_from_str(&text)
}

/// Ingest JSON text, flattening nested objects and inferring column types.
///
/// Columns appear in first-seen order; a key missing from a row is null there. A column whose
/// values are all integers is `int64`, all numbers `float64`, all booleans `bool`; anything
/// else is `utf8`, with non-string values kept as their JSON text.
pub fn infer_json_from_str(input: &str) -> IngestionResult<DataSet> {
    let records = parse_records(input)?;

    let mut names: Vec<String> = Vec::new();
    let mut flat_rows: Vec<Vec<(String, serde_json::Value)>> = Vec::with_capacity(records.len());
    for obj in &records {
        let mut flat = Vec::new();
        flatten_into("", obj, &mut flat);
        for (name, _) in &flat {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        flat_rows.push(flat);
    }

    let mut columns: Vec<(Field, Vec<Value>)> = Vec::with_capacity(names.len());
    for name in names {
        let raw: Vec<Option<&serde_json::Value>> = flat_rows
            .iter()
            .map(|row| row.iter().find(|(k, _)| *k == name).map(|(_, v)| v))
            .collect();
        let data_type = infer_json_type(raw.iter().flatten().copied());
        let values = raw
            .into_iter()
            .map(|v| v.map_or(Value::Null, |v| json_to_inferred(data_type, v)))
            .collect();
        columns.push((Field::new(name, data_type), values));
    }

    let (fields, cells): (Vec<Field>, Vec<Vec<Value>>) = columns.into_iter().unzip();
    let rows = (0..records.len())
        .map(|i| cells.iter().map(|col| col[i].clone()).collect())
        .collect();
    Ok(DataSet::new(Schema::new(fields), rows))
}

/// Normalize any supported layout into a list of row objects.
fn parse_records(input: &str) -> IngestionResult<Vec<JsonMap>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(IngestionError::SchemaMismatch {
            message: "json input is empty".to_string(),
        });
    }

    // First try parsing as a single JSON value (array or object).
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return match v {
            serde_json::Value::Array(items) if items.iter().all(serde_json::Value::is_object) => {
                Ok(items.into_iter().filter_map(into_object).collect())
            }
            serde_json::Value::Array(items) => Ok(items
                .into_iter()
                .map(|item| {
                    let mut obj = JsonMap::new();
                    obj.insert(SCALAR_COLUMN.to_string(), item);
                    obj
                })
                .collect()),
            serde_json::Value::Object(map) if !map.is_empty() && map.values().all(serde_json::Value::is_array) => {
                transpose_columns(map)
            }
            serde_json::Value::Object(map) => Ok(vec![map]),
            _ => Err(IngestionError::SchemaMismatch {
                message: "json must be an object, an array, or NDJSON".to_string(),
            }),
        };
    }

    // Fall back to NDJSON.
    let mut records = Vec::new();
    for (i, line) in trimmed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let v = serde_json::from_str::<serde_json::Value>(line).map_err(|e| IngestionError::SchemaMismatch {
            message: format!("invalid ndjson at line {}: {}", i + 1, e),
        })?;
        let obj = into_object(v).ok_or_else(|| IngestionError::SchemaMismatch {
            message: format!("ndjson line {} is not a json object", i + 1),
        })?;
        records.push(obj);
    }
    Ok(records)
}

fn into_object(v: serde_json::Value) -> Option<JsonMap> {
    match v {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

fn transpose_columns(map: JsonMap) -> IngestionResult<Vec<JsonMap>> {
    let mut len: Option<usize> = None;
    let mut columns: Vec<(String, Vec<serde_json::Value>)> = Vec::with_capacity(map.len());
    for (name, values) in map {
        let serde_json::Value::Array(values) = values else {
            continue;
        };
        match len {
            Some(n) if n != values.len() => {
                return Err(IngestionError::SchemaMismatch {
                    message: format!(
                        "column '{name}' has {} values, expected {n} like the columns before it",
                        values.len()
                    ),
                });
            }
            _ => len = Some(values.len()),
        }
        columns.push((name, values));
    }

    let mut rows: Vec<JsonMap> = (0..len.unwrap_or(0)).map(|_| JsonMap::new()).collect();
    for (name, values) in columns {
        for (row, v) in rows.iter_mut().zip(values) {
            row.insert(name.clone(), v);
        }
    }
    Ok(rows)
}

fn flatten_into(prefix: &str, obj: &JsonMap, out: &mut Vec<(String, serde_json::Value)>) {
    for (key, v) in obj {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match v {
            serde_json::Value::Object(inner) if !inner.is_empty() => flatten_into(&name, inner, out),
            serde_json::Value::Object(_) => out.push((name, serde_json::Value::Null)),
            other => out.push((name, other.clone())),
        }
    }
}

fn infer_json_type<'a>(values: impl Iterator<Item = &'a serde_json::Value>) -> DataType {
    let (mut int, mut num, mut boolean) = (true, true, true);
    let mut seen = false;
    for v in values.filter(|v| !v.is_null()) {
        seen = true;
        int = int && (v.is_i64() || v.as_u64().is_some_and(|n| i64::try_from(n).is_ok()));
        num = num && v.is_number();
        boolean = boolean && v.is_boolean();
    }
    match (seen, int, num, boolean) {
        (false, ..) => DataType::Utf8,
        (true, true, _, _) => DataType::Int64,
        (true, _, true, _) => DataType::Float64,
        (true, _, _, true) => DataType::Bool,
        _ => DataType::Utf8,
    }
}

fn json_to_inferred(data_type: DataType, v: &serde_json::Value) -> Value {
    let converted = match (data_type, v) {
        (_, serde_json::Value::Null) => Some(Value::Null),
        (DataType::Int64, _) => v
            .as_i64()
            .or_else(|| v.as_u64().and_then(|n| i64::try_from(n).ok()))
            .map(Value::Int64),
        (DataType::Float64, _) => v.as_f64().map(Value::Float64),
        (DataType::Bool, _) => v.as_bool().map(Value::Bool),
        (_, serde_json::Value::String(s)) => Some(Value::Utf8(s.clone())),
        _ => None,
    };
    converted.unwrap_or_else(|| Value::Utf8(v.to_string()))
}

fn get_by_dot_path<'a>(root: &'a JsonMap, path: &str) -> Option<&'a serde_json::Value> {
    // A literal key wins over a nested lookup (keys may themselves contain dots).
    if let Some(v) = root.get(path) {
        return Some(v);
    }

    let mut segments = path.split('.');
    let mut current: &serde_json::Value = root.get(segments.next()?)?;
    for segment in segments {
        match current {
            serde_json::Value::Object(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

fn convert_json_value(
    row: usize,
    column: &str,
    data_type: DataType,
    v: &serde_json::Value,
) -> IngestionResult<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }

    let parse_error = |message: &str| IngestionError::ParseError {
        row,
        column: column.to_string(),
        raw: v.to_string(),
        message: message.to_string(),
    };

    match data_type {
        DataType::Utf8 => v
            .as_str()
            .map(|s| Value::Utf8(s.to_string()))
            .ok_or_else(|| parse_error("expected string")),
        DataType::Bool => v.as_bool().map(Value::Bool).ok_or_else(|| parse_error("expected bool")),
        DataType::Int64 => {
            if let Some(n) = v.as_i64() {
                Ok(Value::Int64(n))
            } else if let Some(n) = v.as_u64() {
                i64::try_from(n)
                    .map(Value::Int64)
                    .map_err(|_| parse_error("u64 out of range for i64"))
            } else {
                Err(parse_error("expected integer number"))
            }
        }
        DataType::Float64 => v.as_f64().map(Value::Float64).ok_or_else(|| parse_error("expected number")),
        DataType::Timestamp => v
            .as_str()
            .and_then(|s| parse_datetime(s, None))
            .map(Value::Timestamp)
            .ok_or_else(|| parse_error("expected a date or datetime string")),
        DataType::Categorical => Err(parse_error("categorical columns must be derived with a transform")),
    }
}
