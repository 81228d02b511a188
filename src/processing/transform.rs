//! Per-column transforms: type conversion, value replacement, categories, binning, string and
//! math operations.
//!
//! A batch maps column names to [`ColumnTransformSpec`]s (`{"type": ..., "params": {...}}`).
//! The whole batch is resolved before any cell is touched: malformed parameters abort with a
//! configuration error. A missing column, an unknown transform type or a column of the wrong
//! type only skips that column.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::coercion::{coerce_for_column, literal_from_json, parse_datetime, to_numeric};
use crate::error::{TransformError, TransformResult, TransformWarning};
use crate::types::{Category, DataSet, DataType, Field, Value};

use super::reduce::settle_column;
use super::Processed;

const OP: &str = "transform";

fn empty_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// One column transform as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTransformSpec {
    /// Transform type (`numeric`, `datetimeFormat`, `replace`, `categorical`, `bin`, `string`,
    /// `math`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific parameters.
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
}

impl ColumnTransformSpec {
    /// Create a transform spec.
    pub fn new(kind: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }
}

/// What to do with values that fail a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Failed values become null.
    #[default]
    Coerce,
    /// Any failure leaves the column unchanged.
    Ignore,
    /// Any failure is a [`TransformError::TypeCoercion`].
    Raise,
}

/// String operation.
#[derive(Debug, Clone)]
pub enum StringOp {
    /// Lowercase.
    Lower,
    /// Uppercase.
    Upper,
    /// Trim surrounding whitespace.
    Strip,
    /// First capture group (or whole match) of a pattern; null when it does not match.
    Extract(Regex),
}

/// Math operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    /// `x + value`.
    Add,
    /// `x - value`.
    Subtract,
    /// `x * value`.
    Multiply,
    /// `x / value`.
    Divide,
    /// Natural logarithm.
    Log,
    /// `e^x`.
    Exp,
    /// Round to `decimals` places.
    Round,
}

/// Resolved column transform.
#[derive(Debug, Clone)]
pub enum TransformKind {
    /// Convert to `Int64`/`Float64`.
    Numeric { errors: ErrorMode },
    /// Parse into `Timestamp`, with an explicit format or by inference.
    DatetimeFormat {
        format: Option<String>,
        errors: ErrorMode,
    },
    /// Exact-value substitution, `(old, new)` pairs.
    Replace {
        pairs: Vec<(serde_json::Value, serde_json::Value)>,
    },
    /// Restrict to a label set (observed values when `None`).
    Categorical { categories: Option<Vec<String>> },
    /// Partition into ranges `[e0, e1) … [e(n-1), e(n)]`.
    Bin {
        edges: Vec<f64>,
        labels: Vec<String>,
    },
    /// String operation on text and categorical columns.
    String(StringOp),
    /// Arithmetic on numeric columns.
    Math {
        op: MathOp,
        operand: Option<serde_json::Number>,
        decimals: i32,
    },
}

#[derive(Deserialize)]
struct ConvertParams {
    #[serde(default)]
    errors: ErrorMode,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Deserialize)]
struct ReplaceParams {
    to_replace: Option<serde_json::Value>,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Deserialize)]
struct CategoricalParams {
    #[serde(default)]
    categories: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct BinParams {
    bins: Vec<f64>,
    #[serde(default)]
    labels: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct StringParams {
    operation: String,
    #[serde(default)]
    pattern: Option<String>,
}

#[derive(Deserialize)]
struct MathParams {
    operation: String,
    #[serde(default)]
    value: Option<serde_json::Number>,
    #[serde(default)]
    decimals: i32,
}

fn parse_params<T: DeserializeOwned>(
    column: &str,
    kind: &str,
    raw: &serde_json::Value,
) -> TransformResult<T> {
    let raw = if raw.is_null() { empty_params() } else { raw.clone() };
    serde_json::from_value(raw).map_err(|e| {
        TransformError::config(OP, format!("invalid {kind} parameters for column '{column}': {e}"))
    })
}

fn literal_text(json: &serde_json::Value) -> String {
    match json {
        serde_json::Value::String(s) => s.clone(),
        other => literal_from_json(other, None)
            .map(|v| v.to_string())
            .unwrap_or_else(|| other.to_string()),
    }
}

fn format_edge(e: f64) -> String {
    let text = Value::Float64(e).to_string();
    text.strip_suffix(".0").map(str::to_string).unwrap_or(text)
}

impl TransformKind {
    /// Resolve a spec. `Ok(None)` means the transform type is unknown.
    pub fn resolve(column: &str, spec: &ColumnTransformSpec) -> TransformResult<Option<Self>> {
        let name = spec.kind.trim().to_ascii_lowercase();
        let kind = match name.as_str() {
            "numeric" => {
                let p: ConvertParams = parse_params(column, &name, &spec.params)?;
                Self::Numeric { errors: p.errors }
            }
            "datetimeformat" | "datetime_format" | "datetime" => {
                let p: ConvertParams = parse_params(column, &name, &spec.params)?;
                Self::DatetimeFormat {
                    format: p.format,
                    errors: p.errors,
                }
            }
            "replace" => {
                let p: ReplaceParams = parse_params(column, &name, &spec.params)?;
                let pairs = match (p.to_replace, p.value) {
                    (None, _) => {
                        return Err(TransformError::config(
                            OP,
                            format!("replace on column '{column}' requires 'to_replace'"),
                        ));
                    }
                    (Some(serde_json::Value::Object(map)), _) => map
                        .into_iter()
                        .map(|(k, v)| (serde_json::Value::String(k), v))
                        .collect(),
                    (Some(serde_json::Value::Array(olds)), serde_json::Value::Array(news)) => {
                        if olds.len() != news.len() {
                            return Err(TransformError::config(
                                OP,
                                format!(
                                    "replace on column '{column}' has {} values to replace but {} replacements",
                                    olds.len(),
                                    news.len()
                                ),
                            ));
                        }
                        olds.into_iter().zip(news).collect()
                    }
                    (Some(serde_json::Value::Array(olds)), value) => {
                        olds.into_iter().map(|o| (o, value.clone())).collect()
                    }
                    (Some(old), value) => vec![(old, value)],
                };
                let nested = |v: &serde_json::Value| {
                    matches!(v, serde_json::Value::Array(_) | serde_json::Value::Object(_))
                };
                if let Some((old, new)) = pairs.iter().find(|(old, new)| nested(old) || nested(new)) {
                    let bad = if nested(old) { old } else { new };
                    return Err(TransformError::config(
                        OP,
                        format!("replace on column '{column}' expects scalar values, got {bad}"),
                    ));
                }
                Self::Replace { pairs }
            }
            "categorical" => {
                let p: CategoricalParams = parse_params(column, &name, &spec.params)?;
                let categories = p.categories.map(|cats| {
                    let mut seen = HashSet::new();
                    cats.iter()
                        .map(literal_text)
                        .filter(|c| seen.insert(c.clone()))
                        .collect::<Vec<_>>()
                });
                Self::Categorical {
                    categories: categories.filter(|c| !c.is_empty()),
                }
            }
            "bin" => {
                let p: BinParams = parse_params(column, &name, &spec.params)?;
                let edges = p.bins;
                if edges.len() < 2
                    || edges.iter().any(|e| !e.is_finite())
                    || edges.windows(2).any(|w| w[0] >= w[1])
                {
                    return Err(TransformError::config(
                        OP,
                        format!(
                            "bin edges for column '{column}' must be at least two strictly ascending numbers"
                        ),
                    ));
                }
                let n = edges.len() - 1;
                let labels = match p.labels {
                    Some(labels) if labels.len() != n => {
                        return Err(TransformError::config(
                            OP,
                            format!(
                                "column '{column}' has {n} bins but {} labels",
                                labels.len()
                            ),
                        ));
                    }
                    Some(labels) => labels,
                    None => edges
                        .windows(2)
                        .enumerate()
                        .map(|(i, w)| {
                            let close = if i + 1 == n { ']' } else { ')' };
                            format!("[{}, {}{close}", format_edge(w[0]), format_edge(w[1]))
                        })
                        .collect(),
                };
                let mut seen = HashSet::new();
                if !labels.iter().all(|l| seen.insert(l)) {
                    return Err(TransformError::config(
                        OP,
                        format!("bin labels for column '{column}' must be distinct"),
                    ));
                }
                Self::Bin { edges, labels }
            }
            "string" => {
                let p: StringParams = parse_params(column, &name, &spec.params)?;
                let op = match p.operation.to_ascii_lowercase().as_str() {
                    "lower" => StringOp::Lower,
                    "upper" => StringOp::Upper,
                    "strip" => StringOp::Strip,
                    "extract" => {
                        let pattern = p.pattern.ok_or_else(|| {
                            TransformError::config(
                                OP,
                                format!("extract on column '{column}' requires a pattern"),
                            )
                        })?;
                        let re = Regex::new(&pattern).map_err(|e| {
                            TransformError::config(OP, format!("invalid pattern for column '{column}': {e}"))
                        })?;
                        StringOp::Extract(re)
                    }
                    other => {
                        return Err(TransformError::config(
                            OP,
                            format!("unsupported string operation '{other}' (expected lower|upper|strip|extract)"),
                        ));
                    }
                };
                Self::String(op)
            }
            "math" => {
                let p: MathParams = parse_params(column, &name, &spec.params)?;
                let op = match p.operation.to_ascii_lowercase().as_str() {
                    "add" => MathOp::Add,
                    "subtract" => MathOp::Subtract,
                    "multiply" => MathOp::Multiply,
                    "divide" => MathOp::Divide,
                    "log" => MathOp::Log,
                    "exp" => MathOp::Exp,
                    "round" => MathOp::Round,
                    other => {
                        return Err(TransformError::config(
                            OP,
                            format!(
                                "unsupported math operation '{other}' (expected add|subtract|multiply|divide|log|exp|round)"
                            ),
                        ));
                    }
                };
                let needs_operand = matches!(
                    op,
                    MathOp::Add | MathOp::Subtract | MathOp::Multiply | MathOp::Divide
                );
                if needs_operand && p.value.is_none() {
                    return Err(TransformError::config(
                        OP,
                        format!("math operation on column '{column}' requires a numeric 'value'"),
                    ));
                }
                Self::Math {
                    op,
                    operand: p.value,
                    decimals: p.decimals,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(kind))
    }

    /// Short name used in logs and warnings.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Numeric { .. } => "numeric",
            Self::DatetimeFormat { .. } => "datetimeFormat",
            Self::Replace { .. } => "replace",
            Self::Categorical { .. } => "categorical",
            Self::Bin { .. } => "bin",
            Self::String(_) => "string",
            Self::Math { .. } => "math",
        }
    }
}

/// Outcome of one column transform.
enum Outcome {
    Replaced(Field, Vec<Value>),
    Unchanged,
    Skipped(String),
}

fn coercion_error(field: &Field, row: usize, raw: &Value, target: &str) -> TransformError {
    TransformError::TypeCoercion {
        column: field.name.clone(),
        row,
        raw: raw.to_string(),
        target: target.to_string(),
    }
}

/// Convert each cell with `convert`, honoring `errors`. Nulls stay null.
fn convert_cells(
    dataset: &DataSet,
    idx: usize,
    errors: ErrorMode,
    target: &str,
    convert: impl Fn(&Value) -> Option<Value>,
) -> TransformResult<Option<Vec<Value>>> {
    let field = &dataset.schema.fields[idx];
    let mut out = Vec::with_capacity(dataset.row_count());
    for (row, cell) in dataset.column_values(idx).enumerate() {
        if cell.is_null() {
            out.push(Value::Null);
            continue;
        }
        match convert(cell) {
            Some(v) => out.push(v),
            None => match errors {
                ErrorMode::Coerce => out.push(Value::Null),
                ErrorMode::Ignore => return Ok(None),
                ErrorMode::Raise => return Err(coercion_error(field, row, cell, target)),
            },
        }
    }
    Ok(Some(out))
}

fn apply_numeric(dataset: &DataSet, idx: usize, errors: ErrorMode) -> TransformResult<Outcome> {
    let Some(mut values) = convert_cells(dataset, idx, errors, "numeric", to_numeric)? else {
        return Ok(Outcome::Unchanged);
    };
    let data_type = settle_column(&mut values, DataType::Float64);
    Ok(Outcome::Replaced(Field::new(dataset.schema.fields[idx].name.clone(), data_type), values))
}

fn apply_datetime(
    dataset: &DataSet,
    idx: usize,
    format: Option<&str>,
    errors: ErrorMode,
) -> TransformResult<Outcome> {
    let convert = |v: &Value| match v {
        Value::Timestamp(ts) => Some(Value::Timestamp(*ts)),
        other => parse_datetime(other.as_text()?, format).map(Value::Timestamp),
    };
    let Some(values) = convert_cells(dataset, idx, errors, "timestamp", convert)? else {
        return Ok(Outcome::Unchanged);
    };
    let field = Field::new(dataset.schema.fields[idx].name.clone(), DataType::Timestamp);
    Ok(Outcome::Replaced(field, values))
}

fn apply_replace(dataset: &DataSet, idx: usize, pairs: &[(serde_json::Value, serde_json::Value)]) -> Outcome {
    let field = &dataset.schema.fields[idx];
    let categories = dataset.categories(idx);

    let mapping: Vec<(Value, Value)> = pairs
        .iter()
        .filter_map(|(old, new)| {
            let lit = literal_from_json(old, Some(field.data_type))?;
            let old = coerce_for_column(&lit, field.data_type, categories).unwrap_or(lit);
            Some((old, literal_from_json(new, Some(field.data_type))?))
        })
        .collect();
    let (olds, news): (Vec<Value>, Vec<Value>) = mapping.into_iter().unzip();

    // Replacements that fit the column keep its type; otherwise the column becomes text.
    let fitted: Option<Vec<Value>> = news
        .iter()
        .map(|v| coerce_for_column(v, field.data_type, categories))
        .collect();
    let (data_type, news) = match fitted {
        Some(news) => (field.data_type, news),
        None => (
            DataType::Utf8,
            news.iter()
                .map(|v| if v.is_null() { Value::Null } else { Value::Utf8(v.to_string()) })
                .collect(),
        ),
    };

    let mut replaced = 0usize;
    let values: Vec<Value> = dataset
        .column_values(idx)
        .map(|cell| {
            let hit = olds
                .iter()
                .position(|old| if old.is_null() { cell.is_null() } else { cell.equals(old) });
            match hit {
                Some(p) => {
                    replaced += 1;
                    news[p].clone()
                }
                None if data_type == field.data_type || cell.is_null() => cell.clone(),
                None => Value::Utf8(cell.to_string()),
            }
        })
        .collect();
    tracing::debug!(column = %field.name, replaced, "replaced values");
    Outcome::Replaced(Field::new(field.name.clone(), data_type), values)
}

fn apply_categorical(dataset: &DataSet, idx: usize, categories: Option<&[String]>) -> Outcome {
    let categories: Arc<[String]> = match categories {
        Some(cats) => cats.into(),
        None => {
            let mut observed: Vec<&Value> = dataset.column_values(idx).filter(|v| !v.is_null()).collect();
            observed.sort_by(|a, b| a.sort_cmp(b));
            let mut seen = HashSet::new();
            observed
                .into_iter()
                .map(|v| v.to_string())
                .filter(|s| seen.insert(s.clone()))
                .collect::<Vec<_>>()
                .into()
        }
    };
    let values = dataset
        .column_values(idx)
        .map(|cell| {
            if cell.is_null() {
                return Value::Null;
            }
            let label = cell.to_string();
            if categories.contains(&label) {
                Value::Categorical(Category {
                    label,
                    categories: categories.clone(),
                })
            } else {
                Value::Null
            }
        })
        .collect();
    let field = Field::new(dataset.schema.fields[idx].name.clone(), DataType::Categorical);
    Outcome::Replaced(field, values)
}

fn apply_bin(dataset: &DataSet, idx: usize, edges: &[f64], labels: &[String]) -> Outcome {
    let field = &dataset.schema.fields[idx];
    if !field.data_type.is_numeric() {
        return Outcome::Skipped(format!("bin needs a numeric column, found {}", field.data_type));
    }
    let categories: Arc<[String]> = labels.into();
    let last = edges.len() - 1;
    let values = dataset
        .column_values(idx)
        .map(|cell| {
            let Some(x) = cell.as_f64().filter(|x| !x.is_nan()) else {
                return Value::Null;
            };
            if x < edges[0] || x > edges[last] {
                return Value::Null;
            }
            // Index of the first edge strictly greater than x, minus one; x == last edge
            // belongs to the final bin.
            let bin = edges.partition_point(|e| *e <= x).saturating_sub(1).min(last - 1);
            Value::Categorical(Category {
                label: labels[bin].clone(),
                categories: categories.clone(),
            })
        })
        .collect();
    Outcome::Replaced(Field::new(field.name.clone(), DataType::Categorical), values)
}

fn apply_string(dataset: &DataSet, idx: usize, op: &StringOp) -> Outcome {
    let field = &dataset.schema.fields[idx];
    if !field.data_type.is_textual() {
        return Outcome::Skipped(format!("string operation needs a text column, found {}", field.data_type));
    }
    let values = dataset
        .column_values(idx)
        .map(|cell| {
            let Some(text) = cell.as_text() else {
                return Value::Null;
            };
            match op {
                StringOp::Lower => Value::Utf8(text.to_lowercase()),
                StringOp::Upper => Value::Utf8(text.to_uppercase()),
                StringOp::Strip => Value::Utf8(text.trim().to_string()),
                StringOp::Extract(re) => match re.captures(text) {
                    Some(caps) => caps
                        .get(1)
                        .or_else(|| caps.get(0))
                        .map(|m| Value::Utf8(m.as_str().to_string()))
                        .unwrap_or(Value::Null),
                    None => Value::Null,
                },
            }
        })
        .collect();
    Outcome::Replaced(Field::new(field.name.clone(), DataType::Utf8), values)
}

fn float_cell(x: f64) -> Value {
    if x.is_nan() { Value::Null } else { Value::Float64(x) }
}

fn apply_math(
    dataset: &DataSet,
    idx: usize,
    op: MathOp,
    operand: Option<&serde_json::Number>,
    decimals: i32,
) -> Outcome {
    let field = &dataset.schema.fields[idx];
    if !field.data_type.is_numeric() {
        return Outcome::Skipped(format!("math operation needs a numeric column, found {}", field.data_type));
    }
    let int_operand = operand.and_then(serde_json::Number::as_i64);
    let float_operand = operand.and_then(serde_json::Number::as_f64).unwrap_or(0.0);
    let scale = 10f64.powi(decimals);

    let mut values: Vec<Value> = dataset
        .column_values(idx)
        .map(|cell| match (cell, op, int_operand) {
            (Value::Null, _, _) => Value::Null,
            // Integer arithmetic falls back to float on overflow.
            (Value::Int64(x), MathOp::Add, Some(v)) => x
                .checked_add(v)
                .map_or(Value::Float64(*x as f64 + v as f64), Value::Int64),
            (Value::Int64(x), MathOp::Subtract, Some(v)) => x
                .checked_sub(v)
                .map_or(Value::Float64(*x as f64 - v as f64), Value::Int64),
            (Value::Int64(x), MathOp::Multiply, Some(v)) => x
                .checked_mul(v)
                .map_or(Value::Float64(*x as f64 * v as f64), Value::Int64),
            (Value::Int64(x), MathOp::Round, _) => Value::Int64(*x),
            _ => {
                let Some(x) = cell.as_f64() else {
                    return Value::Null;
                };
                float_cell(match op {
                    MathOp::Add => x + float_operand,
                    MathOp::Subtract => x - float_operand,
                    MathOp::Multiply => x * float_operand,
                    MathOp::Divide => x / float_operand,
                    MathOp::Log => x.ln(),
                    MathOp::Exp => x.exp(),
                    MathOp::Round if decimals >= 0 => (x * scale).round() / scale,
                    MathOp::Round => (x / 10f64.powi(-decimals)).round() * 10f64.powi(-decimals),
                })
            }
        })
        .collect();

    let keeps_ints = field.data_type == DataType::Int64
        && (op == MathOp::Round
            || (int_operand.is_some() && matches!(op, MathOp::Add | MathOp::Subtract | MathOp::Multiply)));
    let fallback = if keeps_ints { DataType::Int64 } else { DataType::Float64 };
    let mut data_type = settle_column(&mut values, fallback);
    if data_type == DataType::Int64 && !keeps_ints {
        for v in values.iter_mut() {
            if let Value::Int64(i) = v {
                *v = Value::Float64(*i as f64);
            }
        }
        data_type = DataType::Float64;
    }
    Outcome::Replaced(Field::new(field.name.clone(), data_type), values)
}

fn apply_one(dataset: &DataSet, idx: usize, kind: &TransformKind) -> TransformResult<Outcome> {
    let outcome = match kind {
        TransformKind::Numeric { errors } => apply_numeric(dataset, idx, *errors)?,
        TransformKind::DatetimeFormat { format, errors } => {
            apply_datetime(dataset, idx, format.as_deref(), *errors)?
        }
        TransformKind::Replace { pairs } => apply_replace(dataset, idx, pairs),
        TransformKind::Categorical { categories } => {
            apply_categorical(dataset, idx, categories.as_deref())
        }
        TransformKind::Bin { edges, labels } => apply_bin(dataset, idx, edges, labels),
        TransformKind::String(op) => apply_string(dataset, idx, op),
        TransformKind::Math {
            op,
            operand,
            decimals,
        } => apply_math(dataset, idx, *op, operand.as_ref(), *decimals),
    };
    Ok(outcome)
}

/// Apply a batch of column transforms, in the given order.
pub fn transform_columns(
    dataset: &DataSet,
    transformations: &[(String, ColumnTransformSpec)],
) -> TransformResult<Processed> {
    let mut warnings = Vec::new();
    let mut resolved: Vec<(&str, TransformKind)> = Vec::with_capacity(transformations.len());
    for (column, spec) in transformations {
        match TransformKind::resolve(column, spec)? {
            Some(kind) => resolved.push((column.as_str(), kind)),
            None => warnings.push(TransformWarning::skipped(
                OP,
                column,
                format!("unsupported transformation type '{}'", spec.kind),
            )),
        }
    }

    let mut out = dataset.clone();
    for (column, kind) in &resolved {
        let Some(idx) = out.schema.index_of(column) else {
            warnings.push(TransformWarning::skipped(OP, *column, "column not found"));
            continue;
        };
        match apply_one(&out, idx, kind)? {
            Outcome::Replaced(field, values) => {
                out.replace_column(idx, field, values);
                tracing::info!(column = %column, transform = kind.name(), "applied column transform");
            }
            Outcome::Unchanged => {
                tracing::debug!(column = %column, transform = kind.name(), "column left unchanged");
            }
            Outcome::Skipped(reason) => warnings.push(TransformWarning::skipped(OP, *column, reason)),
        }
    }
    Ok(Processed::with_warnings(out, warnings))
}
