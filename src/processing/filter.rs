//! Declarative row filtering.
//!
//! A [`FilterCondition`] names a column, an operator and an operand. Conditions are resolved
//! against the table schema once (operator name → [`FilterOp`], JSON operand → typed
//! [`Value`]s), then evaluated row by row into a [`RowMask`].
//!
//! Policy for a batch of conditions:
//!
//! - unknown column or unknown operator: the condition is skipped with a warning;
//! - malformed operand (e.g. `between` without exactly two values): the whole filter fails
//!   with a configuration error before any row is read.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coercion::literal_from_json;
use crate::error::{TransformError, TransformResult, TransformWarning};
use crate::types::{DataSet, DataType, Schema, Value};

use super::Processed;

const OP: &str = "filter";

/// Filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// Equal to the operand.
    Eq,
    /// Comparable to, and different from, the operand.
    Ne,
    /// Greater than the operand.
    Gt,
    /// Less than the operand.
    Lt,
    /// Greater than or equal to the operand.
    Gte,
    /// Less than or equal to the operand.
    Lte,
    /// Text representation contains the operand.
    Contains,
    /// Text representation does not contain the operand.
    NotContains,
    /// Text representation starts with the operand.
    StartsWith,
    /// Text representation ends with the operand.
    EndsWith,
    /// Equal to one of the operand values.
    In,
    /// Equal to none of the operand values.
    NotIn,
    /// Inside the inclusive range `[low, high]`.
    Between,
    /// Cell is null.
    IsNull,
    /// Cell is not null.
    NotNull,
}

impl FilterOp {
    /// Parse an operator name (case-insensitive). Symbolic forms (`=`, `==`, `!=`, `>`, `<`,
    /// `>=`, `<=`) are accepted as well.
    pub fn parse(name: &str) -> Option<Self> {
        let op = match name.trim().to_ascii_lowercase().as_str() {
            "eq" | "=" | "==" => Self::Eq,
            "ne" | "!=" | "<>" => Self::Ne,
            "gt" | ">" => Self::Gt,
            "lt" | "<" => Self::Lt,
            "gte" | ">=" => Self::Gte,
            "lte" | "<=" => Self::Lte,
            "contains" => Self::Contains,
            "notcontains" => Self::NotContains,
            "startswith" => Self::StartsWith,
            "endswith" => Self::EndsWith,
            "in" => Self::In,
            "notin" => Self::NotIn,
            "between" => Self::Between,
            "isnull" => Self::IsNull,
            "notnull" => Self::NotNull,
            _ => return None,
        };
        Some(op)
    }

    /// Canonical camelCase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Lt => "lt",
            Self::Gte => "gte",
            Self::Lte => "lte",
            Self::Contains => "contains",
            Self::NotContains => "notContains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::In => "in",
            Self::NotIn => "notIn",
            Self::Between => "between",
            Self::IsNull => "isNull",
            Self::NotNull => "notNull",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One filter condition, as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Column to test.
    pub column: String,
    /// Operator name (see [`FilterOp::parse`]).
    pub operator: String,
    /// Operand: a scalar, a list (`in`/`notIn`), a `[low, high]` pair (`between`), or absent
    /// for `isNull`/`notNull`.
    #[serde(default)]
    pub value: serde_json::Value,
}

impl FilterCondition {
    /// Create a condition.
    pub fn new(
        column: impl Into<String>,
        operator: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            value,
        }
    }
}

/// Boolean row selection, one entry per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowMask(Vec<bool>);

impl RowMask {
    /// A mask selecting all `len` rows.
    pub fn all(len: usize) -> Self {
        Self(vec![true; len])
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if the mask has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of selected rows.
    pub fn selected_count(&self) -> usize {
        self.0.iter().filter(|b| **b).count()
    }

    /// Logical AND with another mask of the same length.
    pub fn and_assign(&mut self, other: &RowMask) {
        debug_assert_eq!(self.len(), other.len(), "row masks must have equal length");
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a = *a && *b;
        }
    }

    /// The mask as a slice.
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

impl From<Vec<bool>> for RowMask {
    fn from(v: Vec<bool>) -> Self {
        Self(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    None,
    Scalar(Value),
    Text(String),
    Set(Vec<Value>),
    Range(Value, Value),
}

/// A condition whose column, operator and operand have been checked against a schema.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedCondition {
    column: String,
    idx: usize,
    op: FilterOp,
    operand: Operand,
}

impl ResolvedCondition {
    fn matches(&self, cell: &Value) -> bool {
        match (self.op, &self.operand) {
            (FilterOp::IsNull, _) => cell.is_null(),
            (FilterOp::NotNull, _) => !cell.is_null(),
            _ if cell.is_null() => false,
            (FilterOp::Eq, Operand::Scalar(v)) => cell.compare(v) == Some(Ordering::Equal),
            (FilterOp::Ne, Operand::Scalar(v)) => {
                matches!(cell.compare(v), Some(Ordering::Less | Ordering::Greater))
            }
            (FilterOp::Gt, Operand::Scalar(v)) => cell.compare(v) == Some(Ordering::Greater),
            (FilterOp::Lt, Operand::Scalar(v)) => cell.compare(v) == Some(Ordering::Less),
            (FilterOp::Gte, Operand::Scalar(v)) => {
                matches!(cell.compare(v), Some(Ordering::Greater | Ordering::Equal))
            }
            (FilterOp::Lte, Operand::Scalar(v)) => {
                matches!(cell.compare(v), Some(Ordering::Less | Ordering::Equal))
            }
            (FilterOp::Contains, Operand::Text(t)) => cell.to_string().contains(t.as_str()),
            (FilterOp::NotContains, Operand::Text(t)) => !cell.to_string().contains(t.as_str()),
            (FilterOp::StartsWith, Operand::Text(t)) => cell.to_string().starts_with(t.as_str()),
            (FilterOp::EndsWith, Operand::Text(t)) => cell.to_string().ends_with(t.as_str()),
            (FilterOp::In, Operand::Set(set)) => set.iter().any(|v| cell.equals(v)),
            (FilterOp::NotIn, Operand::Set(set)) => !set.iter().any(|v| cell.equals(v)),
            (FilterOp::Between, Operand::Range(lo, hi)) => {
                matches!(cell.compare(lo), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(cell.compare(hi), Some(Ordering::Less | Ordering::Equal))
            }
            _ => false,
        }
    }

    fn evaluate(&self, dataset: &DataSet) -> RowMask {
        RowMask(dataset.column_values(self.idx).map(|c| self.matches(c)).collect())
    }
}

fn scalar(
    cond: &FilterCondition,
    json: &serde_json::Value,
    target: DataType,
) -> TransformResult<Value> {
    literal_from_json(json, Some(target)).ok_or_else(|| {
        TransformError::config(
            OP,
            format!(
                "operator '{}' on column '{}' expects a scalar value, got {json}",
                cond.operator, cond.column
            ),
        )
    })
}

fn resolve_operand(
    cond: &FilterCondition,
    op: FilterOp,
    target: DataType,
) -> TransformResult<Operand> {
    let operand = match op {
        FilterOp::IsNull | FilterOp::NotNull => Operand::None,
        FilterOp::Eq | FilterOp::Ne | FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte => {
            Operand::Scalar(scalar(cond, &cond.value, target)?)
        }
        FilterOp::Contains | FilterOp::NotContains | FilterOp::StartsWith | FilterOp::EndsWith => {
            match scalar(cond, &cond.value, DataType::Utf8)? {
                Value::Null => {
                    return Err(TransformError::config(
                        OP,
                        format!("operator '{}' on column '{}' requires a value", op, cond.column),
                    ));
                }
                v => Operand::Text(v.to_string()),
            }
        }
        FilterOp::In | FilterOp::NotIn => match &cond.value {
            serde_json::Value::Array(items) => Operand::Set(
                items
                    .iter()
                    .map(|item| scalar(cond, item, target))
                    .collect::<TransformResult<_>>()?,
            ),
            other => Operand::Set(vec![scalar(cond, other, target)?]),
        },
        FilterOp::Between => match &cond.value {
            serde_json::Value::Array(items) if items.len() == 2 => {
                let lo = scalar(cond, &items[0], target)?;
                let hi = scalar(cond, &items[1], target)?;
                if lo.compare(&hi) == Some(Ordering::Greater) {
                    return Err(TransformError::config(
                        OP,
                        format!("between on column '{}' requires low <= high, got [{lo}, {hi}]", cond.column),
                    ));
                }
                Operand::Range(lo, hi)
            }
            other => {
                return Err(TransformError::config(
                    OP,
                    format!(
                        "between on column '{}' requires a list of two values [min, max], got {other}",
                        cond.column
                    ),
                ));
            }
        },
    };
    Ok(operand)
}

/// Resolve a single condition strictly: an unknown column is a schema error and an unknown
/// operator a configuration error.
fn resolve_strict(schema: &Schema, cond: &FilterCondition) -> TransformResult<ResolvedCondition> {
    let idx = schema.require(OP, &cond.column)?;
    let op = FilterOp::parse(&cond.operator).ok_or_else(|| {
        TransformError::config(OP, format!("unsupported operator '{}'", cond.operator))
    })?;
    let operand = resolve_operand(cond, op, schema.fields[idx].data_type)?;
    Ok(ResolvedCondition {
        column: cond.column.clone(),
        idx,
        op,
        operand,
    })
}

/// Resolve a batch of conditions, turning unknown columns/operators into warnings.
pub(crate) fn resolve_conditions(
    schema: &Schema,
    conditions: &[FilterCondition],
) -> TransformResult<(Vec<ResolvedCondition>, Vec<TransformWarning>)> {
    let mut resolved = Vec::with_capacity(conditions.len());
    let mut warnings = Vec::new();
    for cond in conditions {
        if schema.index_of(&cond.column).is_none() {
            warnings.push(TransformWarning::skipped(OP, &cond.column, "column not found"));
            continue;
        }
        if FilterOp::parse(&cond.operator).is_none() {
            warnings.push(TransformWarning::skipped(
                OP,
                &cond.column,
                format!("unsupported operator '{}'", cond.operator),
            ));
            continue;
        }
        resolved.push(resolve_strict(schema, cond)?);
    }
    Ok((resolved, warnings))
}

/// Evaluate one condition against a table.
///
/// Unlike [`apply_filter`], this is strict: an unknown column fails with
/// [`TransformError::Schema`], an unknown operator or malformed operand with
/// [`TransformError::Config`].
pub fn evaluate(dataset: &DataSet, condition: &FilterCondition) -> TransformResult<RowMask> {
    Ok(resolve_strict(&dataset.schema, condition)?.evaluate(dataset))
}

/// Apply a batch of conditions (logical AND) and return the selected rows.
///
/// An empty batch returns the table unchanged. Skipped conditions are reported as warnings.
pub fn apply_filter(dataset: &DataSet, conditions: &[FilterCondition]) -> TransformResult<Processed> {
    if conditions.is_empty() {
        return Ok(Processed::new(dataset.clone()));
    }

    let (resolved, warnings) = resolve_conditions(&dataset.schema, conditions)?;

    let mut mask = RowMask::all(dataset.row_count());
    for cond in &resolved {
        mask.and_assign(&cond.evaluate(dataset));
        tracing::debug!(
            column = %cond.column,
            operator = %cond.op,
            rows = mask.selected_count(),
            "applied filter condition"
        );
    }

    let out = dataset.select_rows(mask.as_slice());
    tracing::info!(
        rows_before = dataset.row_count(),
        rows_after = out.row_count(),
        removed = dataset.row_count() - out.row_count(),
        "filtered data"
    );
    Ok(Processed::with_warnings(out, warnings))
}
