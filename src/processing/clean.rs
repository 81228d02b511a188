//! Table cleaning: duplicate rows, missing values, dropping and renaming columns.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::coercion::{coerce_for_column, literal_from_json};
use crate::error::{TransformResult, TransformWarning};
use crate::types::{DataSet, Value};

use super::key::{row_key, RowKey};
use super::Processed;

const OP: &str = "clean";

/// Cleaning steps. Every step is optional; enabled steps run in field order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CleanOptions {
    /// Drop rows identical to an earlier row (nulls compare equal here).
    #[serde(alias = "drop_duplicates")]
    pub drop_duplicates: bool,
    /// Drop rows containing any missing cell (null or NaN).
    #[serde(alias = "drop_na", alias = "dropna")]
    pub drop_na: bool,
    /// Columns to remove.
    #[serde(alias = "drop_columns")]
    pub drop_columns: Vec<String>,
    /// Old name → new name.
    #[serde(alias = "rename_columns", with = "crate::processing::ordered_map")]
    pub rename_columns: Vec<(String, String)>,
    /// Column (after renaming) → replacement for missing cells.
    #[serde(alias = "fill_na", with = "crate::processing::ordered_map")]
    pub fill_na: Vec<(String, serde_json::Value)>,
}

fn is_missing(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Float64(f) => f.is_nan(),
        _ => false,
    }
}

/// Apply the enabled cleaning steps, in order: duplicates, missing rows, drop columns,
/// rename columns, fill missing cells.
///
/// Unknown columns, renames onto an existing name and fill values that do not fit the column
/// type are skipped with a warning.
pub fn clean(dataset: &DataSet, options: &CleanOptions) -> TransformResult<Processed> {
    let mut out = dataset.clone();
    let mut warnings = Vec::new();

    if options.drop_duplicates {
        let before = out.row_count();
        let all: Vec<usize> = (0..out.column_count()).collect();
        let mut seen: HashSet<RowKey> = HashSet::new();
        out.rows.retain(|row| seen.insert(row_key(row, &all)));
        tracing::info!(removed = before - out.row_count(), "dropped duplicate rows");
    }

    if options.drop_na {
        let before = out.row_count();
        out.rows.retain(|row| !row.iter().any(is_missing));
        tracing::info!(removed = before - out.row_count(), "dropped rows with missing values");
    }

    if !options.drop_columns.is_empty() {
        let mut drop: Vec<usize> = Vec::new();
        for name in &options.drop_columns {
            match out.schema.index_of(name) {
                Some(i) if !drop.contains(&i) => drop.push(i),
                Some(_) => {}
                None => warnings.push(TransformWarning::skipped(OP, name, "column not found for dropping")),
            }
        }
        let keep: Vec<usize> = (0..out.column_count()).filter(|i| !drop.contains(i)).collect();
        out.schema.fields = keep.iter().map(|&i| out.schema.fields[i].clone()).collect();
        for row in &mut out.rows {
            *row = keep.iter().map(|&i| row[i].clone()).collect();
        }
        tracing::info!(dropped = drop.len(), "dropped columns");
    }

    for (old, new) in &options.rename_columns {
        let Some(idx) = out.schema.index_of(old) else {
            warnings.push(TransformWarning::skipped(OP, old, "column not found for renaming"));
            continue;
        };
        if old == new {
            continue;
        }
        if out.schema.index_of(new).is_some() {
            warnings.push(TransformWarning::skipped(
                OP,
                old,
                format!("cannot rename to '{new}', a column with that name exists"),
            ));
            continue;
        }
        out.schema.fields[idx].name = new.clone();
        tracing::debug!(from = %old, to = %new, "renamed column");
    }

    for (column, json) in &options.fill_na {
        let Some(idx) = out.schema.index_of(column) else {
            warnings.push(TransformWarning::skipped(OP, column, "column not found for filling"));
            continue;
        };
        let data_type = out.schema.fields[idx].data_type;
        let fill = literal_from_json(json, Some(data_type))
            .filter(|v| !v.is_null())
            .and_then(|v| coerce_for_column(&v, data_type, out.categories(idx)));
        let Some(fill) = fill else {
            warnings.push(TransformWarning::skipped(
                OP,
                column,
                format!("fill value {json} does not fit a {data_type} column"),
            ));
            continue;
        };
        let mut filled = 0usize;
        for row in &mut out.rows {
            if is_missing(&row[idx]) {
                row[idx] = fill.clone();
                filled += 1;
            }
        }
        tracing::debug!(column = %column, filled, "filled missing values");
    }

    tracing::info!(
        rows_before = dataset.row_count(),
        rows_after = out.row_count(),
        columns_before = dataset.column_count(),
        columns_after = out.column_count(),
        "cleaned data"
    );
    Ok(Processed::with_warnings(out, warnings))
}
