//! Long ↔ wide reshaping: [`pivot`] and its inverse [`melt`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::coercion::{coerce_to, literal_from_json};
use crate::error::{TransformError, TransformResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

use super::key::{group_rows, KeyCell};
use super::reduce::{reduce_values, settle_column, AggFunc};
use super::{OneOrMany, Processed};

fn default_agg_func() -> String {
    "mean".to_string()
}

/// Pivot configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotSpec {
    /// Columns identifying an output row.
    #[serde(alias = "indexColumns", alias = "index_columns")]
    pub index: OneOrMany<String>,
    /// Column whose distinct values become output columns.
    #[serde(alias = "pivotColumn", alias = "pivot_column")]
    pub columns: String,
    /// Column holding the cell values.
    #[serde(alias = "valueColumn", alias = "value_column")]
    pub values: String,
    /// Reduction for cells sharing an (index, pivot value) pair. Defaults to `mean`.
    #[serde(default = "default_agg_func", alias = "agg_func", alias = "aggfunc")]
    pub agg_func: String,
    /// Value for combinations with no data (default: null).
    #[serde(default, alias = "fill_value")]
    pub fill_value: Option<serde_json::Value>,
}

impl PivotSpec {
    /// Pivot `columns` over `index`, reducing `values` with `mean`.
    pub fn new<I, S>(index: I, columns: impl Into<String>, values: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            index: OneOrMany::Many(index.into_iter().map(Into::into).collect()),
            columns: columns.into(),
            values: values.into(),
            agg_func: default_agg_func(),
            fill_value: None,
        }
    }

    /// Use `func` to reduce cells.
    pub fn agg_func(mut self, func: impl Into<String>) -> Self {
        self.agg_func = func.into();
        self
    }

    /// Fill missing combinations with `value`.
    pub fn fill_value(mut self, value: serde_json::Value) -> Self {
        self.fill_value = Some(value);
        self
    }
}

/// Reshape from long to wide form.
///
/// One output row per distinct index tuple and one output column per distinct non-null value
/// of the pivot column, both in order of first occurrence. Pivot columns are named by the
/// text representation of the value. Rows whose pivot value is null are ignored.
pub fn pivot(dataset: &DataSet, spec: &PivotSpec) -> TransformResult<Processed> {
    const OP: &str = "pivot";

    let func = AggFunc::resolve(OP, &spec.agg_func)?;
    let schema = &dataset.schema;
    if spec.index.is_empty() {
        return Err(TransformError::config(OP, "at least one index column is required"));
    }
    let index_idxs = spec
        .index
        .as_slice()
        .iter()
        .map(|c| schema.require(OP, c))
        .collect::<TransformResult<Vec<_>>>()?;
    let pivot_idx = schema.require(OP, &spec.columns)?;
    let value_idx = schema.require(OP, &spec.values)?;

    let cell_type = func.output_type(schema.fields[value_idx].data_type);
    let fill = match &spec.fill_value {
        None => Value::Null,
        Some(json) => literal_from_json(json, Some(cell_type))
            .and_then(|v| coerce_to(&v, cell_type))
            .ok_or_else(|| {
                TransformError::config(
                    OP,
                    format!("fill value {json} cannot be stored in a {cell_type} column"),
                )
            })?,
    };

    // Distinct pivot values in first-seen order.
    let mut pivot_pos: HashMap<KeyCell, usize> = HashMap::new();
    let mut pivot_names: Vec<String> = Vec::new();
    for row in &dataset.rows {
        let cell = &row[pivot_idx];
        if cell.is_null() {
            continue;
        }
        let key = KeyCell::from_value(cell);
        if !pivot_pos.contains_key(&key) {
            pivot_pos.insert(key, pivot_names.len());
            pivot_names.push(cell.to_string());
        }
    }
    for (i, name) in pivot_names.iter().enumerate() {
        if spec.index.as_slice().contains(name) || pivot_names[..i].contains(name) {
            return Err(TransformError::config(
                OP,
                format!("pivot column '{name}' collides with another output column"),
            ));
        }
    }

    let groups = group_rows(dataset, &index_idxs);

    let mut columns: Vec<(Field, Vec<Value>)> = index_idxs
        .iter()
        .map(|&i| {
            let values = groups.iter().map(|g| dataset.rows[g[0]][i].clone()).collect();
            (schema.fields[i].clone(), values)
        })
        .collect();
    let mut pivot_columns: Vec<Vec<Value>> = vec![Vec::with_capacity(groups.len()); pivot_names.len()];

    for group in &groups {
        let mut buckets: Vec<Vec<&Value>> = vec![Vec::new(); pivot_names.len()];
        for &r in group {
            let row = &dataset.rows[r];
            if let Some(&p) = pivot_pos.get(&KeyCell::from_value(&row[pivot_idx])) {
                buckets[p].push(&row[value_idx]);
            }
        }
        for (p, bucket) in buckets.into_iter().enumerate() {
            let cell = if bucket.is_empty() {
                Value::Null
            } else {
                reduce_values(bucket, func)
            };
            pivot_columns[p].push(if cell.is_null() { fill.clone() } else { cell });
        }
    }

    for (name, mut values) in pivot_names.into_iter().zip(pivot_columns) {
        let data_type = settle_column(&mut values, cell_type);
        columns.push((Field::new(name, data_type), values));
    }

    let out = DataSet::from_columns(columns)?;
    tracing::info!(
        rows_before = dataset.row_count(),
        rows_after = out.row_count(),
        pivot_columns = out.column_count() - index_idxs.len(),
        agg_func = func.name(),
        "pivoted data"
    );
    Ok(Processed::new(out))
}

fn default_var_name() -> String {
    "variable".to_string()
}

fn default_value_name() -> String {
    "value".to_string()
}

/// Melt (unpivot) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeltSpec {
    /// Columns kept as identifiers on every output row.
    #[serde(alias = "id_columns", alias = "id_vars")]
    pub id_columns: OneOrMany<String>,
    /// Columns to unpivot. Defaults to every non-identifier column.
    #[serde(default, alias = "value_columns", alias = "value_vars")]
    pub value_columns: Option<OneOrMany<String>>,
    /// Name of the output column holding the source column name.
    #[serde(default = "default_var_name", alias = "var_name")]
    pub var_name: String,
    /// Name of the output column holding the cell value.
    #[serde(default = "default_value_name", alias = "value_name")]
    pub value_name: String,
}

impl MeltSpec {
    /// Melt every column except `id_columns` into `variable`/`value`.
    pub fn new<I, S>(id_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id_columns: OneOrMany::Many(id_columns.into_iter().map(Into::into).collect()),
            value_columns: None,
            var_name: default_var_name(),
            value_name: default_value_name(),
        }
    }
}

/// Reshape from wide to long form.
///
/// Emits one row per (input row, value column), grouped by value column: every row for the
/// first value column, then every row for the second, and so on. When the value columns have
/// different types the value column is widened to `Float64` (all numeric) or `Utf8`.
pub fn melt(dataset: &DataSet, spec: &MeltSpec) -> TransformResult<Processed> {
    const OP: &str = "melt";

    let schema = &dataset.schema;
    let id_idxs = spec
        .id_columns
        .as_slice()
        .iter()
        .map(|c| schema.require(OP, c))
        .collect::<TransformResult<Vec<_>>>()?;
    let value_idxs = match &spec.value_columns {
        Some(cols) => cols
            .as_slice()
            .iter()
            .map(|c| schema.require(OP, c))
            .collect::<TransformResult<Vec<_>>>()?,
        None => (0..schema.len()).filter(|i| !id_idxs.contains(i)).collect(),
    };
    let reserved = |c: &String| *c == spec.var_name || *c == spec.value_name;
    if spec.var_name == spec.value_name || spec.id_columns.as_slice().iter().any(reserved) {
        return Err(TransformError::config(
            OP,
            format!(
                "output names '{}' and '{}' must be distinct from each other and from the id columns",
                spec.var_name, spec.value_name
            ),
        ));
    }

    let types: Vec<DataType> = value_idxs.iter().map(|&i| schema.fields[i].data_type).collect();
    let value_type = match types.first() {
        None => DataType::Utf8,
        Some(first) if types.iter().all(|t| t == first) => *first,
        Some(_) if types.iter().all(DataType::is_numeric) => DataType::Float64,
        Some(_) => DataType::Utf8,
    };

    let mut fields: Vec<Field> = id_idxs.iter().map(|&i| schema.fields[i].clone()).collect();
    fields.push(Field::new(spec.var_name.clone(), DataType::Utf8));
    fields.push(Field::new(spec.value_name.clone(), value_type));

    let mut rows = Vec::with_capacity(dataset.row_count() * value_idxs.len());
    for &v in &value_idxs {
        let var = Value::Utf8(schema.fields[v].name.clone());
        for row in &dataset.rows {
            let mut out: Vec<Value> = id_idxs.iter().map(|&i| row[i].clone()).collect();
            out.push(var.clone());
            out.push(coerce_to(&row[v], value_type).unwrap_or(Value::Null));
            rows.push(out);
        }
    }

    let out = DataSet::new(Schema::new(fields), rows);
    tracing::info!(
        rows_before = dataset.row_count(),
        rows_after = out.row_count(),
        value_columns = value_idxs.len(),
        "melted data"
    );
    Ok(Processed::new(out))
}
