//! Group-by aggregation.

use serde::{Deserialize, Serialize};

use crate::error::{TransformError, TransformResult};
use crate::types::{DataSet, Field, Value};

use super::key::group_rows;
use super::reduce::{reduce_values, settle_column, AggFunc};
use super::{OneOrMany, Processed};

const OP: &str = "aggregate";

/// Group-by columns plus, per value column, the functions to apply.
///
/// Deserializes from e.g. `{"group_by": "region", "aggregations": {"sales": ["sum", "mean"]}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationSpec {
    /// Columns whose value tuple identifies a group. Must be non-empty.
    #[serde(alias = "group_by")]
    pub group_by: OneOrMany<String>,
    /// Value column → function name(s), in output order.
    #[serde(with = "crate::processing::ordered_map")]
    pub aggregations: Vec<(String, OneOrMany<String>)>,
}

impl AggregationSpec {
    /// Group by `columns`, with no aggregations yet.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            group_by: OneOrMany::Many(columns.into_iter().map(Into::into).collect()),
            aggregations: Vec::new(),
        }
    }

    /// Add `functions` over `column`.
    pub fn with<I, S>(mut self, column: impl Into<String>, functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let funcs = functions.into_iter().map(Into::into).collect();
        self.aggregations.push((column.into(), OneOrMany::Many(funcs)));
        self
    }
}

/// Group `dataset` and reduce each group.
///
/// Output columns are the group-by columns followed by `<column>_<function>` for every
/// requested pair. One row per distinct group key, in order of first occurrence; `Null` is a
/// group key of its own.
///
/// Unlike filtering, validation is strict: a missing column is a
/// [`TransformError::Schema`], an unknown function or an empty group-by list a
/// [`TransformError::Config`].
pub fn aggregate(dataset: &DataSet, spec: &AggregationSpec) -> TransformResult<Processed> {
    let schema = &dataset.schema;
    if spec.group_by.is_empty() {
        return Err(TransformError::config(OP, "at least one group-by column is required"));
    }
    let group_idxs = spec
        .group_by
        .as_slice()
        .iter()
        .map(|c| schema.require(OP, c))
        .collect::<TransformResult<Vec<_>>>()?;

    let mut outputs: Vec<(usize, AggFunc, String)> = Vec::new();
    for (column, funcs) in &spec.aggregations {
        let idx = schema.require(OP, column)?;
        for name in funcs.as_slice() {
            let func = AggFunc::resolve(OP, name)?;
            outputs.push((idx, func, format!("{column}_{}", func.name())));
        }
    }

    let mut names: Vec<&str> = spec.group_by.as_slice().iter().map(String::as_str).collect();
    for (_, _, name) in &outputs {
        if names.contains(&name.as_str()) {
            return Err(TransformError::config(
                OP,
                format!("output column '{name}' would appear twice"),
            ));
        }
        names.push(name);
    }

    let groups = group_rows(dataset, &group_idxs);

    let mut columns: Vec<(Field, Vec<Value>)> = group_idxs
        .iter()
        .map(|&i| {
            let values = groups.iter().map(|g| dataset.rows[g[0]][i].clone()).collect();
            (schema.fields[i].clone(), values)
        })
        .collect();

    for (idx, func, name) in outputs {
        let mut values: Vec<Value> = groups
            .iter()
            .map(|g| reduce_values(g.iter().map(|&r| &dataset.rows[r][idx]), func))
            .collect();
        let data_type = settle_column(&mut values, func.output_type(schema.fields[idx].data_type));
        columns.push((Field::new(name, data_type), values));
    }

    let out = DataSet::from_columns(columns)?;
    tracing::info!(
        rows_before = dataset.row_count(),
        groups = out.row_count(),
        columns = out.column_count(),
        "aggregated data"
    );
    Ok(Processed::new(out))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{aggregate, AggregationSpec};
    use crate::error::TransformError;
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn sample_dataset() -> DataSet {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int64),
            Field::new("b", DataType::Utf8),
        ]);
        DataSet::new(
            schema,
            vec![
                vec![Value::Int64(1), Value::from("x")],
                vec![Value::Int64(2), Value::from("y")],
                vec![Value::Int64(3), Value::from("x")],
            ],
        )
    }

    #[test]
    fn group_by_sum_names_output_columns() {
        let ds = sample_dataset();
        let out = aggregate(&ds, &AggregationSpec::new(["b"]).with("a", ["sum"])).unwrap();
        let names: Vec<&str> = out.dataset.schema.field_names().collect();
        assert_eq!(names, ["b", "a_sum"]);
        assert_eq!(
            out.dataset.rows,
            vec![
                vec![Value::from("x"), Value::Int64(4)],
                vec![Value::from("y"), Value::Int64(2)],
            ]
        );
        assert_eq!(out.dataset.schema.fields[1].data_type, DataType::Int64);
    }

    #[test]
    fn several_functions_per_column_in_request_order() {
        let ds = sample_dataset();
        let spec = AggregationSpec::new(["b"]).with("a", ["count", "avg", "max", "first", "last"]);
        let out = aggregate(&ds, &spec).unwrap();
        let names: Vec<&str> = out.dataset.schema.field_names().collect();
        assert_eq!(names, ["b", "a_count", "a_mean", "a_max", "a_first", "a_last"]);
        assert_eq!(
            out.dataset.rows[0],
            vec![
                Value::from("x"),
                Value::Int64(2),
                Value::Float64(2.0),
                Value::Int64(3),
                Value::Int64(1),
                Value::Int64(3),
            ]
        );
    }

    #[test]
    fn null_is_its_own_group_and_nulls_are_skipped_in_values() {
        let schema = Schema::new(vec![
            Field::new("k", DataType::Utf8),
            Field::new("v", DataType::Float64),
        ]);
        let ds = DataSet::new(
            schema,
            vec![
                vec![Value::Null, Value::Float64(1.0)],
                vec![Value::from("a"), Value::Null],
                vec![Value::Null, Value::Float64(2.5)],
            ],
        );
        let out = aggregate(&ds, &AggregationSpec::new(["k"]).with("v", ["sum", "median"])).unwrap();
        assert_eq!(
            out.dataset.rows,
            vec![
                vec![Value::Null, Value::Float64(3.5), Value::Float64(1.75)],
                vec![Value::from("a"), Value::Null, Value::Null],
            ]
        );
    }

    #[test]
    fn validation_is_strict() {
        let ds = sample_dataset();
        let err = aggregate(&ds, &AggregationSpec::new(["missing"]).with("a", ["sum"])).unwrap_err();
        assert!(matches!(err, TransformError::Schema { ref column, .. } if column == "missing"));
        let err = aggregate(&ds, &AggregationSpec::new(["b"]).with("nope", ["sum"])).unwrap_err();
        assert!(matches!(err, TransformError::Schema { .. }));
        let err = aggregate(&ds, &AggregationSpec::new(["b"]).with("a", ["mode"])).unwrap_err();
        assert!(matches!(err, TransformError::Config { .. }));
        let err = aggregate(&ds, &AggregationSpec::new(Vec::<String>::new()).with("a", ["sum"]))
            .unwrap_err();
        assert!(matches!(err, TransformError::Config { .. }));
    }

    #[test]
    fn spec_deserializes_from_scalar_or_list_forms() {
        let spec: AggregationSpec =
            serde_json::from_value(json!({"group_by": "b", "aggregations": {"a": "sum"}})).unwrap();
        let out = aggregate(&sample_dataset(), &spec).unwrap();
        assert_eq!(out.dataset.rows[1], vec![Value::from("y"), Value::Int64(2)]);

        let spec: AggregationSpec = serde_json::from_value(
            json!({"groupBy": ["b"], "aggregations": {"a": ["min", "max"]}}),
        )
        .unwrap();
        assert_eq!(spec.aggregations[0].1.len(), 2);
    }
}
