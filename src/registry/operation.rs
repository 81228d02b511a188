//! Closed set of single-dataset operations the registry can apply and record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TransformError, TransformResult};
use crate::processing::{
    aggregate, apply_filter, clean, melt, ordered_map, pivot, sort, transform_columns,
    AggregationSpec, CleanOptions, ColumnTransformSpec, FilterCondition, MeltSpec, PivotSpec,
    Processed, SortSpec,
};
use crate::types::DataSet;

/// Operation family, as recorded in lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Row filtering by predicates.
    Filter,
    /// Group-by aggregation.
    Aggregate,
    /// Long to wide reshape.
    Pivot,
    /// Wide to long reshape.
    Melt,
    /// Multi-key sort.
    Sort,
    /// Duplicate/null handling, drops, renames and fills.
    Clean,
    /// Per-column transforms.
    Transform,
}

impl OperationKind {
    /// Parse an operation name. Accepts a few common spellings (`aggregation`, `unpivot`,
    /// `column_transform`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_lowercase().as_str() {
            "filter" => Self::Filter,
            "aggregate" | "aggregation" | "group_by" | "groupby" => Self::Aggregate,
            "pivot" => Self::Pivot,
            "melt" | "unpivot" => Self::Melt,
            "sort" => Self::Sort,
            "clean" => Self::Clean,
            "transform" | "column_transform" | "columntransform" | "transform_columns" => {
                Self::Transform
            }
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical lowercase name, as used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Aggregate => "aggregate",
            Self::Pivot => "pivot",
            Self::Melt => "melt",
            Self::Sort => "sort",
            Self::Clean => "clean",
            Self::Transform => "transform",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully parsed operation over one dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Keep rows matching every condition.
    Filter(Vec<FilterCondition>),
    /// Group and reduce.
    Aggregate(AggregationSpec),
    /// Reshape long to wide.
    Pivot(PivotSpec),
    /// Reshape wide to long.
    Melt(MeltSpec),
    /// Reorder rows.
    Sort(SortSpec),
    /// Cleaning steps, in their fixed order.
    Clean(CleanOptions),
    /// Column name → transform, applied in order.
    Transform(Vec<(String, ColumnTransformSpec)>),
}

/// Unwrap `{"<key>": inner}` to `inner`; anything else is returned as is.
fn unwrap_key(params: serde_json::Value, key: &str) -> serde_json::Value {
    match params {
        serde_json::Value::Object(mut map) if map.len() == 1 && map.contains_key(key) => {
            map.remove(key).unwrap_or_default()
        }
        other => other,
    }
}

impl Operation {
    /// Resolve a string-keyed operation request into an [`Operation`].
    ///
    /// `filter` accepts a list of conditions or `{"conditions": [...]}`; `transform` accepts a
    /// column → spec map or `{"transformations": {...}}`. Every other kind takes its spec
    /// object directly. An unknown kind or a parameter shape that does not deserialize is a
    /// [`TransformError::Config`].
    pub fn from_config(kind: &str, params: serde_json::Value) -> TransformResult<Self> {
        let kind = OperationKind::parse(kind)
            .ok_or_else(|| TransformError::config("dispatch", format!("unknown operation '{kind}'")))?;
        let op = kind.name();
        let bad = |e: serde_json::Error| TransformError::config(op, e.to_string());

        let operation = match kind {
            OperationKind::Filter => {
                Self::Filter(serde_json::from_value(unwrap_key(params, "conditions")).map_err(bad)?)
            }
            OperationKind::Aggregate => Self::Aggregate(serde_json::from_value(params).map_err(bad)?),
            OperationKind::Pivot => Self::Pivot(serde_json::from_value(params).map_err(bad)?),
            OperationKind::Melt => Self::Melt(serde_json::from_value(params).map_err(bad)?),
            OperationKind::Sort => Self::Sort(serde_json::from_value(params).map_err(bad)?),
            OperationKind::Clean => Self::Clean(serde_json::from_value(params).map_err(bad)?),
            OperationKind::Transform => {
                Self::Transform(ordered_map::deserialize(unwrap_key(params, "transformations")).map_err(bad)?)
            }
        };
        Ok(operation)
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Filter(_) => OperationKind::Filter,
            Self::Aggregate(_) => OperationKind::Aggregate,
            Self::Pivot(_) => OperationKind::Pivot,
            Self::Melt(_) => OperationKind::Melt,
            Self::Sort(_) => OperationKind::Sort,
            Self::Clean(_) => OperationKind::Clean,
            Self::Transform(_) => OperationKind::Transform,
        }
    }

    /// Canonical parameter object. `Operation::from_config(kind, parameters)` yields an equal
    /// operation, which is what lineage replay relies on.
    pub fn parameters(&self) -> serde_json::Value {
        let value = match self {
            Self::Filter(conditions) => serde_json::to_value(conditions),
            Self::Aggregate(spec) => serde_json::to_value(spec),
            Self::Pivot(spec) => serde_json::to_value(spec),
            Self::Melt(spec) => serde_json::to_value(spec),
            Self::Sort(spec) => serde_json::to_value(spec),
            Self::Clean(options) => serde_json::to_value(options),
            Self::Transform(pairs) => ordered_map::serialize(pairs, serde_json::value::Serializer),
        };
        value.unwrap_or_default()
    }

    /// Run the operation against `dataset`, producing a new table.
    pub fn apply(&self, dataset: &DataSet) -> TransformResult<Processed> {
        match self {
            Self::Filter(conditions) => apply_filter(dataset, conditions),
            Self::Aggregate(spec) => aggregate(dataset, spec),
            Self::Pivot(spec) => pivot(dataset, spec),
            Self::Melt(spec) => melt(dataset, spec),
            Self::Sort(spec) => sort(dataset, spec),
            Self::Clean(options) => clean(dataset, options),
            Self::Transform(pairs) => transform_columns(dataset, pairs),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Operation, OperationKind};
    use crate::error::TransformError;
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn sample() -> DataSet {
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
    fn kind_aliases() {
        assert_eq!(OperationKind::parse("Aggregation"), Some(OperationKind::Aggregate));
        assert_eq!(OperationKind::parse("unpivot"), Some(OperationKind::Melt));
        assert_eq!(OperationKind::parse("column_transform"), Some(OperationKind::Transform));
        assert_eq!(OperationKind::parse("explode"), None);
    }

    #[test]
    fn filter_accepts_list_or_wrapped_conditions() {
        let cond = json!({"column": "b", "operator": "eq", "value": "x"});
        let a = Operation::from_config("filter", json!([cond.clone()])).unwrap();
        let b = Operation::from_config("filter", json!({"conditions": [cond]})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.apply(&sample()).unwrap().dataset.row_count(), 2);
    }

    #[test]
    fn parameters_round_trip_through_from_config() {
        let ops = [
            Operation::from_config("aggregate", json!({"groupBy": "b", "aggregations": {"a": "sum"}})),
            Operation::from_config("sort", json!({"sort_by": ["b", "a"], "ascending": [true, false]})),
            Operation::from_config("clean", json!({"dropDuplicates": true, "rename_columns": {"a": "n"}})),
            Operation::from_config(
                "transform",
                json!({"transformations": {
                    "b": {"type": "string", "params": {"operation": "upper"}},
                    "a": {"type": "math", "params": {"operation": "multiply", "value": 2}},
                }}),
            ),
            Operation::from_config("pivot", json!({"index": ["b"], "columns": "a", "values": "a"})),
        ];
        for op in ops {
            let op = op.unwrap();
            let again = Operation::from_config(op.kind().name(), op.parameters()).unwrap();
            assert_eq!(again, op);
            assert_eq!(again.apply(&sample()).unwrap(), op.apply(&sample()).unwrap());
        }
    }

    #[test]
    fn transform_keeps_caller_order() {
        let op = Operation::from_config(
            "transform",
            json!({"b": {"type": "string", "params": {"operation": "upper"}}, "a": {"type": "numeric"}}),
        )
        .unwrap();
        let Operation::Transform(pairs) = &op else {
            panic!("expected a transform");
        };
        let cols: Vec<&str> = pairs.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(cols, ["b", "a"]);
    }

    #[test]
    fn malformed_shapes_are_config_errors() {
        let err = Operation::from_config("explode", json!({})).unwrap_err();
        assert!(matches!(err, TransformError::Config { operation: "dispatch", .. }));
        let err = Operation::from_config("sort", json!({"ascending": true})).unwrap_err();
        assert!(matches!(err, TransformError::Config { operation: "sort", .. }));
        let err = Operation::from_config("filter", json!({"column": "a"})).unwrap_err();
        assert!(matches!(err, TransformError::Config { operation: "filter", .. }));
    }
}
