use serde_json::json;

use tabular_transforms::ingestion::{ingest_from_path, IngestionOptions};
use tabular_transforms::processing::{
    aggregate, apply_filter, clean, join, melt, pivot, sort, transform_columns, AggregationSpec, CleanOptions,
    ColumnTransformSpec, FilterCondition, JoinSpec, JoinType, MeltSpec, PivotSpec, SortSpec,
};
use tabular_transforms::types::{DataSet, DataType, Field, Schema, Value};
use tabular_transforms::TransformError;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn ab_table() -> DataSet {
    DataSet::new(
        Schema::new(vec![
            Field::new("a", DataType::Int64),
            Field::new("b", DataType::Utf8),
        ]),
        vec![
            vec![Value::Int64(1), Value::from("x")],
            vec![Value::Int64(2), Value::from("y")],
            vec![Value::Int64(3), Value::from("x")],
        ],
    )
}

fn sales() -> DataSet {
    ingest_from_path("tests/fixtures/sales.csv", &IngestionOptions::default()).unwrap()
}

fn names(ds: &DataSet) -> Vec<&str> {
    ds.schema.field_names().collect()
}

fn column_text(ds: &DataSet, name: &str) -> Vec<String> {
    ds.column(name).unwrap().map(ToString::to_string).collect()
}

#[test]
fn filter_on_equality_keeps_matching_rows() {
    init_tracing();
    let out = apply_filter(&ab_table(), &[FilterCondition::new("b", "eq", json!("x"))]).unwrap();
    assert_eq!(
        out.dataset.rows,
        vec![
            vec![Value::Int64(1), Value::from("x")],
            vec![Value::Int64(3), Value::from("x")],
        ]
    );
    assert!(out.warnings.is_empty());
}

#[test]
fn group_by_sum_names_columns_after_the_function() {
    init_tracing();
    let out = aggregate(&ab_table(), &AggregationSpec::new(["b"]).with("a", ["sum"])).unwrap();
    assert_eq!(names(&out.dataset), ["b", "a_sum"]);
    assert_eq!(
        out.dataset.rows,
        vec![
            vec![Value::from("x"), Value::Int64(4)],
            vec![Value::from("y"), Value::Int64(2)],
        ]
    );
}

#[test]
fn left_join_keeps_unmatched_right_rows_out() {
    init_tracing();
    let left = DataSet::new(
        Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("v", DataType::Utf8),
        ]),
        vec![vec![Value::Int64(1), Value::from("A")]],
    );
    let right = DataSet::new(
        Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("w", DataType::Utf8),
        ]),
        vec![
            vec![Value::Int64(1), Value::from("B")],
            vec![Value::Int64(2), Value::from("C")],
        ],
    );
    let out = join(&left, &right, &JoinSpec::on(["id"], JoinType::Left)).unwrap();
    assert_eq!(names(&out.dataset), ["id", "v", "w"]);
    assert_eq!(
        out.dataset.rows,
        vec![vec![Value::Int64(1), Value::from("A"), Value::from("B")]]
    );
}

#[test]
fn unsupported_filter_operator_is_skipped_with_a_warning() {
    init_tracing();
    let conditions = [
        FilterCondition::new("b", "eq", json!("x")),
        FilterCondition::new("a", "regex", json!("^1")),
    ];
    let out = apply_filter(&ab_table(), &conditions).unwrap();
    assert_eq!(out.dataset.row_count(), 2);
    assert_eq!(out.warnings.len(), 1);
    assert_eq!(out.warnings[0].operation, "filter");
    assert_eq!(out.warnings[0].target, "a");
}

#[test]
fn malformed_operand_fails_the_whole_filter() {
    init_tracing();
    let err = apply_filter(
        &ab_table(),
        &[FilterCondition::new("a", "between", json!([1]))],
    )
    .unwrap_err();
    assert!(matches!(err, TransformError::Config { operation: "filter", .. }));
}

#[test]
fn loaded_sales_filter_then_aggregate() {
    init_tracing();
    let ds = sales();
    let filtered = apply_filter(&ds, &[FilterCondition::new("units", "gte", json!(5))]).unwrap();
    assert_eq!(filtered.dataset.row_count(), 4);

    let spec: AggregationSpec = serde_json::from_value(json!({
        "groupBy": "region",
        "aggregations": {"revenue": "sum", "units": ["max", "count"]}
    }))
    .unwrap();
    let out = aggregate(&filtered.dataset, &spec).unwrap();
    assert_eq!(names(&out.dataset), ["region", "revenue_sum", "units_max", "units_count"]);
    assert_eq!(
        out.dataset.rows,
        vec![
            vec![Value::from("north"), Value::Float64(295.5), Value::Int64(12), Value::Int64(3)],
            vec![Value::from("south"), Value::Float64(70.0), Value::Int64(7), Value::Int64(1)],
        ]
    );
}

#[test]
fn pivot_fills_missing_combinations() {
    init_tracing();
    let spec = PivotSpec::new(["region"], "quarter", "units")
        .agg_func("sum")
        .fill_value(json!(0));
    let out = pivot(&sales(), &spec).unwrap();
    assert_eq!(names(&out.dataset), ["region", "Q1", "Q2"]);
    assert_eq!(
        out.dataset.rows,
        vec![
            vec![Value::from("north"), Value::Int64(15), Value::Int64(12)],
            vec![Value::from("south"), Value::Int64(7), Value::Int64(3)],
            vec![Value::from("east"), Value::Int64(0), Value::Int64(0)],
        ]
    );

    let long = melt(&out.dataset, &MeltSpec::new(["region"])).unwrap();
    assert_eq!(names(&long.dataset), ["region", "variable", "value"]);
    assert_eq!(long.dataset.row_count(), 6);
    assert_eq!(column_text(&long.dataset, "variable"), ["Q1", "Q1", "Q1", "Q2", "Q2", "Q2"]);
}

#[test]
fn sort_then_bin_revenue() {
    init_tracing();
    let sorted = sort(&sales(), &SortSpec::new(["revenue"]).ascending([false])).unwrap();
    assert_eq!(
        column_text(&sorted.dataset, "revenue"),
        ["120.0", "100.0", "75.5", "70.0", "45.0", "20.0"]
    );

    let binned = transform_columns(
        &sorted.dataset,
        &[(
            "revenue".to_string(),
            ColumnTransformSpec::new("bin", json!({"bins": [0, 50, 100, 150], "labels": ["low", "mid", "high"]})),
        )],
    )
    .unwrap();
    assert_eq!(
        column_text(&binned.dataset, "revenue"),
        ["high", "high", "mid", "mid", "low", "low"]
    );
}

#[test]
fn clean_and_column_transforms_collect_warnings() {
    init_tracing();
    let options: CleanOptions = serde_json::from_value(json!({
        "dropColumns": ["quarter"],
        "renameColumns": {"units": "qty", "nope": "still_nope"},
        "fillNa": {"qty": 0}
    }))
    .unwrap();
    let cleaned = clean(&sales(), &options).unwrap();
    assert_eq!(names(&cleaned.dataset), ["region", "product", "qty", "revenue"]);
    assert_eq!(cleaned.dataset.rows[5][2], Value::Int64(0));
    assert_eq!(cleaned.warnings.len(), 1);
    assert_eq!(cleaned.warnings[0].target, "nope");

    let out = transform_columns(
        &cleaned.dataset,
        &[
            ("region".to_string(), ColumnTransformSpec::new("string", json!({"operation": "upper"}))),
            ("qty".to_string(), ColumnTransformSpec::new("math", json!({"operation": "multiply", "value": 2}))),
            ("missing".to_string(), ColumnTransformSpec::new("string", json!({"operation": "lower"}))),
            ("product".to_string(), ColumnTransformSpec::new("teleport", json!({}))),
        ],
    )
    .unwrap();
    assert_eq!(column_text(&out.dataset, "region")[0], "NORTH");
    assert_eq!(out.dataset.rows[0][2], Value::Int64(20));
    assert_eq!(
        out.warnings.iter().map(|w| w.target.as_str()).collect::<Vec<_>>(),
        ["product", "missing"]
    );
}

#[test]
fn strict_numeric_conversion_reports_the_offending_cell() {
    init_tracing();
    let err = transform_columns(
        &sales(),
        &[(
            "product".to_string(),
            ColumnTransformSpec::new("numeric", json!({"errors": "raise"})),
        )],
    )
    .unwrap_err();
    match err {
        TransformError::TypeCoercion { column, row, raw, .. } => {
            assert_eq!(column, "product");
            assert_eq!(row, 0);
            assert_eq!(raw, "widget");
        }
        other => panic!("expected a coercion error, got {other:?}"),
    }
}
