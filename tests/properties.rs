use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::json;

use tabular_transforms::processing::{
    aggregate, apply_filter, join, melt, pivot, AggregationSpec, FilterCondition, JoinSpec, JoinType, MeltSpec,
    PivotSpec,
};
use tabular_transforms::types::{DataSet, DataType, Field, Schema, Value};

fn schema() -> Schema {
    Schema::new(vec![
        Field::new("k", DataType::Int64),
        Field::new("v", DataType::Int64),
        Field::new("s", DataType::Utf8),
    ])
}

fn cell() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        6 => (-100i64..100).prop_map(Value::Int64),
    ]
}

fn row() -> impl Strategy<Value = Vec<Value>> {
    (0i64..5, cell(), prop::sample::select(vec!["a", "b", "c"]))
        .prop_map(|(k, v, s)| vec![Value::Int64(k), v, Value::from(s)])
}

fn table() -> impl Strategy<Value = DataSet> {
    prop::collection::vec(row(), 0..40).prop_map(|rows| DataSet::new(schema(), rows))
}

fn sorted_rows(ds: &DataSet) -> Vec<Vec<Value>> {
    let mut rows = ds.rows.clone();
    rows.sort_by(|a, b| {
        a.iter()
            .zip(b)
            .map(|(x, y)| x.sort_cmp(y))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows
}

proptest! {
    #[test]
    fn filtering_never_adds_rows(ds in table(), lo in -100i64..100) {
        let out = apply_filter(&ds, &[FilterCondition::new("v", "gte", json!(lo))]).unwrap();
        prop_assert!(out.dataset.row_count() <= ds.row_count());

        let unchanged = apply_filter(&ds, &[]).unwrap();
        prop_assert_eq!(unchanged.dataset, ds);
    }

    #[test]
    fn between_matches_gte_and_lte(ds in table(), a in -100i64..100, b in -100i64..100) {
        let (lo, hi) = (a.min(b), a.max(b));
        let between = apply_filter(&ds, &[FilterCondition::new("v", "between", json!([lo, hi]))]).unwrap();
        let both = apply_filter(
            &ds,
            &[
                FilterCondition::new("v", "gte", json!(lo)),
                FilterCondition::new("v", "lte", json!(hi)),
            ],
        )
        .unwrap();
        prop_assert_eq!(between.dataset, both.dataset);
    }

    #[test]
    fn aggregation_ignores_row_order(rows in prop::collection::vec(row(), 0..40).prop_shuffle()) {
        let ds = DataSet::new(schema(), rows.clone());
        let mut reversed = rows;
        reversed.reverse();
        let flipped = DataSet::new(schema(), reversed);

        let spec = AggregationSpec::new(["k"]).with("v", ["sum", "count", "min", "max"]);
        let a = aggregate(&ds, &spec).unwrap();
        let b = aggregate(&flipped, &spec).unwrap();
        prop_assert_eq!(&a.dataset.schema, &b.dataset.schema);
        prop_assert_eq!(sorted_rows(&a.dataset), sorted_rows(&b.dataset));
    }

    #[test]
    fn join_cardinality_bounds(left in table(), right in table()) {
        let l = left.row_count();
        let r = right.row_count();

        let inner = join(&left, &right, &JoinSpec::on(["k"], JoinType::Inner)).unwrap();
        prop_assert!(inner.dataset.row_count() <= l * r);

        let left_join = join(&left, &right, &JoinSpec::on(["k"], JoinType::Left)).unwrap();
        prop_assert!(left_join.dataset.row_count() >= l);

        let outer = join(&left, &right, &JoinSpec::on(["k"], JoinType::Outer)).unwrap();
        prop_assert!(outer.dataset.row_count() >= l.max(r));
    }

    #[test]
    fn pivot_then_melt_recovers_every_cell(
        cells in prop::collection::btree_map((0i64..6, 0u8..4), -1000i64..1000, 1..24)
    ) {
        let rows = cells
            .iter()
            .map(|(&(k, p), &v)| vec![Value::Int64(k), Value::from(format!("p{p}")), Value::Int64(v)])
            .collect();
        let long = DataSet::new(
            Schema::new(vec![
                Field::new("k", DataType::Int64),
                Field::new("p", DataType::Utf8),
                Field::new("v", DataType::Int64),
            ]),
            rows,
        );

        let wide = pivot(&long, &PivotSpec::new(["k"], "p", "v").agg_func("first")).unwrap();
        let back = melt(&wide.dataset, &MeltSpec::new(["k"])).unwrap();

        let recovered: BTreeMap<(i64, String), i64> = back
            .dataset
            .rows
            .iter()
            .filter_map(|row| match (&row[0], &row[1], &row[2]) {
                (Value::Int64(k), Value::Utf8(p), Value::Int64(v)) => Some(((*k, p.clone()), *v)),
                _ => None,
            })
            .collect();
        let expected: BTreeMap<(i64, String), i64> = cells
            .iter()
            .map(|(&(k, p), &v)| ((k, format!("p{p}")), v))
            .collect();
        prop_assert_eq!(recovered, expected);
    }
}
