use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use tabular_transforms::execution::{ExecutionEngine, ExecutionOptions, OperationRequest};
use tabular_transforms::ingestion::{IngestionOptions, SourceDescriptor};
use tabular_transforms::processing::{FilterCondition, JoinSpec, JoinType};
use tabular_transforms::registry::{DatasetRegistry, DatasetSource, Operation, OperationKind};
use tabular_transforms::types::{DataType, Value};
use tabular_transforms::TransformError;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn load_sales(registry: &DatasetRegistry) -> tabular_transforms::registry::DatasetId {
    let (id, meta) = registry
        .load(
            SourceDescriptor::file("tests/fixtures/sales.csv"),
            &IngestionOptions::default(),
        )
        .unwrap();
    assert_eq!(meta.row_count, 6);
    id
}

#[test]
fn lineage_records_each_successful_operation() {
    init_tracing();
    let registry = DatasetRegistry::new();
    let id = load_sales(&registry);

    let filtered = registry
        .apply(
            id,
            "filter",
            json!({"conditions": [
                {"column": "region", "operator": "in", "value": ["north", "south"]},
                {"column": "ghost", "operator": "eq", "value": 1}
            ]}),
        )
        .unwrap();
    assert_eq!(filtered.table.row_count(), 5);
    assert_eq!(filtered.warnings().len(), 1);

    registry
        .apply(
            id,
            "aggregate",
            json!({"groupBy": ["region"], "aggregations": {"revenue": ["sum", "mean"]}}),
        )
        .unwrap();

    let err = registry
        .apply(id, "sort", json!({"by": "units"}))
        .unwrap_err();
    assert!(matches!(err, TransformError::Schema { operation: "sort", .. }));

    let lineage = registry.lineage(id).unwrap();
    let kinds: Vec<OperationKind> = lineage.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, [OperationKind::Filter, OperationKind::Aggregate]);

    let first = &lineage.records()[0];
    assert_eq!(first.summary.rows_before, 6);
    assert_eq!(first.summary.rows_after, 5);
    assert_eq!(first.summary.warnings.len(), 1);

    let last = lineage.last().unwrap();
    assert_eq!(last.summary.columns_after, 3);
    assert!(last.applied_at >= first.applied_at);

    let current = registry.table(id).unwrap();
    assert_eq!(current.row_count(), 2);
    assert_eq!(registry.replay(id).unwrap(), *current);
}

#[test]
fn unknown_operation_kind_is_a_config_error() {
    init_tracing();
    let registry = DatasetRegistry::new();
    let id = load_sales(&registry);
    let err = registry.apply(id, "explode", json!({})).unwrap_err();
    assert!(matches!(err, TransformError::Config { .. }));
    assert!(registry.lineage(id).unwrap().is_empty());
}

#[test]
fn validate_checks_without_changing_anything() {
    init_tracing();
    let registry = DatasetRegistry::new();
    let id = load_sales(&registry);

    let ok = Operation::from_config("sort", json!({"by": ["region", "revenue"], "ascending": [true, false]})).unwrap();
    let preview = registry.validate(id, &ok).unwrap();
    assert_eq!(preview.dataset.row_count(), 0);
    assert_eq!(preview.dataset.schema, registry.schema(id).unwrap());

    let bad = Operation::from_config("aggregate", json!({"groupBy": "region", "aggregations": {"revenue": "mode"}}))
        .unwrap();
    assert!(matches!(registry.validate(id, &bad), Err(TransformError::Config { .. })));
    assert!(registry.lineage(id).unwrap().is_empty());
}

#[test]
fn joins_register_a_new_dataset() {
    init_tracing();
    let registry = DatasetRegistry::new();
    let sales = load_sales(&registry);
    let (targets, _) = registry
        .load(
            SourceDescriptor::inline_json(r#"[{"region": "north", "target": 250}, {"region": "west", "target": 90}]"#),
            &IngestionOptions::default(),
        )
        .unwrap();

    let spec = JoinSpec::on(["region"], JoinType::Outer);
    let (joined, processed) = registry.apply_join(sales, targets, &spec).unwrap();
    assert_eq!(processed.dataset.row_count(), 7);
    assert_eq!(registry.len(), 3);

    let snapshot = registry.get(joined).unwrap();
    assert!(snapshot.lineage.is_empty());
    match snapshot.source {
        DatasetSource::Joined { left, right, .. } => {
            assert_eq!(left, sales);
            assert_eq!(right, targets);
        }
        other => panic!("expected a joined source, got {other:?}"),
    }
    let west = snapshot
        .table
        .rows
        .iter()
        .find(|row| row[0] == Value::from("west"))
        .unwrap();
    assert_eq!(west.last(), Some(&Value::Int64(90)));
    assert_eq!(
        snapshot.table.schema.field("target").unwrap().data_type,
        DataType::Int64
    );

    registry.remove(sales).unwrap();
    assert!(registry.contains(joined));
    assert!(matches!(
        registry.table(sales),
        Err(TransformError::DatasetNotFound { .. })
    ));
}

#[test]
fn list_orders_datasets_by_creation() {
    init_tracing();
    let registry = DatasetRegistry::new();
    let first = load_sales(&registry);
    thread::sleep(Duration::from_millis(2));
    let second = load_sales(&registry);
    registry
        .apply_filter(second, vec![FilterCondition::new("units", "notNull", json!(null))])
        .unwrap();

    let listed = registry.list();
    assert_eq!(listed.iter().map(|s| s.id).collect::<Vec<_>>(), [first, second]);
    assert_eq!(listed[1].operations, 1);
    assert_eq!(listed[1].row_count, 5);
}

#[test]
fn concurrent_operations_on_one_dataset_are_serialized() {
    init_tracing();
    let registry = Arc::new(DatasetRegistry::new());
    let (id, _) = registry
        .load(SourceDescriptor::inline_json(r#"[{"n": 0}]"#), &IngestionOptions::default())
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                registry
                    .apply(
                        id,
                        "transform",
                        json!({"n": {"type": "math", "params": {"operation": "add", "value": 1}}}),
                    )
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(registry.table(id).unwrap().rows, vec![vec![Value::Int64(8)]]);
    assert_eq!(registry.lineage(id).unwrap().len(), 8);
}

#[test]
fn batch_execution_across_datasets() {
    init_tracing();
    let registry = DatasetRegistry::new();
    let ids: Vec<_> = (0..4).map(|_| load_sales(&registry)).collect();
    let engine = ExecutionEngine::new(ExecutionOptions {
        num_threads: Some(2),
        max_in_flight: 2,
    })
    .unwrap();

    let mut requests = Vec::new();
    for &id in &ids {
        requests.push(
            OperationRequest::from_config(id, "clean", json!({"dropNa": true})).unwrap(),
        );
        requests.push(
            OperationRequest::from_config(
                id,
                "pivot",
                json!({"index": "region", "columns": "quarter", "values": "revenue", "aggFunc": "sum"}),
            )
            .unwrap(),
        );
    }
    let results = engine.apply_batch(&registry, requests);
    assert_eq!(results.len(), 8);
    assert!(results.iter().all(Result::is_ok));

    for &id in &ids {
        let table = registry.table(id).unwrap();
        assert_eq!(table.schema.field_names().collect::<Vec<_>>(), ["region", "Q1", "Q2"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(registry.replay(id).unwrap(), *table);
    }

    let snap = engine.metrics().snapshot();
    assert_eq!(snap.operations_succeeded, 8);
    assert_eq!(snap.groups_finished, 4);
    assert!(snap.max_active_groups <= 2);
}
