//! `tabular-transforms` applies declarative, schema-validated transformations to in-memory
//! tables and keeps a lineage of every change.
//!
//! A table is a [`types::DataSet`]: named, typed columns ([`types::Schema`]) and rows of typed
//! [`types::Value`] cells. Supported logical types are:
//!
//! - [`types::DataType::Int64`]
//! - [`types::DataType::Float64`]
//! - [`types::DataType::Bool`]
//! - [`types::DataType::Utf8`]
//! - [`types::DataType::Timestamp`]
//! - [`types::DataType::Categorical`]
//!
//! [`types::Value::Null`] is allowed in every column.
//!
//! ## Operations
//!
//! Each operation takes a table and a serde-deserializable configuration and returns a new table
//! (see [`processing`]):
//!
//! - filter ([`processing::apply_filter`]): AND of column/operator/value conditions
//! - aggregate ([`processing::aggregate`]): group-by with `sum`, `mean`, `count`, `min`, `max`,
//!   `median`, `first`, `last`
//! - join ([`processing::join`]): inner/left/right/outer on key columns
//! - pivot / melt ([`processing::pivot`], [`processing::melt`])
//! - sort ([`processing::sort`]), clean ([`processing::clean`])
//! - column transforms ([`processing::transform_columns`]): numeric, datetime, replace,
//!   categorical, bin, string and math
//!
//! Errors follow two policies. A configuration or schema problem fails the whole call with a
//! [`TransformError`] before any row is touched. A bad item inside a batch (one filter
//! condition, one column transform, one rename) is skipped, logged through `tracing`, and
//! reported as a [`TransformWarning`] next to the result.
//!
//! ```rust
//! use serde_json::json;
//! use tabular_transforms::processing::{aggregate, apply_filter, AggregationSpec, FilterCondition};
//! use tabular_transforms::types::{DataSet, DataType, Field, Schema, Value};
//!
//! let schema = Schema::new(vec![
//!     Field::new("a", DataType::Int64),
//!     Field::new("b", DataType::Utf8),
//! ]);
//! let ds = DataSet::new(
//!     schema,
//!     vec![
//!         vec![Value::Int64(1), Value::from("x")],
//!         vec![Value::Int64(2), Value::from("y")],
//!         vec![Value::Int64(3), Value::from("x")],
//!     ],
//! );
//!
//! let only_x = apply_filter(&ds, &[FilterCondition::new("b", "eq", json!("x"))]).unwrap();
//! assert_eq!(only_x.dataset.row_count(), 2);
//!
//! let summed = aggregate(&ds, &AggregationSpec::new(["b"]).with("a", ["sum"])).unwrap();
//! assert_eq!(summed.dataset.rows[0], vec![Value::from("x"), Value::Int64(4)]);
//! ```
//!
//! ## Registry and lineage
//!
//! [`registry::DatasetRegistry`] owns tables by opaque id. Applying an operation through it
//! replaces the current table and appends a [`registry::TransformationRecord`]; a failed
//! operation changes nothing. Operations on one dataset are serialized, different datasets are
//! independent, and [`execution::ExecutionEngine`] runs batches over many datasets in parallel.
//!
//! ```rust
//! use serde_json::json;
//! use tabular_transforms::ingestion::{IngestionOptions, SourceDescriptor};
//! use tabular_transforms::registry::DatasetRegistry;
//!
//! let registry = DatasetRegistry::new();
//! let source = SourceDescriptor::inline_json(r#"[{"a": 1, "b": "x"}, {"a": 2, "b": "y"}, {"a": 3, "b": "x"}]"#);
//! let (id, _meta) = registry.load(source, &IngestionOptions::default()).unwrap();
//!
//! registry
//!     .apply(id, "aggregate", json!({"groupBy": "b", "aggregations": {"a": "sum"}}))
//!     .unwrap();
//! assert_eq!(registry.lineage(id).unwrap().len(), 1);
//! assert_eq!(registry.replay(id).unwrap(), *registry.table(id).unwrap());
//! ```
//!
//! ## Loading data
//!
//! [`ingestion::load_table`] reads CSV, JSON (documents and NDJSON), Parquet and, with the
//! `excel` feature, spreadsheets. Without an explicit schema, column types are inferred.
//!
//! ## Modules
//!
//! - [`types`]: schema + in-memory dataset types
//! - [`coercion`]: value parsing and conversion rules
//! - [`processing`]: the transform operations
//! - [`registry`]: datasets, lineage and replay
//! - [`ingestion`]: loaders and load observers
//! - [`execution`]: parallel batch execution with metrics
//! - [`error`]: error and warning types

pub mod coercion;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod processing;
pub mod registry;
pub mod types;

pub use error::{IngestionError, IngestionResult, TransformError, TransformResult, TransformWarning};
