//! In-memory data transformations.
//!
//! Every operation here is a pure function from one (or two) [`crate::types::DataSet`]s and a
//! configuration object to a new dataset. Nothing is modified in place; the registry in
//! [`crate::registry`] decides which result becomes the current table of a dataset.
//!
//! Implemented operations:
//!
//! - [`apply_filter()`] / [`evaluate()`]: declarative row filtering
//! - [`aggregate()`]: group-by with per-column reductions ([`reduce()`] for a whole column)
//! - [`join()`]: inner/left/right/outer joins on key columns
//! - [`pivot()`] / [`melt()`]: long ↔ wide reshaping
//! - [`sort()`]: stable multi-key sort
//! - [`clean()`]: duplicates, nulls, dropping/renaming columns, filling nulls
//! - [`transform_columns()`]: per-column conversions, binning, string and math operations
//!
//! Errors follow two classes. A problem with the configuration as a whole (unknown function
//! name, malformed parameters, a missing column where one is required) is a
//! [`crate::error::TransformError`] and nothing is produced. A problem with one item of a batch
//! (one filter condition, one column transform) is a [`crate::error::TransformWarning`]: the item
//! is skipped, the warning is logged and returned in [`Processed::warnings`].
//!
//! ## Example: filter → aggregate
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
//! let filtered = apply_filter(&ds, &[FilterCondition::new("a", "gte", json!(2))]).unwrap();
//! assert_eq!(filtered.dataset.row_count(), 2);
//!
//! let spec = AggregationSpec::new(["b"]).with("a", ["sum"]);
//! let grouped = aggregate(&ds, &spec).unwrap();
//! assert_eq!(grouped.dataset.rows[0], vec![Value::from("x"), Value::Int64(4)]);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::TransformWarning;
use crate::types::DataSet;

pub mod aggregate;
pub mod clean;
pub mod filter;
pub(crate) mod key;
pub mod join;
pub mod pivot;
pub mod reduce;
pub mod sort;
pub mod transform;

pub use aggregate::{aggregate, AggregationSpec};
pub use clean::{clean, CleanOptions};
pub use filter::{apply_filter, evaluate, FilterCondition, FilterOp, RowMask};
pub use join::{join, JoinSpec, JoinType};
pub use pivot::{melt, pivot, MeltSpec, PivotSpec};
pub use reduce::{reduce, reduce_values, AggFunc};
pub use sort::{sort, SortSpec};
pub use transform::{transform_columns, ColumnTransformSpec, TransformKind};

/// Result of a transform: the new table plus the items that were skipped along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    /// The resulting table.
    pub dataset: DataSet,
    /// Per-item problems that were skipped (empty when everything applied).
    pub warnings: Vec<TransformWarning>,
}

impl Processed {
    pub(crate) fn new(dataset: DataSet) -> Self {
        Self {
            dataset,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn with_warnings(dataset: DataSet, warnings: Vec<TransformWarning>) -> Self {
        Self { dataset, warnings }
    }
}

/// A configuration value that may be given as a single item or a list.
///
/// `"region"` and `["region", "year"]` both deserialize into this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A single item.
    One(T),
    /// A list of items.
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// View as a slice.
    pub fn as_slice(&self) -> &[T] {
        match self {
            Self::One(item) => std::slice::from_ref(item),
            Self::Many(items) => items,
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// `true` if this is an empty list.
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(items: Vec<T>) -> Self {
        Self::Many(items)
    }
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

/// (De)serialize `Vec<(String, V)>` as a JSON object, keeping key order.
///
/// Mapping-valued configuration (aggregations, renames, per-column transforms) determines output
/// column order, so the order the caller wrote is kept.
pub(crate) mod ordered_map {
    use std::fmt;
    use std::marker::PhantomData;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, V>(pairs: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let mut map = serializer.serialize_map(Some(pairs.len()))?;
        for (k, v) in pairs {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        struct PairsVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for PairsVisitor<V> {
            type Value = Vec<(String, V)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map keyed by column name")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((k, v)) = access.next_entry::<String, V>()? {
                    pairs.push((k, v));
                }
                Ok(pairs)
            }
        }

        deserializer.deserialize_map(PairsVisitor(PhantomData))
    }
}
