//! Stable multi-key sort.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{TransformError, TransformResult};
use crate::types::{DataSet, Value};

use super::{OneOrMany, Processed};

const OP: &str = "sort";

fn ascending_default() -> OneOrMany<bool> {
    OneOrMany::One(true)
}

/// Sort configuration.
///
/// `ascending` is either one flag for every key or one flag per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    /// Sort keys, most significant first.
    #[serde(alias = "sortBy", alias = "sort_by")]
    pub by: OneOrMany<String>,
    /// Direction flag(s).
    #[serde(default = "ascending_default")]
    pub ascending: OneOrMany<bool>,
}

impl SortSpec {
    /// Sort ascending by `columns`.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            by: OneOrMany::Many(columns.into_iter().map(Into::into).collect()),
            ascending: ascending_default(),
        }
    }

    /// Set one direction flag per key.
    pub fn ascending(mut self, flags: impl Into<Vec<bool>>) -> Self {
        self.ascending = OneOrMany::Many(flags.into());
        self
    }
}

fn is_missing(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Float64(f) => f.is_nan(),
        _ => false,
    }
}

/// Missing cells (null, NaN) go last regardless of direction.
fn compare_cells(a: &Value, b: &Value, ascending: bool) -> Ordering {
    match (is_missing(a), is_missing(b)) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if ascending => a.sort_cmp(b),
        (false, false) => a.sort_cmp(b).reverse(),
    }
}

/// Sort rows by `spec.by`. Ties keep their input order.
pub fn sort(dataset: &DataSet, spec: &SortSpec) -> TransformResult<Processed> {
    if spec.by.is_empty() {
        return Err(TransformError::config(OP, "at least one sort column is required"));
    }
    let idxs = spec
        .by
        .as_slice()
        .iter()
        .map(|c| dataset.schema.require(OP, c))
        .collect::<TransformResult<Vec<_>>>()?;
    let directions = match &spec.ascending {
        OneOrMany::One(flag) => vec![*flag; idxs.len()],
        OneOrMany::Many(flags) if flags.len() == idxs.len() => flags.clone(),
        OneOrMany::Many(flags) => {
            return Err(TransformError::config(
                OP,
                format!("{} sort column(s) but {} ascending flag(s)", idxs.len(), flags.len()),
            ));
        }
    };

    let mut rows = dataset.rows.clone();
    rows.sort_by(|a, b| {
        idxs.iter()
            .zip(&directions)
            .map(|(&i, &asc)| compare_cells(&a[i], &b[i], asc))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });

    tracing::info!(rows = rows.len(), keys = idxs.len(), "sorted data");
    Ok(Processed::new(DataSet::new(dataset.schema.clone(), rows)))
}
