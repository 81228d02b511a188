//! Hashable keys over cells, used for grouping, joins and de-duplication.
//!
//! Key equality is tag-exact: `Int64(1)` and `Float64(1.0)` are different keys, and a text
//! cell never equals a categorical cell with the same label. `Null` equals `Null` here; joins
//! exclude null keys themselves.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::types::{DataSet, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum KeyCell {
    Null,
    Int(i64),
    Float(u64),
    Bool(bool),
    Text(String),
    Timestamp(NaiveDateTime),
    Category(String),
}

impl KeyCell {
    pub(crate) fn from_value(v: &Value) -> Self {
        match v {
            Value::Null => Self::Null,
            Value::Int64(i) => Self::Int(*i),
            Value::Float64(f) => Self::Float(canonical_bits(*f)),
            Value::Bool(b) => Self::Bool(*b),
            Value::Utf8(s) => Self::Text(s.clone()),
            Value::Timestamp(ts) => Self::Timestamp(*ts),
            Value::Categorical(c) => Self::Category(c.label.clone()),
        }
    }
}

fn canonical_bits(f: f64) -> u64 {
    if f.is_nan() {
        f64::NAN.to_bits()
    } else if f == 0.0 {
        0.0f64.to_bits()
    } else {
        f.to_bits()
    }
}

pub(crate) type RowKey = Vec<KeyCell>;

/// Key of `row` projected onto the columns at `idxs`.
pub(crate) fn row_key(row: &[Value], idxs: &[usize]) -> RowKey {
    idxs.iter().map(|&i| KeyCell::from_value(&row[i])).collect()
}

/// `true` if any component of the key is null.
pub(crate) fn has_null(key: &RowKey) -> bool {
    key.iter().any(|k| *k == KeyCell::Null)
}

/// Partition row indices by the key over `idxs`.
///
/// Groups are returned in order of first occurrence; row indices within a group keep arrival
/// order.
pub(crate) fn group_rows(dataset: &DataSet, idxs: &[usize]) -> Vec<Vec<usize>> {
    let mut positions: HashMap<RowKey, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (row_idx, row) in dataset.rows.iter().enumerate() {
        let key = row_key(row, idxs);
        match positions.get(&key) {
            Some(&g) => groups[g].push(row_idx),
            None => {
                positions.insert(key, groups.len());
                groups.push(vec![row_idx]);
            }
        }
    }
    groups
}
