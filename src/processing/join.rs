//! Relational joins on key columns.
//!
//! Keys compare tag-exactly (see [`super::key`]) and a key containing `Null` never matches.
//! Non-unique keys produce the cartesian product of the matching rows, so the output can be
//! larger than either input.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::coercion::coerce_to;
use crate::error::{TransformError, TransformResult};
use crate::types::{DataSet, Field, Schema, Value};

use super::key::{has_null, row_key, RowKey};
use super::{OneOrMany, Processed};

const OP: &str = "join";

/// Join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    /// Matching pairs only.
    #[default]
    Inner,
    /// Every left row; unmatched right side is null.
    Left,
    /// Every right row; unmatched left side is null.
    Right,
    /// Every row of both sides.
    #[serde(alias = "full")]
    Outer,
}

impl JoinType {
    /// Lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inner => "inner",
            Self::Left => "left",
            Self::Right => "right",
            Self::Outer => "outer",
        }
    }
}

fn default_suffixes() -> (String, String) {
    ("_x".to_string(), "_y".to_string())
}

/// Join configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSpec {
    /// Key columns of the left table.
    #[serde(alias = "left_on", alias = "leftKeys", alias = "left_keys")]
    pub left_on: OneOrMany<String>,
    /// Key columns of the right table, pairwise with `left_on`.
    #[serde(alias = "right_on", alias = "rightKeys", alias = "right_keys")]
    pub right_on: OneOrMany<String>,
    /// Join type (default `inner`).
    #[serde(default, alias = "joinType", alias = "join_type")]
    pub how: JoinType,
    /// Suffixes appended to overlapping non-key column names (default `("_x", "_y")`).
    #[serde(default = "default_suffixes")]
    pub suffixes: (String, String),
}

impl JoinSpec {
    /// Join on differently named key columns.
    pub fn new<L, R, S>(left_on: L, right_on: R, how: JoinType) -> Self
    where
        L: IntoIterator<Item = S>,
        R: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            left_on: OneOrMany::Many(left_on.into_iter().map(Into::into).collect()),
            right_on: OneOrMany::Many(right_on.into_iter().map(Into::into).collect()),
            how,
            suffixes: default_suffixes(),
        }
    }

    /// Join on key columns with the same names on both sides.
    pub fn on<I, S>(keys: I, how: JoinType) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        Self::new(keys.clone(), keys, how)
    }
}

struct Layout {
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    right_values: Vec<usize>,
    schema: Schema,
}

fn layout(left: &Schema, right: &Schema, spec: &JoinSpec) -> TransformResult<Layout> {
    if spec.left_on.is_empty() {
        return Err(TransformError::config(OP, "at least one key column is required"));
    }
    if spec.left_on.len() != spec.right_on.len() {
        return Err(TransformError::config(
            OP,
            format!(
                "left has {} key column(s) but right has {}",
                spec.left_on.len(),
                spec.right_on.len()
            ),
        ));
    }
    let left_keys = spec
        .left_on
        .as_slice()
        .iter()
        .map(|c| left.require(OP, c))
        .collect::<TransformResult<Vec<_>>>()?;
    let right_keys = spec
        .right_on
        .as_slice()
        .iter()
        .map(|c| right.require(OP, c))
        .collect::<TransformResult<Vec<_>>>()?;
    let right_values: Vec<usize> = (0..right.len()).filter(|i| !right_keys.contains(i)).collect();

    let overlaps = |name: &str| right_values.iter().any(|&i| right.fields[i].name == name);
    let (left_suffix, right_suffix) = &spec.suffixes;

    let mut fields: Vec<Field> = left
        .fields
        .iter()
        .enumerate()
        .map(|(i, f)| {
            if !left_keys.contains(&i) && overlaps(&f.name) {
                Field::new(format!("{}{left_suffix}", f.name), f.data_type)
            } else {
                f.clone()
            }
        })
        .collect();
    for &i in &right_values {
        let f = &right.fields[i];
        if left.index_of(&f.name).is_some() {
            fields.push(Field::new(format!("{}{right_suffix}", f.name), f.data_type));
        } else {
            fields.push(f.clone());
        }
    }

    for (i, f) in fields.iter().enumerate() {
        if fields[..i].iter().any(|g| g.name == f.name) {
            return Err(TransformError::config(
                OP,
                format!(
                    "column '{}' appears twice in the output; choose different suffixes",
                    f.name
                ),
            ));
        }
    }

    Ok(Layout {
        left_keys,
        right_keys,
        right_values,
        schema: Schema::new(fields),
    })
}

/// Row index → key, for rows whose key has no nulls.
fn index_rows(dataset: &DataSet, idxs: &[usize]) -> HashMap<RowKey, Vec<usize>> {
    let mut index: HashMap<RowKey, Vec<usize>> = HashMap::new();
    for (i, row) in dataset.rows.iter().enumerate() {
        let key = row_key(row, idxs);
        if !has_null(&key) {
            index.entry(key).or_default().push(i);
        }
    }
    index
}

/// Pair up rows of both sides as `(left, right)` positions, in output order.
fn match_rows(
    left: &DataSet,
    right: &DataSet,
    plan: &Layout,
    how: JoinType,
) -> Vec<(Option<usize>, Option<usize>)> {
    let mut pairs = Vec::new();
    match how {
        JoinType::Inner | JoinType::Left | JoinType::Outer => {
            let index = index_rows(right, &plan.right_keys);
            let mut right_matched = vec![false; right.row_count()];
            for (l, row) in left.rows.iter().enumerate() {
                let key = row_key(row, &plan.left_keys);
                let matches = if has_null(&key) { None } else { index.get(&key) };
                match matches {
                    Some(rs) => {
                        for &r in rs {
                            right_matched[r] = true;
                            pairs.push((Some(l), Some(r)));
                        }
                    }
                    None if how != JoinType::Inner => pairs.push((Some(l), None)),
                    None => {}
                }
            }
            if how == JoinType::Outer {
                pairs.extend(
                    right_matched
                        .iter()
                        .enumerate()
                        .filter(|(_, m)| !**m)
                        .map(|(r, _)| (None, Some(r))),
                );
            }
        }
        JoinType::Right => {
            let index = index_rows(left, &plan.left_keys);
            for (r, row) in right.rows.iter().enumerate() {
                let key = row_key(row, &plan.right_keys);
                match index.get(&key).filter(|_| !has_null(&key)) {
                    Some(ls) => pairs.extend(ls.iter().map(|&l| (Some(l), Some(r)))),
                    None => pairs.push((None, Some(r))),
                }
            }
        }
    }
    pairs
}

/// Join `left` with `right`.
///
/// Output columns are every left column followed by the right non-key columns. Key columns
/// appear once, under the left names; for right-only rows they hold the right key values.
/// Non-key columns present on both sides get `spec.suffixes`. Row order:
///
/// - `inner`, `left`: left row order, matches in right row order;
/// - `right`: right row order;
/// - `outer`: left row order, then the unmatched right rows.
pub fn join(left: &DataSet, right: &DataSet, spec: &JoinSpec) -> TransformResult<Processed> {
    let plan = layout(&left.schema, &right.schema, spec)?;
    let pairs = match_rows(left, right, &plan, spec.how);

    let rows: Vec<Vec<Value>> = pairs
        .into_iter()
        .map(|(l, r)| {
            let mut out = Vec::with_capacity(plan.schema.len());
            for (i, field) in left.schema.fields.iter().enumerate() {
                let cell = match (l, r) {
                    (Some(l), _) => left.rows[l][i].clone(),
                    (None, Some(r)) => match plan.left_keys.iter().position(|&k| k == i) {
                        Some(k) => coerce_to(&right.rows[r][plan.right_keys[k]], field.data_type)
                            .unwrap_or(Value::Null),
                        None => Value::Null,
                    },
                    (None, None) => Value::Null,
                };
                out.push(cell);
            }
            for &j in &plan.right_values {
                out.push(r.map(|r| right.rows[r][j].clone()).unwrap_or(Value::Null));
            }
            out
        })
        .collect();

    let out = DataSet::new(plan.schema, rows);
    tracing::info!(
        how = spec.how.name(),
        left_rows = left.row_count(),
        right_rows = right.row_count(),
        rows_after = out.row_count(),
        "joined data"
    );
    Ok(Processed::new(out))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{join, JoinSpec, JoinType};
    use crate::error::TransformError;
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn left_table() -> DataSet {
        DataSet::new(
            Schema::new(vec![
                Field::new("id", DataType::Int64),
                Field::new("v", DataType::Utf8),
            ]),
            vec![vec![Value::Int64(1), Value::from("A")]],
        )
    }

    fn right_table() -> DataSet {
        DataSet::new(
            Schema::new(vec![
                Field::new("id", DataType::Int64),
                Field::new("w", DataType::Utf8),
            ]),
            vec![
                vec![Value::Int64(1), Value::from("B")],
                vec![Value::Int64(2), Value::from("C")],
            ],
        )
    }

    fn names(ds: &DataSet) -> Vec<&str> {
        ds.schema.field_names().collect()
    }

    #[test]
    fn left_join_keeps_left_rows() {
        let out = join(&left_table(), &right_table(), &JoinSpec::on(["id"], JoinType::Left)).unwrap();
        assert_eq!(names(&out.dataset), ["id", "v", "w"]);
        assert_eq!(
            out.dataset.rows,
            vec![vec![Value::Int64(1), Value::from("A"), Value::from("B")]]
        );
    }

    #[test]
    fn right_and_outer_joins_fill_missing_side_with_null() {
        let out = join(&left_table(), &right_table(), &JoinSpec::on(["id"], JoinType::Right)).unwrap();
        assert_eq!(
            out.dataset.rows,
            vec![
                vec![Value::Int64(1), Value::from("A"), Value::from("B")],
                vec![Value::Int64(2), Value::Null, Value::from("C")],
            ]
        );
        let out = join(&left_table(), &right_table(), &JoinSpec::on(["id"], JoinType::Outer)).unwrap();
        assert_eq!(out.dataset.row_count(), 2);
        assert_eq!(out.dataset.rows[1][0], Value::Int64(2));
    }

    #[test]
    fn non_unique_keys_produce_cartesian_product() {
        let left = DataSet::new(
            Schema::new(vec![
                Field::new("k", DataType::Utf8),
                Field::new("l", DataType::Int64),
            ]),
            vec![
                vec![Value::from("a"), Value::Int64(1)],
                vec![Value::from("a"), Value::Int64(2)],
                vec![Value::from("b"), Value::Int64(3)],
            ],
        );
        let right = DataSet::new(
            Schema::new(vec![
                Field::new("k", DataType::Utf8),
                Field::new("r", DataType::Int64),
            ]),
            vec![
                vec![Value::from("a"), Value::Int64(10)],
                vec![Value::from("a"), Value::Int64(20)],
                vec![Value::from("a"), Value::Int64(30)],
            ],
        );
        let out = join(&left, &right, &JoinSpec::on(["k"], JoinType::Inner)).unwrap();
        assert_eq!(out.dataset.row_count(), 6);
        let pairs: Vec<(Value, Value)> = out
            .dataset
            .rows
            .iter()
            .map(|r| (r[1].clone(), r[2].clone()))
            .collect();
        assert_eq!(pairs[0], (Value::Int64(1), Value::Int64(10)));
        assert_eq!(pairs[2], (Value::Int64(1), Value::Int64(30)));
        assert_eq!(pairs[3], (Value::Int64(2), Value::Int64(10)));

        let out = join(&left, &right, &JoinSpec::on(["k"], JoinType::Left)).unwrap();
        assert_eq!(out.dataset.row_count(), 7);
        assert_eq!(out.dataset.rows[6], vec![Value::from("b"), Value::Int64(3), Value::Null]);
    }

    #[test]
    fn null_keys_never_match() {
        let schema = Schema::new(vec![Field::new("id", DataType::Int64)]);
        let left = DataSet::new(schema.clone(), vec![vec![Value::Null], vec![Value::Int64(1)]]);
        let right = DataSet::new(schema, vec![vec![Value::Null], vec![Value::Int64(1)]]);
        let out = join(&left, &right, &JoinSpec::on(["id"], JoinType::Inner)).unwrap();
        assert_eq!(out.dataset.rows, vec![vec![Value::Int64(1)]]);
        let out = join(&left, &right, &JoinSpec::on(["id"], JoinType::Outer)).unwrap();
        assert_eq!(out.dataset.row_count(), 3);
    }

    #[test]
    fn keys_match_tag_exactly() {
        let left = DataSet::new(
            Schema::new(vec![Field::new("id", DataType::Int64)]),
            vec![vec![Value::Int64(1)]],
        );
        let right = DataSet::new(
            Schema::new(vec![Field::new("id", DataType::Float64)]),
            vec![vec![Value::Float64(1.0)]],
        );
        let out = join(&left, &right, &JoinSpec::on(["id"], JoinType::Inner)).unwrap();
        assert_eq!(out.dataset.row_count(), 0);
    }

    #[test]
    fn overlapping_columns_get_suffixes() {
        let left = DataSet::new(
            Schema::new(vec![
                Field::new("id", DataType::Int64),
                Field::new("name", DataType::Utf8),
            ]),
            vec![vec![Value::Int64(1), Value::from("l")]],
        );
        let right = DataSet::new(
            Schema::new(vec![
                Field::new("key", DataType::Int64),
                Field::new("name", DataType::Utf8),
            ]),
            vec![vec![Value::Int64(1), Value::from("r")]],
        );
        let out = join(&left, &right, &JoinSpec::new(["id"], ["key"], JoinType::Inner)).unwrap();
        assert_eq!(names(&out.dataset), ["id", "name_x", "name_y"]);

        let mut spec = JoinSpec::new(["id"], ["key"], JoinType::Inner);
        spec.suffixes = (String::new(), String::new());
        let err = join(&left, &right, &spec).unwrap_err();
        assert!(matches!(err, TransformError::Config { .. }));
    }

    #[test]
    fn key_validation() {
        let err = join(
            &left_table(),
            &right_table(),
            &JoinSpec::new(["id", "v"], ["id"], JoinType::Inner),
        )
        .unwrap_err();
        assert!(matches!(err, TransformError::Config { .. }));
        let err = join(&left_table(), &right_table(), &JoinSpec::on(["w"], JoinType::Inner)).unwrap_err();
        assert!(matches!(err, TransformError::Schema { .. }));
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let spec: JoinSpec =
            serde_json::from_value(json!({"left_on": "id", "right_on": "id", "how": "left"})).unwrap();
        assert_eq!(spec.how, JoinType::Left);
        assert_eq!(spec.suffixes, ("_x".to_string(), "_y".to_string()));
        let spec: JoinSpec =
            serde_json::from_value(json!({"leftKeys": ["a"], "rightKeys": ["b"]})).unwrap();
        assert_eq!(spec.how, JoinType::Inner);
    }
}
