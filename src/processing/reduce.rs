//! Reduction functions shared by aggregation and pivoting.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{TransformError, TransformResult};
use crate::types::{DataSet, DataType, Value};

/// Built-in reduction over the cells of one column (or one group of one column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFunc {
    /// Sum numeric values, ignoring nulls. Integer input stays integer unless it overflows.
    Sum,
    /// Arithmetic mean of numeric values, ignoring nulls.
    Mean,
    /// Count non-null cells.
    Count,
    /// Minimum non-null value.
    Min,
    /// Maximum non-null value.
    Max,
    /// Median of numeric values, ignoring nulls.
    Median,
    /// First non-null value in arrival order.
    First,
    /// Last non-null value in arrival order.
    Last,
}

impl AggFunc {
    /// Parse a function name (case-insensitive; `avg`/`average` are accepted for `mean`).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "mean" | "avg" | "average" => Some(Self::Mean),
            "count" => Some(Self::Count),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "median" => Some(Self::Median),
            "first" => Some(Self::First),
            "last" => Some(Self::Last),
            _ => None,
        }
    }

    /// Like [`Self::parse`], but an unknown name is a configuration error for `operation`.
    pub(crate) fn resolve(operation: &'static str, name: &str) -> TransformResult<Self> {
        Self::parse(name).ok_or_else(|| {
            TransformError::config(
                operation,
                format!(
                    "unsupported aggregation function '{name}' (expected sum|mean|count|min|max|median|first|last)"
                ),
            )
        })
    }

    /// Canonical lowercase name, used in output column names.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Median => "median",
            Self::First => "first",
            Self::Last => "last",
        }
    }

    /// Output type when reducing a column of `input` type (before overflow promotion).
    pub fn output_type(&self, input: DataType) -> DataType {
        match self {
            Self::Count => DataType::Int64,
            Self::Mean | Self::Median => DataType::Float64,
            Self::Sum if input == DataType::Int64 => DataType::Int64,
            Self::Sum => DataType::Float64,
            Self::Min | Self::Max | Self::First | Self::Last => input,
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduce a column using a built-in [`AggFunc`].
///
/// - Returns `None` if `column` does not exist in the schema.
/// - Numeric functions skip nulls; if nothing remains they return `Some(Value::Null)`.
/// - `Count` returns the number of non-null cells.
pub fn reduce(dataset: &DataSet, column: &str, func: AggFunc) -> Option<Value> {
    let idx = dataset.schema.index_of(column)?;
    Some(reduce_values(dataset.column_values(idx), func))
}

/// Reduce an iterator of cells with `func`.
pub fn reduce_values<'a>(values: impl IntoIterator<Item = &'a Value>, func: AggFunc) -> Value {
    let mut non_null = values.into_iter().filter(|v| !v.is_null());
    match func {
        AggFunc::Count => Value::Int64(non_null.count() as i64),
        AggFunc::First => non_null.next().cloned().unwrap_or(Value::Null),
        AggFunc::Last => non_null.last().cloned().unwrap_or(Value::Null),
        AggFunc::Min => extreme(non_null, Ordering::Less),
        AggFunc::Max => extreme(non_null, Ordering::Greater),
        AggFunc::Sum => sum(non_null),
        AggFunc::Mean => {
            let nums: Vec<f64> = numeric(non_null).collect();
            if nums.is_empty() {
                Value::Null
            } else {
                Value::Float64(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        AggFunc::Median => {
            let mut nums: Vec<f64> = numeric(non_null).collect();
            if nums.is_empty() {
                return Value::Null;
            }
            nums.sort_by(f64::total_cmp);
            let mid = nums.len() / 2;
            if nums.len() % 2 == 0 {
                Value::Float64((nums[mid - 1] + nums[mid]) / 2.0)
            } else {
                Value::Float64(nums[mid])
            }
        }
    }
}

fn numeric<'a>(values: impl Iterator<Item = &'a Value>) -> impl Iterator<Item = f64> {
    values.filter_map(Value::as_f64).filter(|f| !f.is_nan())
}

fn sum<'a>(values: impl Iterator<Item = &'a Value>) -> Value {
    let mut int_acc: Option<i64> = Some(0);
    let mut float_acc = 0.0f64;
    let mut seen = false;
    for v in values {
        match v {
            Value::Int64(i) => {
                seen = true;
                int_acc = int_acc.and_then(|a| a.checked_add(*i));
                float_acc += *i as f64;
            }
            Value::Float64(f) if !f.is_nan() => {
                seen = true;
                int_acc = None;
                float_acc += f;
            }
            _ => {}
        }
    }
    match (seen, int_acc) {
        (false, _) => Value::Null,
        (true, Some(i)) => Value::Int64(i),
        (true, None) => Value::Float64(float_acc),
    }
}

fn extreme<'a>(values: impl Iterator<Item = &'a Value>, want: Ordering) -> Value {
    values
        .filter(|v| !matches!(v, Value::Float64(f) if f.is_nan()))
        .fold(None::<&Value>, |best, v| match best {
            Some(b) if v.sort_cmp(b) != want => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or(Value::Null)
}

/// Settle the type of a freshly computed column.
///
/// Mixed `Int64`/`Float64` cells (integer sums that overflowed in some groups) are widened to
/// `Float64`. Returns the column type, or `fallback` when every cell is null.
pub(crate) fn settle_column(values: &mut [Value], fallback: DataType) -> DataType {
    let mut seen: Option<DataType> = None;
    let mut mixed_numeric = false;
    for dt in values.iter().filter_map(Value::data_type) {
        match seen {
            None => seen = Some(dt),
            Some(s) if s != dt && s.is_numeric() && dt.is_numeric() => mixed_numeric = true,
            _ => {}
        }
    }
    if mixed_numeric {
        for v in values.iter_mut() {
            if let Value::Int64(i) = v {
                *v = Value::Float64(*i as f64);
            }
        }
        return DataType::Float64;
    }
    seen.unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::{reduce, reduce_values, settle_column, AggFunc};
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    fn numeric_dataset_with_nulls() -> DataSet {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("score", DataType::Float64),
        ]);

        let rows = vec![
            vec![Value::Int64(1), Value::Float64(10.0)],
            vec![Value::Int64(2), Value::Null],
            vec![Value::Int64(3), Value::Float64(5.5)],
        ];

        DataSet::new(schema, rows)
    }

    #[test]
    fn reduce_count_counts_non_null_cells() {
        let ds = numeric_dataset_with_nulls();
        assert_eq!(reduce(&ds, "score", AggFunc::Count), Some(Value::Int64(2)));
        assert_eq!(reduce(&ds, "id", AggFunc::Count), Some(Value::Int64(3)));
    }

    #[test]
    fn reduce_sum_ignores_nulls_and_preserves_type() {
        let ds = numeric_dataset_with_nulls();
        assert_eq!(reduce(&ds, "score", AggFunc::Sum), Some(Value::Float64(15.5)));
        assert_eq!(reduce(&ds, "id", AggFunc::Sum), Some(Value::Int64(6)));
    }

    #[test]
    fn reduce_min_max_ignore_nulls() {
        let ds = numeric_dataset_with_nulls();
        assert_eq!(reduce(&ds, "score", AggFunc::Min), Some(Value::Float64(5.5)));
        assert_eq!(reduce(&ds, "score", AggFunc::Max), Some(Value::Float64(10.0)));
        assert_eq!(reduce(&ds, "id", AggFunc::Min), Some(Value::Int64(1)));
        assert_eq!(reduce(&ds, "id", AggFunc::Max), Some(Value::Int64(3)));
    }

    #[test]
    fn reduce_returns_none_for_missing_column() {
        let ds = numeric_dataset_with_nulls();
        assert_eq!(reduce(&ds, "missing", AggFunc::Count), None);
        assert_eq!(reduce(&ds, "missing", AggFunc::Sum), None);
    }

    #[test]
    fn reduce_numeric_returns_null_if_all_values_null() {
        let schema = Schema::new(vec![Field::new("score", DataType::Float64)]);
        let ds = DataSet::new(schema, vec![vec![Value::Null], vec![Value::Null]]);
        assert_eq!(reduce(&ds, "score", AggFunc::Sum), Some(Value::Null));
        assert_eq!(reduce(&ds, "score", AggFunc::Mean), Some(Value::Null));
        assert_eq!(reduce(&ds, "score", AggFunc::Min), Some(Value::Null));
        assert_eq!(reduce(&ds, "score", AggFunc::First), Some(Value::Null));
        assert_eq!(reduce(&ds, "score", AggFunc::Count), Some(Value::Int64(0)));
    }

    #[test]
    fn mean_median_first_last() {
        let values = [Value::Null, Value::Int64(4), Value::Int64(1), Value::Int64(3), Value::Null];
        assert_eq!(reduce_values(&values, AggFunc::Mean), Value::Float64(8.0 / 3.0));
        assert_eq!(reduce_values(&values, AggFunc::Median), Value::Float64(3.0));
        assert_eq!(reduce_values(&values[..3], AggFunc::Median), Value::Float64(2.5));
        assert_eq!(reduce_values(&values, AggFunc::First), Value::Int64(4));
        assert_eq!(reduce_values(&values, AggFunc::Last), Value::Int64(3));
    }

    #[test]
    fn min_max_work_on_text() {
        let values = [Value::from("pear"), Value::from("apple"), Value::Null];
        assert_eq!(reduce_values(&values, AggFunc::Min), Value::from("apple"));
        assert_eq!(reduce_values(&values, AggFunc::Max), Value::from("pear"));
    }

    #[test]
    fn integer_sum_overflow_promotes_to_float() {
        let values = [Value::Int64(i64::MAX), Value::Int64(1)];
        assert!(matches!(reduce_values(&values, AggFunc::Sum), Value::Float64(_)));

        let mut column = vec![Value::Int64(1), Value::Float64(2.5), Value::Null];
        assert_eq!(settle_column(&mut column, DataType::Int64), DataType::Float64);
        assert_eq!(column[0], Value::Float64(1.0));
    }

    #[test]
    fn parse_accepts_aliases_and_rejects_unknown() {
        assert_eq!(AggFunc::parse("AVG"), Some(AggFunc::Mean));
        assert_eq!(AggFunc::parse(" Sum "), Some(AggFunc::Sum));
        assert_eq!(AggFunc::parse("mode"), None);
        assert!(AggFunc::resolve("pivot", "mode").is_err());
    }
}
