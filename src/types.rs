//! Core data model: typed cells, schemas and the in-memory table.
//!
//! A [`DataSet`] is an ordered list of named, typed columns ([`Schema`]) plus row-major
//! [`Value`] storage. Every row has exactly one cell per field, and every non-null cell carries
//! the tag of its field's [`DataType`]. [`Value::Null`] is allowed in any column.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{TransformError, TransformResult};

/// Logical data type for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
    /// Date and time without timezone.
    Timestamp,
    /// Label drawn from a fixed category set.
    Categorical,
}

impl DataType {
    /// `true` for [`DataType::Int64`] and [`DataType::Float64`].
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int64 | Self::Float64)
    }

    /// `true` for types whose cells have a textual label.
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Utf8 | Self::Categorical)
    }

    /// Lowercase type name, as reported in source metadata.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::Utf8 => "utf8",
            Self::Timestamp => "timestamp",
            Self::Categorical => "categorical",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of fields describing the shape of a [`DataSet`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Returns the field with the given name, if present.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Like [`Self::index_of`], but a missing column is a schema error for `operation`.
    pub(crate) fn require(&self, operation: &'static str, name: &str) -> TransformResult<usize> {
        self.index_of(name)
            .ok_or_else(|| TransformError::schema(operation, name))
    }
}

/// A label from a categorical column together with its (shared) category set.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    /// The label of this cell. Always a member of `categories`.
    pub label: String,
    /// Ordered set of allowed labels, shared by every cell of the column.
    pub categories: Arc<[String]>,
}

impl Category {
    /// Position of the label within `categories`.
    pub fn position(&self) -> Option<usize> {
        self.categories.iter().position(|c| *c == self.label)
    }
}

/// A single typed cell in a [`DataSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Date and time without timezone.
    Timestamp(NaiveDateTime),
    /// Categorical label.
    Categorical(Category),
}

impl Value {
    /// `true` if this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The type tag of this cell, or `None` for [`Value::Null`].
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Int64(_) => Some(DataType::Int64),
            Self::Float64(_) => Some(DataType::Float64),
            Self::Bool(_) => Some(DataType::Bool),
            Self::Utf8(_) => Some(DataType::Utf8),
            Self::Timestamp(_) => Some(DataType::Timestamp),
            Self::Categorical(_) => Some(DataType::Categorical),
        }
    }

    /// Numeric view of integer and float cells.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Textual view of string and categorical cells.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Utf8(s) => Some(s),
            Self::Categorical(c) => Some(&c.label),
            _ => None,
        }
    }

    /// Compare two cells by their natural ordering.
    ///
    /// Returns `None` when the pair is not comparable: any comparison involving
    /// [`Value::Null`], NaN, or two incompatible tags (e.g. text against a number). Integers
    /// and floats compare numerically with each other; strings and categorical labels compare
    /// as text with each other.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Int64(_) | Self::Float64(_), Self::Int64(_) | Self::Float64(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            _ => match (self.as_text(), other.as_text()) {
                (Some(a), Some(b)) => Some(a.cmp(b)),
                _ => None,
            },
        }
    }

    /// `true` if [`Self::compare`] reports the two cells as equal.
    pub fn equals(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Total order used for sorting: nulls last, then numbers, booleans, timestamps and text.
    ///
    /// Within a class the natural ordering applies; NaN sorts after every other number.
    /// Categorical cells sharing a category set follow that set's order.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        let rank = self.sort_rank().cmp(&other.sort_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Int64(_) | Self::Float64(_), Self::Int64(_) | Self::Float64(_)) => {
                let (a, b) = (self.as_f64().unwrap_or(f64::NAN), other.as_f64().unwrap_or(f64::NAN));
                match (a.is_nan(), b.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                }
            }
            (Self::Categorical(a), Self::Categorical(b)) if a.categories == b.categories => {
                match (a.position(), b.position()) {
                    (Some(pa), Some(pb)) => pa.cmp(&pb),
                    _ => a.label.cmp(&b.label),
                }
            }
            _ => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    fn sort_rank(&self) -> u8 {
        match self {
            Self::Int64(_) | Self::Float64(_) => 0,
            Self::Bool(_) => 1,
            Self::Timestamp(_) => 2,
            Self::Utf8(_) | Self::Categorical(_) => 3,
            Self::Null => 4,
        }
    }

    /// Convert to a JSON value (timestamps and categories become strings).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Int64(v) => serde_json::Value::from(*v),
            Self::Float64(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::Utf8(_) | Self::Timestamp(_) | Self::Categorical(_) => {
                serde_json::Value::String(self.to_string())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Int64(v) => write!(f, "{v}"),
            // Debug keeps the fractional part ("1.0"), which Display drops.
            Self::Float64(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Utf8(s) => f.write_str(s),
            Self::Timestamp(ts) => {
                if ts.nanosecond() == 0 {
                    write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S"))
                } else {
                    write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f"))
                }
            }
            Self::Categorical(c) => f.write_str(&c.label),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Utf8(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Utf8(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

/// In-memory tabular dataset.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    /// Create a dataset from schema and rows without validation.
    ///
    /// Use [`Self::try_new`] for untrusted input.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    /// Create a dataset, checking row arity, column tag homogeneity and unique field names.
    pub fn try_new(schema: Schema, rows: Vec<Vec<Value>>) -> TransformResult<Self> {
        for (i, field) in schema.fields.iter().enumerate() {
            if schema.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(TransformError::config(
                    "dataset",
                    format!("duplicate column name '{}'", field.name),
                ));
            }
        }
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != schema.len() {
                return Err(TransformError::config(
                    "dataset",
                    format!(
                        "row {row_idx} has {} cells but the schema has {} fields",
                        row.len(),
                        schema.len()
                    ),
                ));
            }
            for (cell, field) in row.iter().zip(&schema.fields) {
                if let Some(dt) = cell.data_type() {
                    if dt != field.data_type {
                        return Err(TransformError::config(
                            "dataset",
                            format!(
                                "row {row_idx} column '{}' holds a {dt} cell but the column is {}",
                                field.name, field.data_type
                            ),
                        ));
                    }
                }
            }
        }
        Ok(Self { schema, rows })
    }

    /// Build a dataset from named columns. All columns must have the same length.
    pub fn from_columns(columns: Vec<(Field, Vec<Value>)>) -> TransformResult<Self> {
        let row_count = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        if let Some((field, values)) = columns.iter().find(|(_, v)| v.len() != row_count) {
            return Err(TransformError::config(
                "dataset",
                format!(
                    "column '{}' has {} values, expected {row_count}",
                    field.name,
                    values.len()
                ),
            ));
        }

        let mut rows: Vec<Vec<Value>> = (0..row_count)
            .map(|_| Vec::with_capacity(columns.len()))
            .collect();
        let mut fields = Vec::with_capacity(columns.len());
        for (field, values) in columns {
            for (row, v) in rows.iter_mut().zip(values) {
                row.push(v);
            }
            fields.push(field);
        }
        Self::try_new(Schema::new(fields), rows)
    }

    /// Number of rows in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns in the dataset.
    pub fn column_count(&self) -> usize {
        self.schema.len()
    }

    /// Iterate the cells of the column at `idx`.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| &row[idx])
    }

    /// Iterate the cells of a named column, if it exists.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let idx = self.schema.index_of(name)?;
        Some(self.column_values(idx))
    }

    /// Category set of a categorical column (taken from its first non-null cell).
    pub(crate) fn categories(&self, idx: usize) -> Option<&Arc<[String]>> {
        self.column_values(idx).find_map(|v| match v {
            Value::Categorical(c) => Some(&c.categories),
            _ => None,
        })
    }

    /// Create a new dataset containing only rows that match `predicate`.
    ///
    /// The returned dataset preserves the original schema.
    pub fn filter_rows<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&[Value]) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .filter(|row| predicate(row.as_slice()))
            .cloned()
            .collect();
        Self {
            schema: self.schema.clone(),
            rows,
        }
    }

    /// Keep the rows whose position is `true` in `mask`.
    pub fn select_rows(&self, mask: &[bool]) -> Self {
        let rows = self
            .rows
            .iter()
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|(row, _)| row.clone())
            .collect();
        Self {
            schema: self.schema.clone(),
            rows,
        }
    }

    /// Replace the column at `idx` with a new field and values.
    ///
    /// `values` must have one entry per row.
    pub(crate) fn replace_column(&mut self, idx: usize, field: Field, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.rows.len(), "column length must match row count");
        for (row, v) in self.rows.iter_mut().zip(values) {
            row[idx] = v;
        }
        self.schema.fields[idx] = field;
    }

    /// Render rows as JSON objects keyed by column name.
    pub fn to_json_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.schema
                    .fields
                    .iter()
                    .zip(row)
                    .map(|(f, v)| (f.name.clone(), v.to_json()))
                    .collect()
            })
            .collect()
    }
}
