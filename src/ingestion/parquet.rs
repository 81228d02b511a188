//! Parquet ingestion implementation.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use parquet::basic::{ConvertedType, Type as PhysicalType};
use parquet::file::reader::{ChunkReader, FileReader};
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::Field as ParquetField;
use parquet::schema::types::ColumnDescriptor;

use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Ingest a Parquet file using an explicit schema.
///
/// Notes:
/// - Validates that all schema fields exist as Parquet leaf columns (by column path string)
/// - Uses the Parquet record API (`RowIter`)
pub fn ingest_parquet_from_path(path: impl AsRef<Path>, schema: &Schema) -> IngestionResult<DataSet> {
    let reader = SerializedFileReader::try_from(path.as_ref())?;

    let available_columns = parquet_leaf_column_paths(&reader);
    for field in &schema.fields {
        if !available_columns.contains(field.name.as_str()) {
            return Err(IngestionError::SchemaMismatch {
                message: format!("missing required column '{}'", field.name),
            });
        }
    }

    read_rows(reader, schema)
}

/// Ingest a Parquet file, deriving the schema from the file's column metadata.
///
/// Only top-level primitive columns are read; nested columns are skipped with a log line.
pub fn infer_parquet_from_path(path: impl AsRef<Path>) -> IngestionResult<DataSet> {
    let reader = SerializedFileReader::try_from(path.as_ref())?;

    let mut fields = Vec::new();
    for column in reader.metadata().file_metadata().schema_descr().columns() {
        if column.path().parts().len() != 1 {
            tracing::warn!(column = %column.path().string(), "skipping nested parquet column");
            continue;
        }
        fields.push(Field::new(column.name(), data_type_for(column)));
    }

    read_rows(reader, &Schema::new(fields))
}

fn data_type_for(column: &ColumnDescriptor) -> DataType {
    match (column.physical_type(), column.converted_type()) {
        (PhysicalType::BOOLEAN, _) => DataType::Bool,
        (PhysicalType::INT96, _)
        | (_, ConvertedType::DATE | ConvertedType::TIMESTAMP_MILLIS | ConvertedType::TIMESTAMP_MICROS) => {
            DataType::Timestamp
        }
        (_, ConvertedType::DECIMAL) => DataType::Float64,
        (PhysicalType::INT32 | PhysicalType::INT64, _) => DataType::Int64,
        (PhysicalType::FLOAT | PhysicalType::DOUBLE, _) => DataType::Float64,
        _ => DataType::Utf8,
    }
}

fn read_rows(reader: SerializedFileReader<File>, schema: &Schema) -> IngestionResult<DataSet> {
    let mut rows: Vec<Vec<Value>> = Vec::new();
    for (idx0, row_res) in reader.into_iter().enumerate() {
        let row_num = idx0 + 1;
        let row = row_res?;

        let map: HashMap<&str, &ParquetField> = row
            .get_column_iter()
            .map(|(name, field)| (name.as_str(), field))
            .collect();

        let mut out_row: Vec<Value> = Vec::with_capacity(schema.fields.len());
        for f in &schema.fields {
            let v = map.get(f.name.as_str()).ok_or_else(|| IngestionError::SchemaMismatch {
                message: format!("row {row_num} missing required column '{}'", f.name),
            })?;
            out_row.push(convert_parquet_field(row_num, &f.name, f.data_type, v)?);
        }
        rows.push(out_row);
    }

    Ok(DataSet::new(schema.clone(), rows))
}

fn parquet_leaf_column_paths<R: ChunkReader + 'static>(
    reader: &SerializedFileReader<R>,
) -> HashSet<String> {
    reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .columns()
        .iter()
        .map(|c| c.path().string())
        .collect()
}

fn days_to_datetime(days: i32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?
        .checked_add_signed(chrono::Duration::days(i64::from(days)))?
        .and_hms_opt(0, 0, 0)
}

fn convert_parquet_field(
    row: usize,
    column: &str,
    data_type: DataType,
    f: &ParquetField,
) -> IngestionResult<Value> {
    if matches!(f, ParquetField::Null) {
        return Ok(Value::Null);
    }

    let parse_error = |message: &str| IngestionError::ParseError {
        row,
        column: column.to_string(),
        raw: f.to_string(),
        message: message.to_string(),
    };

    match data_type {
        DataType::Utf8 => match f {
            ParquetField::Str(s) => Ok(Value::Utf8(s.clone())),
            _ => Ok(Value::Utf8(f.to_string())),
        },
        DataType::Bool => match f {
            ParquetField::Bool(b) => Ok(Value::Bool(*b)),
            _ => Err(parse_error("expected bool")),
        },
        DataType::Int64 => match f {
            ParquetField::Byte(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::Short(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::Int(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::Long(v) => Ok(Value::Int64(*v)),
            ParquetField::UByte(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::UShort(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::UInt(v) => Ok(Value::Int64(i64::from(*v))),
            ParquetField::ULong(v) => i64::try_from(*v)
                .map(Value::Int64)
                .map_err(|_| parse_error("u64 out of range for i64")),
            _ => Err(parse_error("expected integer")),
        },
        DataType::Float64 => match f {
            ParquetField::Float(v) => Ok(Value::Float64(f64::from(*v))),
            ParquetField::Double(v) => Ok(Value::Float64(*v)),
            ParquetField::Int(v) => Ok(Value::Float64(f64::from(*v))),
            ParquetField::Long(v) => Ok(Value::Float64(*v as f64)),
            ParquetField::Decimal(_) => f
                .to_string()
                .parse::<f64>()
                .map(Value::Float64)
                .map_err(|e| parse_error(&e.to_string())),
            _ => Err(parse_error("expected number")),
        },
        DataType::Timestamp => {
            let ts = match f {
                ParquetField::TimestampMillis(ms) => DateTime::from_timestamp_millis(*ms).map(|d| d.naive_utc()),
                ParquetField::TimestampMicros(us) => DateTime::from_timestamp_micros(*us).map(|d| d.naive_utc()),
                ParquetField::Date(days) => days_to_datetime(*days),
                _ => None,
            };
            ts.map(Value::Timestamp).ok_or_else(|| parse_error("expected timestamp"))
        }
        DataType::Categorical => Err(parse_error("categorical columns must be derived with a transform")),
    }
}
