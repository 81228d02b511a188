//! CSV ingestion implementation.

use std::io::Read;
use std::path::Path;

use crate::coercion::parse_cell;
use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataSet, Schema, Value};

use super::infer::{normalize_headers, table_from_text};

fn reader_from_path(path: impl AsRef<Path>) -> IngestionResult<csv::Reader<std::fs::File>> {
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?)
}

/// Ingest a CSV file using an explicit schema.
///
/// Rules:
///
/// - CSV must have headers.
/// - Headers must contain all schema fields (order can differ; extra columns are ignored).
/// - Each value is parsed according to the schema field type; empty cells are null.
pub fn ingest_csv_from_path(path: impl AsRef<Path>, schema: &Schema) -> IngestionResult<DataSet> {
    let mut rdr = reader_from_path(path)?;
    ingest_csv_from_reader(&mut rdr, schema)
}

/// Ingest CSV data from an existing CSV reader using an explicit schema.
pub fn ingest_csv_from_reader<R: Read>(
    rdr: &mut csv::Reader<R>,
    schema: &Schema,
) -> IngestionResult<DataSet> {
    let headers = rdr.headers()?.clone();

    // Map schema fields -> CSV column indexes (allows re-ordered CSV columns).
    let mut col_idxs = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        match headers.iter().position(|h| h.trim() == field.name) {
            Some(idx) => col_idxs.push(idx),
            None => {
                return Err(IngestionError::SchemaMismatch {
                    message: format!(
                        "missing required column '{field}'. headers={:?}",
                        headers.iter().collect::<Vec<_>>(),
                        field = field.name
                    ),
                });
            }
        }
    }

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for (row_idx0, result) in rdr.records().enumerate() {
        // 1-based, and the header is row 1.
        let user_row = row_idx0 + 2;
        let record = result?;

        let mut row: Vec<Value> = Vec::with_capacity(schema.fields.len());
        for (field, &csv_idx) in schema.fields.iter().zip(col_idxs.iter()) {
            let raw = record.get(csv_idx).unwrap_or("");
            let value = parse_cell(raw, field.data_type).map_err(|message| IngestionError::ParseError {
                row: user_row,
                column: field.name.clone(),
                raw: raw.to_owned(),
                message,
            })?;
            row.push(value);
        }
        rows.push(row);
    }

    Ok(DataSet::new(schema.clone(), rows))
}

/// Ingest a CSV file, inferring column types from the data.
pub fn infer_csv_from_path(path: impl AsRef<Path>) -> IngestionResult<DataSet> {
    let mut rdr = reader_from_path(path)?;
    infer_csv_from_reader(&mut rdr)
}

/// Ingest CSV data from an existing reader, inferring column types from the data.
///
/// A column is typed `int64`, `float64`, `bool` or `timestamp` when every non-empty cell parses
/// as that type, and `utf8` otherwise.
pub fn infer_csv_from_reader<R: Read>(rdr: &mut csv::Reader<R>) -> IngestionResult<DataSet> {
    let headers = normalize_headers(rdr.headers()?.iter())?;
    let records = rdr
        .records()
        .map(|r| r.map(|rec| rec.iter().map(str::to_owned).collect::<Vec<_>>()))
        .collect::<Result<Vec<_>, _>>()?;
    table_from_text(headers, &records, 2)
}
