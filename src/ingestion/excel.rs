#![cfg(feature = "excel")]

//! Spreadsheet ingestion (`.xlsx`, `.xls`, `.ods`, ...), behind the `excel` feature.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use crate::coercion::{parse_bool, parse_datetime};
use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataSet, DataType, Schema, Value};

use super::infer::{normalize_headers, table_from_text};

/// Ingest sheets from a workbook and concatenate their rows.
///
/// - `sheet_names` of `None` means the first sheet only; `Some(&[])` means every sheet.
/// - The first non-empty row of each sheet is its header row.
/// - With a `schema`, every schema field must appear in every header. Without one, all sheets
///   must share the first sheet's header and column types are inferred from the cell text.
pub fn ingest_excel_from_path(
    path: impl AsRef<Path>,
    sheet_names: Option<&[&str]>,
    schema: Option<&Schema>,
) -> IngestionResult<DataSet> {
    let mut workbook = open_workbook_auto(path)?;

    let available = workbook.sheet_names().to_vec();
    let sheets: Vec<String> = match sheet_names {
        None => available.into_iter().take(1).collect(),
        Some([]) => available,
        Some(names) => names.iter().map(|s| s.to_string()).collect(),
    };
    if sheets.is_empty() {
        return Err(IngestionError::SchemaMismatch {
            message: "workbook has no sheets".to_string(),
        });
    }

    let mut ranges = Vec::with_capacity(sheets.len());
    for sheet in &sheets {
        ranges.push((sheet.as_str(), workbook.worksheet_range(sheet)?));
    }

    match schema {
        Some(schema) => {
            let mut all_rows: Vec<Vec<Value>> = Vec::new();
            for (sheet, range) in &ranges {
                let mut rows = ingest_sheet_range(sheet, range, schema)?;
                all_rows.append(&mut rows);
            }
            Ok(DataSet::new(schema.clone(), all_rows))
        }
        None => infer_sheets(&ranges),
    }
}

/// Header row index and header text of a sheet.
fn find_header(sheet: &str, range: &calamine::Range<Data>) -> IngestionResult<(usize, Vec<String>)> {
    range
        .rows()
        .enumerate()
        .find(|(_, row)| row.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|(idx, row)| (idx, row.iter().map(cell_to_string).collect()))
        .ok_or_else(|| IngestionError::SchemaMismatch {
            message: format!("sheet '{sheet}': no non-empty rows (no header row found)"),
        })
}

fn infer_sheets(ranges: &[(&str, calamine::Range<Data>)]) -> IngestionResult<DataSet> {
    let mut headers: Option<Vec<String>> = None;
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut first_row = 2;
    for (sheet, range) in ranges {
        let (header_idx, header) = find_header(sheet, range)?;
        let header = normalize_headers(header)?;
        match &headers {
            None => {
                first_row = header_idx + 2;
                headers = Some(header);
            }
            Some(expected) if *expected != header => {
                return Err(IngestionError::SchemaMismatch {
                    message: format!("sheet '{sheet}': header {header:?} differs from {expected:?}"),
                });
            }
            Some(_) => {}
        }
        records.extend(
            range
                .rows()
                .skip(header_idx + 1)
                .map(|row| row.iter().map(cell_to_string).collect()),
        );
    }
    table_from_text(headers.unwrap_or_default(), &records, first_row)
}

fn ingest_sheet_range(
    sheet: &str,
    range: &calamine::Range<Data>,
    schema: &Schema,
) -> IngestionResult<Vec<Vec<Value>>> {
    let (header_row_idx, header_cells) = find_header(sheet, range)?;

    let mut col_idxs: Vec<usize> = Vec::with_capacity(schema.fields.len());
    for f in &schema.fields {
        match header_cells.iter().position(|h| h.trim() == f.name) {
            Some(idx) => col_idxs.push(idx),
            None => {
                return Err(IngestionError::SchemaMismatch {
                    message: format!(
                        "sheet '{sheet}': missing required column '{}'. headers={:?}",
                        f.name, header_cells
                    ),
                });
            }
        }
    }

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for (idx0, row) in range.rows().enumerate().skip(header_row_idx + 1) {
        // 1-based, as shown by spreadsheet tools.
        let user_row = idx0 + 1;

        let mut out_row: Vec<Value> = Vec::with_capacity(schema.fields.len());
        for (field, &col_idx) in schema.fields.iter().zip(col_idxs.iter()) {
            let cell = row.get(col_idx).unwrap_or(&Data::Empty);
            let col_label = format!("{sheet}:{name}", name = field.name);
            out_row.push(convert_cell(user_row, &col_label, field.data_type, cell)?);
        }
        rows.push(out_row);
    }
    Ok(rows)
}

fn cell_to_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => (*f as i64).to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
        Data::Empty => String::new(),
        _ => c.to_string(),
    }
}

fn convert_cell(row: usize, column: &str, data_type: DataType, c: &Data) -> IngestionResult<Value> {
    if matches!(c, Data::Empty) {
        return Ok(Value::Null);
    }

    let parse_error = |message: &str| IngestionError::ParseError {
        row,
        column: column.to_string(),
        raw: c.to_string(),
        message: message.to_string(),
    };

    match data_type {
        DataType::Utf8 => Ok(Value::Utf8(cell_to_string(c))),
        DataType::Bool => match c {
            Data::Bool(b) => Ok(Value::Bool(*b)),
            Data::Int(i) => Ok(Value::Bool(*i != 0)),
            Data::Float(f) => Ok(Value::Bool(*f != 0.0)),
            Data::String(s) => parse_bool(s)
                .map(Value::Bool)
                .ok_or_else(|| parse_error("expected bool (true/false/1/0/yes/no)")),
            _ => Err(parse_error("expected bool")),
        },
        DataType::Int64 => match c {
            Data::Int(i) => Ok(Value::Int64(*i)),
            Data::Float(f) if f.fract() == 0.0 => Ok(Value::Int64(*f as i64)),
            Data::Float(_) => Err(parse_error("expected integer (got non-integer float)")),
            Data::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|e| parse_error(&e.to_string())),
            _ => Err(parse_error("expected integer")),
        },
        DataType::Float64 => match c {
            Data::Float(f) => Ok(Value::Float64(*f)),
            Data::Int(i) => Ok(Value::Float64(*i as f64)),
            Data::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float64)
                .map_err(|e| parse_error(&e.to_string())),
            _ => Err(parse_error("expected number")),
        },
        DataType::Timestamp => parse_datetime(&cell_to_string(c), None)
            .map(Value::Timestamp)
            .ok_or_else(|| parse_error("expected a date or datetime")),
        DataType::Categorical => Err(parse_error("categorical columns must be derived with a transform")),
    }
}

#[cfg(test)]
mod tests {
    use calamine::{Data, Range};

    use super::{infer_sheets, ingest_sheet_range};
    use crate::error::IngestionError;
    use crate::types::{DataType, Field, Schema, Value};

    fn people_range(header: [&str; 3]) -> Range<Data> {
        let mut range = Range::new((0, 0), (2, 2));
        for (c, h) in header.iter().enumerate() {
            range.set_value((0, c as u32), Data::String(h.to_string()));
        }
        range.set_value((1, 0), Data::Float(1.0));
        range.set_value((1, 1), Data::String("Ada".to_string()));
        range.set_value((1, 2), Data::Float(98.5));
        range.set_value((2, 0), Data::Float(2.0));
        range.set_value((2, 1), Data::String("Grace".to_string()));
        range.set_value((2, 2), Data::Empty);
        range
    }

    #[test]
    fn infers_types_across_sheets() {
        let ranges = [
            ("Q1", people_range(["id", "name", "score"])),
            ("Q2", people_range(["id", "name", "score"])),
        ];
        let ds = infer_sheets(&ranges).unwrap();
        assert_eq!(
            ds.schema,
            Schema::new(vec![
                Field::new("id", DataType::Int64),
                Field::new("name", DataType::Utf8),
                Field::new("score", DataType::Float64),
            ])
        );
        assert_eq!(ds.row_count(), 4);
        assert_eq!(ds.rows[1], vec![Value::Int64(2), Value::from("Grace"), Value::Null]);
    }

    #[test]
    fn sheets_with_different_headers_are_rejected() {
        let ranges = [
            ("Q1", people_range(["id", "name", "score"])),
            ("Q2", people_range(["id", "name", "points"])),
        ];
        assert!(matches!(infer_sheets(&ranges), Err(IngestionError::SchemaMismatch { .. })));
    }

    #[test]
    fn explicit_schema_selects_columns() {
        let schema = Schema::new(vec![
            Field::new("score", DataType::Float64),
            Field::new("id", DataType::Int64),
        ]);
        let rows = ingest_sheet_range("Q1", &people_range(["id", "name", "score"]), &schema).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Float64(98.5), Value::Int64(1)],
                vec![Value::Null, Value::Int64(2)],
            ]
        );
    }
}
