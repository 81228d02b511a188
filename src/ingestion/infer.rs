//! Schema inference for sources that only provide text cells (CSV, spreadsheets).

use crate::coercion::{infer_data_type, parse_cell};
use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataSet, Field, Schema};

/// Header names with blanks replaced by `column_<n>` (1-based). Duplicates are rejected.
pub(crate) fn normalize_headers<I, S>(headers: I) -> IngestionResult<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut names: Vec<String> = Vec::new();
    for (i, h) in headers.into_iter().enumerate() {
        let h = h.as_ref().trim();
        let name = if h.is_empty() {
            format!("column_{}", i + 1)
        } else {
            h.to_string()
        };
        if names.contains(&name) {
            return Err(IngestionError::SchemaMismatch {
                message: format!("duplicate column '{name}' in header"),
            });
        }
        names.push(name);
    }
    Ok(names)
}

fn cell(record: &[String], idx: usize) -> &str {
    record.get(idx).map(String::as_str).unwrap_or("")
}

/// Build a table from a header and raw text records, inferring one type per column.
///
/// Short records are padded with empty (null) cells. `first_row` is the user-facing number of
/// the first record, used in parse errors.
pub(crate) fn table_from_text(
    headers: Vec<String>,
    records: &[Vec<String>],
    first_row: usize,
) -> IngestionResult<DataSet> {
    let fields: Vec<Field> = headers
        .into_iter()
        .enumerate()
        .map(|(idx, name)| {
            let data_type = infer_data_type(records.iter().map(|r| cell(r, idx)));
            Field::new(name, data_type)
        })
        .collect();

    let mut rows = Vec::with_capacity(records.len());
    for (offset, record) in records.iter().enumerate() {
        let row = fields
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                let raw = cell(record, idx);
                parse_cell(raw, field.data_type).map_err(|message| IngestionError::ParseError {
                    row: first_row + offset,
                    column: field.name.clone(),
                    raw: raw.to_string(),
                    message,
                })
            })
            .collect::<IngestionResult<Vec<_>>>()?;
        rows.push(row);
    }

    tracing::debug!(
        columns = fields.len(),
        rows = rows.len(),
        "inferred schema from text cells"
    );
    Ok(DataSet::new(Schema::new(fields), rows))
}
