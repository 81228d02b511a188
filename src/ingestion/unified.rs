//! Unified loader entry point.
//!
//! Most callers should use [`load_table`], which reads a [`SourceDescriptor`] into an in-memory
//! [`crate::types::DataSet`] and describes what it read in a [`SourceMetadata`].
//!
//! - If [`IngestionOptions::format`] is `None`, the format of a file is inferred from its
//!   extension.
//! - If [`IngestionOptions::schema`] is `None`, column types are inferred from the data.
//! - If an [`super::observability::IngestionObserver`] is provided, success/failure/alerts are
//!   reported to it.

use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataSet, DataType, Field, Schema};

use super::observability::{IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats};
use super::{csv, json, parquet};

/// Supported ingestion formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionFormat {
    /// Comma-separated values.
    Csv,
    /// JSON document or NDJSON.
    Json,
    /// Apache Parquet.
    Parquet,
    /// Spreadsheet/workbook formats (feature-gated behind `excel`).
    Excel,
}

impl IngestionFormat {
    /// Parse an ingestion format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "json" | "ndjson" | "jsonl" => Some(Self::Json),
            "parquet" | "pq" => Some(Self::Parquet),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Some(Self::Excel),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Parquet => "parquet",
            Self::Excel => "excel",
        }
    }
}

impl fmt::Display for IngestionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How to choose sheet(s) when ingesting an Excel workbook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExcelSheetSelection {
    /// Ingest the first sheet (default).
    #[default]
    First,
    /// Ingest a single named sheet.
    Sheet(String),
    /// Ingest all sheets and concatenate rows.
    AllSheets,
    /// Ingest only the listed sheets (in order) and concatenate rows.
    Sheets(Vec<String>),
}

/// What to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    /// A file on the local filesystem.
    File { path: PathBuf },
    /// JSON text supplied by the caller.
    InlineJson { text: String },
}

impl SourceDescriptor {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn inline_json(text: impl Into<String>) -> Self {
        Self::InlineJson { text: text.into() }
    }

    fn label(&self) -> String {
        match self {
            Self::File { path } => path.display().to_string(),
            Self::InlineJson { text } => format!("<inline json, {} bytes>", text.len()),
        }
    }
}

/// Kind of source a table was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    File,
    Inline,
}

/// Description of a loaded table, used to check transform configurations up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source_type: SourceType,
    pub format: IngestionFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<String>,
    /// Column name → type, in column order.
    #[serde(with = "crate::processing::ordered_map")]
    pub dtypes: Vec<(String, DataType)>,
}

impl SourceMetadata {
    fn describe(descriptor: &SourceDescriptor, format: IngestionFormat, ds: &DataSet) -> Self {
        let (source_type, path, file_size_bytes) = match descriptor {
            SourceDescriptor::File { path } => (
                SourceType::File,
                Some(path.clone()),
                fs::metadata(path).ok().map(|m| m.len()),
            ),
            SourceDescriptor::InlineJson { .. } => (SourceType::Inline, None, None),
        };
        Self {
            source_type,
            format,
            path,
            file_size_bytes,
            row_count: ds.row_count(),
            column_count: ds.column_count(),
            columns: ds.schema.field_names().map(str::to_string).collect(),
            dtypes: ds
                .schema
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.data_type))
                .collect(),
        }
    }

    /// Type of `column`, if the table has it.
    pub fn dtype(&self, column: &str) -> Option<DataType> {
        self.dtypes.iter().find(|(c, _)| c == column).map(|(_, t)| *t)
    }

    /// The loaded table's schema.
    pub fn schema(&self) -> Schema {
        Schema::new(self.dtypes.iter().map(|(c, t)| Field::new(c.clone(), *t)).collect())
    }
}

/// Options controlling loader behavior.
///
/// Use [`Default`] for common cases.
#[derive(Clone)]
pub struct IngestionOptions {
    /// If `None`, auto-detect format from file extension.
    pub format: Option<IngestionFormat>,
    /// If `None`, infer column types from the data.
    pub schema: Option<Schema>,
    /// Excel-specific options.
    pub excel_sheet_selection: ExcelSheetSelection,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn IngestionObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: IngestionSeverity,
}

impl fmt::Debug for IngestionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionOptions")
            .field("format", &self.format)
            .field("schema_fields", &self.schema.as_ref().map(Schema::len))
            .field("excel_sheet_selection", &self.excel_sheet_selection)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            format: None,
            schema: None,
            excel_sheet_selection: ExcelSheetSelection::default(),
            observer: None,
            alert_at_or_above: IngestionSeverity::Critical,
        }
    }
}

/// Load a table and describe it.
///
/// Inline JSON is always read as JSON. For files, `options.format` wins over the extension.
///
/// When an observer is configured, this function reports:
///
/// - `on_success` on success, with row/column counts
/// - `on_failure` on failure, with a computed severity
/// - `on_alert` on failure when the computed severity is >= `options.alert_at_or_above`
///
/// # Examples
///
/// ```no_run
/// use tabular_transforms::ingestion::{load_table, IngestionOptions, SourceDescriptor};
///
/// # fn main() -> Result<(), tabular_transforms::IngestionError> {
/// let (table, meta) = load_table(&SourceDescriptor::file("sales.csv"), &IngestionOptions::default())?;
/// println!("rows={} dtypes={:?}", table.row_count(), meta.dtypes);
/// # Ok(())
/// # }
/// ```
///
/// ```
/// use tabular_transforms::ingestion::{load_table, IngestionOptions, SourceDescriptor};
/// use tabular_transforms::types::DataType;
///
/// let source = SourceDescriptor::inline_json(r#"[{"region": "north", "sales": 10}]"#);
/// let (table, meta) = load_table(&source, &IngestionOptions::default()).unwrap();
/// assert_eq!(table.row_count(), 1);
/// assert_eq!(meta.dtype("sales"), Some(DataType::Int64));
/// ```
pub fn load_table(
    descriptor: &SourceDescriptor,
    options: &IngestionOptions,
) -> IngestionResult<(DataSet, SourceMetadata)> {
    let format = match descriptor {
        SourceDescriptor::File { path } => match options.format {
            Some(f) => f,
            None => infer_format_from_path(path)?,
        },
        SourceDescriptor::InlineJson { .. } => IngestionFormat::Json,
    };

    let ctx = IngestionContext {
        source: descriptor.label(),
        format,
    };

    let result = check_schema(options.schema.as_ref()).and_then(|()| read_source(descriptor, format, options));

    if let Some(obs) = options.observer.as_ref() {
        match &result {
            Ok(ds) => obs.on_success(
                &ctx,
                IngestionStats {
                    rows: ds.row_count(),
                    columns: ds.column_count(),
                },
            ),
            Err(e) => {
                let sev = severity_for_error(e);
                obs.on_failure(&ctx, sev, e);
                if sev >= options.alert_at_or_above {
                    obs.on_alert(&ctx, sev, e);
                }
            }
        }
    }

    let ds = result?;
    let metadata = SourceMetadata::describe(descriptor, format, &ds);
    Ok((ds, metadata))
}

/// Load a file, discarding the metadata.
pub fn ingest_from_path(path: impl AsRef<Path>, options: &IngestionOptions) -> IngestionResult<DataSet> {
    load_table(&SourceDescriptor::file(path.as_ref()), options).map(|(ds, _)| ds)
}

fn check_schema(schema: Option<&Schema>) -> IngestionResult<()> {
    let Some(schema) = schema else {
        return Ok(());
    };
    for (i, field) in schema.fields.iter().enumerate() {
        if schema.fields[..i].iter().any(|f| f.name == field.name) {
            return Err(IngestionError::SchemaMismatch {
                message: format!("schema lists column '{}' twice", field.name),
            });
        }
    }
    Ok(())
}

fn read_source(
    descriptor: &SourceDescriptor,
    format: IngestionFormat,
    options: &IngestionOptions,
) -> IngestionResult<DataSet> {
    let schema = options.schema.as_ref();
    let path = match descriptor {
        SourceDescriptor::InlineJson { text } => {
            return match schema {
                Some(s) => json::ingest_json_from_str(text, s),
                None => json::infer_json_from_str(text),
            };
        }
        SourceDescriptor::File { path } => path.as_path(),
    };

    match (format, schema) {
        (IngestionFormat::Csv, Some(s)) => csv::ingest_csv_from_path(path, s),
        (IngestionFormat::Csv, None) => csv::infer_csv_from_path(path),
        (IngestionFormat::Json, Some(s)) => json::ingest_json_from_path(path, s),
        (IngestionFormat::Json, None) => json::infer_json_from_path(path),
        (IngestionFormat::Parquet, Some(s)) => parquet::ingest_parquet_from_path(path, s),
        (IngestionFormat::Parquet, None) => parquet::infer_parquet_from_path(path),
        (IngestionFormat::Excel, _) => ingest_excel_dispatch(path, schema, &options.excel_sheet_selection),
    }
}

pub(crate) fn severity_for_error(e: &IngestionError) -> IngestionSeverity {
    match e {
        IngestionError::Io(_) => IngestionSeverity::Critical,
        IngestionError::Parquet(err) => {
            // Parquet errors may wrap IO without a structured variant; look through the chain.
            if error_chain_contains_io(err) {
                IngestionSeverity::Critical
            } else {
                IngestionSeverity::Error
            }
        }
        IngestionError::Csv(err) => match err.kind() {
            ::csv::ErrorKind::Io(_) => IngestionSeverity::Critical,
            _ => IngestionSeverity::Error,
        },
        IngestionError::Json(err) if err.is_io() => IngestionSeverity::Critical,
        IngestionError::Json(_) => IngestionSeverity::Error,
        #[cfg(feature = "excel")]
        IngestionError::Excel(_) => IngestionSeverity::Error,
        IngestionError::SchemaMismatch { .. } => IngestionSeverity::Error,
        IngestionError::ParseError { .. } => IngestionSeverity::Error,
    }
}

fn error_chain_contains_io(e: &(dyn StdError + 'static)) -> bool {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(e);
    while let Some(err) = cur {
        if err.is::<std::io::Error>() {
            return true;
        }
        cur = err.source();
    }
    false
}

fn infer_format_from_path(path: &Path) -> IngestionResult<IngestionFormat> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| IngestionError::SchemaMismatch {
            message: format!("cannot infer format: path has no extension ({})", path.display()),
        })?;

    IngestionFormat::from_extension(ext).ok_or_else(|| IngestionError::SchemaMismatch {
        message: format!(
            "cannot infer format from extension '{ext}' for path ({})",
            path.display()
        ),
    })
}

fn ingest_excel_dispatch(
    path: &Path,
    schema: Option<&Schema>,
    sel: &ExcelSheetSelection,
) -> IngestionResult<DataSet> {
    #[cfg(feature = "excel")]
    {
        use super::excel::ingest_excel_from_path;

        match sel {
            ExcelSheetSelection::First => ingest_excel_from_path(path, None, schema),
            ExcelSheetSelection::Sheet(name) => ingest_excel_from_path(path, Some(&[name.as_str()]), schema),
            ExcelSheetSelection::AllSheets => ingest_excel_from_path(path, Some(&[]), schema),
            ExcelSheetSelection::Sheets(names) => {
                let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                ingest_excel_from_path(path, Some(refs.as_slice()), schema)
            }
        }
    }

    #[cfg(not(feature = "excel"))]
    {
        let _ = (path, schema, sel);
        Err(IngestionError::SchemaMismatch {
            message: "excel ingestion not enabled (enable cargo feature 'excel')".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{infer_format_from_path, severity_for_error, IngestionFormat};
    use crate::error::IngestionError;
    use crate::ingestion::IngestionSeverity;

    #[test]
    fn format_from_extension() {
        assert_eq!(infer_format_from_path(Path::new("a/b.CSV")).unwrap(), IngestionFormat::Csv);
        assert_eq!(infer_format_from_path(Path::new("x.jsonl")).unwrap(), IngestionFormat::Json);
        assert!(infer_format_from_path(Path::new("noext")).is_err());
        assert!(infer_format_from_path(Path::new("x.txt")).is_err());
    }

    #[test]
    fn io_errors_are_critical() {
        let io = IngestionError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(severity_for_error(&io), IngestionSeverity::Critical);
        let schema = IngestionError::SchemaMismatch { message: "x".into() };
        assert_eq!(severity_for_error(&schema), IngestionSeverity::Error);
    }
}
