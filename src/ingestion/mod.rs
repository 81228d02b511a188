//! Loader: reads source files (or inline JSON) into in-memory tables.
//!
//! Most callers should use [`load_table`] (from [`unified`]) which:
//!
//! - auto-detects format by file extension (or you can override via [`IngestionOptions`])
//! - uses an explicit schema when given one, and infers column types otherwise
//! - returns the table together with its [`SourceMetadata`]
//! - optionally reports success/failure/alerts to an [`IngestionObserver`]
//!
//! Format-specific functions are also available under:
//! - [`csv`]
//! - [`json`]
//! - [`parquet`]
//! - `excel` (feature `excel`)

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
mod infer;
pub mod json;
pub mod observability;
pub mod parquet;
pub mod unified;

pub use observability::{
    CompositeObserver, FileObserver, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats,
    TracingObserver,
};
pub use unified::{
    ingest_from_path, load_table, ExcelSheetSelection, IngestionFormat, IngestionOptions, SourceDescriptor,
    SourceMetadata, SourceType,
};
