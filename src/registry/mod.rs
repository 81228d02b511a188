//! Dataset lineage registry.
//!
//! The registry owns every loaded or derived table, addressed by an opaque [`DatasetId`]. Each
//! entry keeps the table it started from, the current table and the [`Lineage`] of operations
//! that turned one into the other.
//!
//! Mutation is serialized per dataset: an operation holds its entry's lock from reading the
//! current table until its lineage record is appended, so two concurrent operations on the same
//! dataset never lose an update. Distinct datasets do not contend beyond a short map lookup.
//! A failed operation leaves the table and lineage untouched.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IngestionResult, TransformError, TransformResult, TransformWarning};
use crate::ingestion::{load_table, IngestionOptions, SourceDescriptor, SourceMetadata};
use crate::processing::{
    join, AggregationSpec, CleanOptions, ColumnTransformSpec, FilterCondition, JoinSpec,
    MeltSpec, PivotSpec, Processed, SortSpec,
};
use crate::types::{DataSet, Schema};

pub mod lineage;
pub mod operation;

pub use lineage::{ChangeSummary, Lineage, TransformationRecord};
pub use operation::{Operation, OperationKind};

/// Opaque dataset identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(Uuid);

impl DatasetId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Where a dataset came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatasetSource {
    /// Read through the loader.
    Loaded {
        descriptor: SourceDescriptor,
        metadata: SourceMetadata,
    },
    /// Handed to [`DatasetRegistry::register`] directly.
    InMemory { label: String },
    /// Produced by [`DatasetRegistry::apply_join`]. The inputs are referenced by id only and may
    /// have been removed since.
    Joined {
        left: DatasetId,
        right: DatasetId,
        spec: JoinSpec,
    },
}

#[derive(Debug)]
struct DatasetEntry {
    source: DatasetSource,
    created_at: DateTime<Utc>,
    original: Arc<DataSet>,
    current: Arc<DataSet>,
    lineage: Lineage,
}

impl DatasetEntry {
    fn new(source: DatasetSource, table: DataSet) -> Self {
        let table = Arc::new(table);
        Self {
            source,
            created_at: Utc::now(),
            original: table.clone(),
            current: table,
            lineage: Lineage::default(),
        }
    }
}

/// Point-in-time view of one dataset.
#[derive(Debug, Clone)]
pub struct DatasetSnapshot {
    /// Registry key.
    pub id: DatasetId,
    /// Where the dataset came from.
    pub source: DatasetSource,
    /// When the dataset was registered.
    pub created_at: DateTime<Utc>,
    /// Current table, after every recorded operation.
    pub table: Arc<DataSet>,
    /// Operations applied so far, oldest first.
    pub lineage: Lineage,
}

/// Listing entry returned by [`DatasetRegistry::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    /// Registry key.
    pub id: DatasetId,
    /// Where the dataset came from.
    pub source: DatasetSource,
    /// When the dataset was registered.
    pub created_at: DateTime<Utc>,
    /// Rows in the current table.
    pub row_count: usize,
    /// Columns in the current table.
    pub column_count: usize,
    /// Number of lineage records.
    pub operations: usize,
}

/// Result of a successful operation: the new current table and the record appended for it.
#[derive(Debug, Clone)]
pub struct Applied {
    /// The dataset's new current table.
    pub table: Arc<DataSet>,
    /// Lineage record appended for this operation.
    pub record: TransformationRecord,
}

impl Applied {
    /// Items the operation skipped.
    pub fn warnings(&self) -> &[TransformWarning] {
        &self.record.summary.warnings
    }
}

type EntryHandle = Arc<Mutex<DatasetEntry>>;

fn lock(entry: &EntryHandle) -> MutexGuard<'_, DatasetEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Arena of datasets with per-dataset exclusive mutation.
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    entries: RwLock<HashMap<DatasetId, EntryHandle>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, entry: DatasetEntry) -> DatasetId {
        let id = DatasetId::new();
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(entry)));
        id
    }

    fn handle(&self, id: DatasetId) -> TransformResult<EntryHandle> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| TransformError::DatasetNotFound { id: id.to_string() })
    }

    /// Add an in-memory table.
    pub fn register(&self, label: impl Into<String>, table: DataSet) -> DatasetId {
        let label = label.into();
        let (rows, columns) = (table.row_count(), table.column_count());
        let id = self.insert(DatasetEntry::new(DatasetSource::InMemory { label }, table));
        tracing::info!(dataset = %id, rows, columns, "registered dataset");
        id
    }

    /// Load a table through the loader and register it.
    pub fn load(
        &self,
        descriptor: SourceDescriptor,
        options: &IngestionOptions,
    ) -> IngestionResult<(DatasetId, SourceMetadata)> {
        let (table, metadata) = load_table(&descriptor, options)?;
        let source = DatasetSource::Loaded {
            descriptor,
            metadata: metadata.clone(),
        };
        let id = self.insert(DatasetEntry::new(source, table));
        tracing::info!(
            dataset = %id,
            format = %metadata.format,
            rows = metadata.row_count,
            columns = metadata.column_count,
            "loaded dataset"
        );
        Ok((id, metadata))
    }

    pub fn contains(&self, id: DatasetId) -> bool {
        self.handle(id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of source, current table and lineage, taken under the entry lock.
    pub fn get(&self, id: DatasetId) -> TransformResult<DatasetSnapshot> {
        let handle = self.handle(id)?;
        let entry = lock(&handle);
        Ok(DatasetSnapshot {
            id,
            source: entry.source.clone(),
            created_at: entry.created_at,
            table: entry.current.clone(),
            lineage: entry.lineage.clone(),
        })
    }

    /// Current table.
    pub fn table(&self, id: DatasetId) -> TransformResult<Arc<DataSet>> {
        let handle = self.handle(id)?;
        let table = lock(&handle).current.clone();
        Ok(table)
    }

    /// Current schema.
    pub fn schema(&self, id: DatasetId) -> TransformResult<Schema> {
        Ok(self.table(id)?.schema.clone())
    }

    /// Copy of the dataset's lineage.
    pub fn lineage(&self, id: DatasetId) -> TransformResult<Lineage> {
        let handle = self.handle(id)?;
        let lineage = lock(&handle).lineage.clone();
        Ok(lineage)
    }

    /// Every dataset, oldest first.
    pub fn list(&self) -> Vec<DatasetSummary> {
        let handles: Vec<(DatasetId, EntryHandle)> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, h)| (*id, h.clone()))
            .collect();
        let mut out: Vec<DatasetSummary> = handles
            .into_iter()
            .map(|(id, handle)| {
                let entry = lock(&handle);
                DatasetSummary {
                    id,
                    source: entry.source.clone(),
                    created_at: entry.created_at,
                    row_count: entry.current.row_count(),
                    column_count: entry.current.column_count(),
                    operations: entry.lineage.len(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Drop a dataset. Datasets joined from it keep their own tables.
    pub fn remove(&self, id: DatasetId) -> TransformResult<()> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if removed.is_none() {
            return Err(TransformError::DatasetNotFound { id: id.to_string() });
        }
        tracing::info!(dataset = %id, "removed dataset");
        Ok(())
    }

    /// Apply `operation` to the current table of `id` and append a lineage record.
    ///
    /// On error nothing changes.
    pub fn apply_operation(&self, id: DatasetId, operation: &Operation) -> TransformResult<Applied> {
        let handle = self.handle(id)?;
        let mut entry = lock(&handle);

        let before = entry.current.clone();
        let Processed { dataset, warnings } = operation.apply(&before).inspect_err(|e| {
            tracing::error!(dataset = %id, operation = %operation.kind(), error = %e, "operation failed");
        })?;

        let record = TransformationRecord {
            kind: operation.kind(),
            parameters: operation.parameters(),
            applied_at: Utc::now(),
            summary: ChangeSummary::between(&before, &dataset, warnings),
        };
        let table = Arc::new(dataset);
        entry.current = table.clone();
        entry.lineage.push(record.clone());
        tracing::info!(
            dataset = %id,
            operation = %record.kind,
            rows_before = record.summary.rows_before,
            rows_after = record.summary.rows_after,
            warnings = record.summary.warnings.len(),
            "applied operation"
        );
        Ok(Applied { table, record })
    }

    /// String-keyed form of [`Self::apply_operation`]; see [`Operation::from_config`].
    pub fn apply(&self, id: DatasetId, kind: &str, params: serde_json::Value) -> TransformResult<Applied> {
        let operation = Operation::from_config(kind, params)?;
        self.apply_operation(id, &operation)
    }

    /// Check `operation` against the current schema of `id` without touching the dataset.
    ///
    /// The operation is run over an empty table with the same schema, so configuration and
    /// missing-column errors surface exactly as they would for a real run. The returned table is
    /// empty but carries the output schema, and the warnings are the items a real run would skip.
    pub fn validate(&self, id: DatasetId, operation: &Operation) -> TransformResult<Processed> {
        let schema = self.schema(id)?;
        operation.apply(&DataSet::new(schema, Vec::new()))
    }

    /// Join two datasets into a new dataset. Both inputs are left unchanged.
    ///
    /// Both entries stay locked for the duration of the join, always acquired in id order.
    pub fn apply_join(
        &self,
        left: DatasetId,
        right: DatasetId,
        spec: &JoinSpec,
    ) -> TransformResult<(DatasetId, Processed)> {
        let left_handle = self.handle(left)?;
        let right_handle = self.handle(right)?;

        let (left_table, right_table) = if left == right {
            let table = lock(&left_handle).current.clone();
            (table.clone(), table)
        } else {
            let (first, second) = if left < right {
                (&left_handle, &right_handle)
            } else {
                (&right_handle, &left_handle)
            };
            let first = lock(first);
            let second = lock(second);
            if left < right {
                (first.current.clone(), second.current.clone())
            } else {
                (second.current.clone(), first.current.clone())
            }
        };

        let processed = join(&left_table, &right_table, spec)?;
        let source = DatasetSource::Joined {
            left,
            right,
            spec: spec.clone(),
        };
        let id = self.insert(DatasetEntry::new(source, processed.dataset.clone()));
        tracing::info!(
            dataset = %id,
            %left,
            %right,
            how = spec.how.name(),
            rows = processed.dataset.row_count(),
            "joined datasets"
        );
        Ok((id, processed))
    }

    /// Re-run the recorded lineage of `id` from its starting table.
    ///
    /// Every operation is deterministic, so the result equals the current table.
    pub fn replay(&self, id: DatasetId) -> TransformResult<DataSet> {
        let (original, lineage) = {
            let handle = self.handle(id)?;
            let entry = lock(&handle);
            (entry.original.clone(), entry.lineage.clone())
        };
        let mut table = (*original).clone();
        for record in &lineage {
            let operation = Operation::from_config(record.kind.name(), record.parameters.clone())?;
            table = operation.apply(&table)?.dataset;
        }
        tracing::debug!(dataset = %id, operations = lineage.len(), "replayed lineage");
        Ok(table)
    }

    pub fn apply_filter(&self, id: DatasetId, conditions: Vec<FilterCondition>) -> TransformResult<Applied> {
        self.apply_operation(id, &Operation::Filter(conditions))
    }

    pub fn apply_aggregate(&self, id: DatasetId, spec: AggregationSpec) -> TransformResult<Applied> {
        self.apply_operation(id, &Operation::Aggregate(spec))
    }

    pub fn apply_pivot(&self, id: DatasetId, spec: PivotSpec) -> TransformResult<Applied> {
        self.apply_operation(id, &Operation::Pivot(spec))
    }

    pub fn apply_melt(&self, id: DatasetId, spec: MeltSpec) -> TransformResult<Applied> {
        self.apply_operation(id, &Operation::Melt(spec))
    }

    pub fn apply_sort(&self, id: DatasetId, spec: SortSpec) -> TransformResult<Applied> {
        self.apply_operation(id, &Operation::Sort(spec))
    }

    pub fn apply_clean(&self, id: DatasetId, options: CleanOptions) -> TransformResult<Applied> {
        self.apply_operation(id, &Operation::Clean(options))
    }

    pub fn apply_column_transform(
        &self,
        id: DatasetId,
        transformations: Vec<(String, ColumnTransformSpec)>,
    ) -> TransformResult<Applied> {
        self.apply_operation(id, &Operation::Transform(transformations))
    }
}
