//! Lineage records: what was applied to a dataset, when, and what it changed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransformWarning;
use crate::types::DataSet;

use super::operation::OperationKind;

/// Row/column counts before and after one operation, plus any skipped items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Rows in the input table.
    pub rows_before: usize,
    /// Rows in the output table.
    pub rows_after: usize,
    /// Columns in the input table.
    pub columns_before: usize,
    /// Columns in the output table.
    pub columns_after: usize,
    /// Items the operation skipped instead of failing on.
    #[serde(default)]
    pub warnings: Vec<TransformWarning>,
}

impl ChangeSummary {
    pub(crate) fn between(
        before: &DataSet,
        after: &DataSet,
        warnings: Vec<TransformWarning>,
    ) -> Self {
        Self {
            rows_before: before.row_count(),
            rows_after: after.row_count(),
            columns_before: before.column_count(),
            columns_after: after.column_count(),
            warnings,
        }
    }
}

/// One successfully applied operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationRecord {
    /// Operation family.
    pub kind: OperationKind,
    /// The configuration the operation ran with, in its canonical serialized form.
    pub parameters: serde_json::Value,
    /// When the operation was committed.
    pub applied_at: DateTime<Utc>,
    /// What the operation changed.
    pub summary: ChangeSummary,
}

/// Append-only, ordered history of the operations applied to one dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lineage {
    records: Vec<TransformationRecord>,
}

impl Lineage {
    pub(crate) fn push(&mut self, record: TransformationRecord) {
        self.records.push(record);
    }

    /// Records in application order.
    pub fn records(&self) -> &[TransformationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Most recent record, if any.
    pub fn last(&self) -> Option<&TransformationRecord> {
        self.records.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransformationRecord> {
        self.records.iter()
    }
}

impl<'a> IntoIterator for &'a Lineage {
    type Item = &'a TransformationRecord;
    type IntoIter = std::slice::Iter<'a, TransformationRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::{ChangeSummary, Lineage, TransformationRecord};
    use crate::registry::operation::OperationKind;

    #[test]
    fn lineage_serializes_as_a_plain_list() {
        let mut lineage = Lineage::default();
        lineage.push(TransformationRecord {
            kind: OperationKind::Sort,
            parameters: json!({"by": "a", "ascending": true}),
            applied_at: Utc::now(),
            summary: ChangeSummary {
                rows_before: 3,
                rows_after: 3,
                columns_before: 2,
                columns_after: 2,
                warnings: Vec::new(),
            },
        });
        let value = serde_json::to_value(&lineage).unwrap();
        assert_eq!(value[0]["kind"], "sort");
        assert_eq!(value[0]["summary"]["rows_after"], 3);

        let back: Lineage = serde_json::from_value(value).unwrap();
        assert_eq!(back, lineage);
    }
}
