// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Command Pattern: every write made inside a transaction is recorded as a
// Change. The log is replayed onto committed tables at COMMIT and simply
// dropped at ROLLBACK.
//
// ============================================================================

use crate::core::RecordId;
use crate::storage::StoredRow;

/// A single staged write
#[derive(Debug, Clone)]
pub enum Change {
    /// Insert a row whose identity was already allocated
    InsertRow { table: String, row: StoredRow },

    /// Replace a row, provided it is still at `expected_version`
    UpdateRow {
        table: String,
        row: StoredRow,
        expected_version: u64,
    },

    /// Physically remove a row
    DeleteRow { table: String, id: RecordId },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    /// Identity of the row affected by this change
    pub fn row_id(&self) -> RecordId {
        match self {
            Change::InsertRow { row, .. } => row.id,
            Change::UpdateRow { row, .. } => row.id,
            Change::DeleteRow { id, .. } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RecordMeta;

    #[test]
    fn test_change_table_name() {
        let mut meta = RecordMeta::new();
        meta.id = Some(RecordId(5));
        let change = Change::InsertRow {
            table: "users".to_string(),
            row: StoredRow::new(&meta, serde_json::json!({}), 1),
        };
        assert_eq!(change.table_name(), "users");
        assert_eq!(change.row_id(), RecordId(5));
    }

    #[test]
    fn test_delete_change_row_id() {
        let change = Change::DeleteRow {
            table: "entities".to_string(),
            id: RecordId(2),
        };
        assert_eq!(change.table_name(), "entities");
        assert_eq!(change.row_id(), RecordId(2));
    }
}
