use super::{OrderBy, OrderKey, Predicate, StoredRow};
use crate::core::{LedgerError, RecordId, Result};
use crate::transaction::Change;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Committed rows of one table plus its identity sequence.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    rows: BTreeMap<RecordId, StoredRow>,
    next_id: u64,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand out the next identity. Allocated ids are never reused.
    pub fn allocate_id(&mut self) -> RecordId {
        let id = RecordId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn get(&self, id: RecordId) -> Option<&StoredRow> {
        self.rows.get(&id)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn scan(&self, predicate: &Predicate, order: &OrderBy) -> Vec<StoredRow> {
        let mut rows: Vec<StoredRow> = self
            .rows
            .values()
            .filter(|row| predicate.matches(row))
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            let ordering = match &order.key {
                OrderKey::Id => a.id.cmp(&b.id),
                OrderKey::Field(name) => {
                    compare_json(a.field(name), b.field(name)).then(a.id.cmp(&b.id))
                }
            };
            if order.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        rows
    }

    /// Layer a staged change over this copy without version checks, giving a
    /// connection a read-your-writes view of its own transaction.
    pub fn overlay(&mut self, change: &Change) {
        match change {
            Change::InsertRow { row, .. } | Change::UpdateRow { row, .. } => {
                self.rows.insert(row.id, row.clone());
            }
            Change::DeleteRow { id, .. } => {
                self.rows.remove(id);
            }
        }
    }

    /// Apply a staged change, enforcing optimistic versions.
    pub fn apply(&mut self, change: &Change) -> Result<()> {
        match change {
            Change::InsertRow { row, .. } => {
                self.rows.insert(row.id, row.clone());
                Ok(())
            }
            Change::UpdateRow {
                row,
                expected_version,
                ..
            } => {
                let current = self.rows.get(&row.id).ok_or_else(|| LedgerError::RowNotFound {
                    table: self.name.clone(),
                    id: row.id,
                })?;
                if current.version != *expected_version {
                    return Err(LedgerError::WriteConflict {
                        table: self.name.clone(),
                        id: row.id,
                    });
                }
                self.rows.insert(row.id, row.clone());
                Ok(())
            }
            Change::DeleteRow { id, .. } => {
                if self.rows.remove(id).is_none() {
                    return Err(LedgerError::RowNotFound {
                        table: self.name.clone(),
                        id: *id,
                    });
                }
                Ok(())
            }
        }
    }
}

/// Total order over JSON scalars: missing < null < bool < number < string < other.
fn compare_json(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    use serde_json::Value;

    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) if rank(a) == 5 && rank(b) == 5 => x.to_string().cmp(&y.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}
