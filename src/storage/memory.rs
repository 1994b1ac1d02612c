use super::{OrderBy, Predicate, Storage, StoredRow, Table};
use crate::core::{LedgerError, RecordId, Result};
use crate::transaction::{Change, Transaction, TransactionId};
use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared in-memory store. Cheap to clone; every clone sees the same tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection with its own transaction scope.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            store: self.clone(),
            transaction: None,
        }
    }

    pub async fn table_exists(&self, name: &str) -> bool {
        self.tables.read().await.contains_key(name)
    }

    /// Committed row count, regardless of deletion state.
    pub async fn row_count(&self, table: &str) -> Result<usize> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .map(Table::row_count)
            .ok_or_else(|| LedgerError::TableNotFound(table.to_string()))
    }
}

/// A connection to an `InMemoryStore`.
///
/// Writes are staged in the connection's transaction and become visible to
/// other connections only on commit. Reads see committed rows overlaid with
/// the connection's own staged writes.
pub struct MemoryConnection {
    store: InMemoryStore,
    transaction: Option<Transaction>,
}

impl MemoryConnection {
    fn active_transaction(&mut self) -> Result<&mut Transaction> {
        self.transaction
            .as_mut()
            .ok_or_else(|| LedgerError::TransactionError("No active transaction".into()))
    }

    /// Committed table with this connection's staged changes layered on top.
    async fn view(&self, table: &str) -> Result<Table> {
        let mut view = {
            let tables = self.store.tables.read().await;
            tables
                .get(table)
                .cloned()
                .ok_or_else(|| LedgerError::TableNotFound(table.to_string()))?
        };

        if let Some(transaction) = &self.transaction {
            for change in transaction.changes_for(table) {
                view.overlay(change);
            }
        }

        Ok(view)
    }
}

#[async_trait]
impl Storage for MemoryConnection {
    async fn create_table(&mut self, table: &str) -> Result<()> {
        let mut tables = self.store.tables.write().await;
        tables
            .entry(table.to_string())
            .or_insert_with(|| Table::new(table));
        Ok(())
    }

    async fn insert(&mut self, table: &str, mut row: StoredRow) -> Result<RecordId> {
        self.active_transaction()?;

        let id = {
            let mut tables = self.store.tables.write().await;
            tables
                .get_mut(table)
                .ok_or_else(|| LedgerError::TableNotFound(table.to_string()))?
                .allocate_id()
        };

        row.id = id;
        row.version = 1;
        self.active_transaction()?.record_change(Change::InsertRow {
            table: table.to_string(),
            row,
        })?;
        Ok(id)
    }

    async fn update(&mut self, table: &str, row: &StoredRow) -> Result<u64> {
        self.active_transaction()?;

        let view = self.view(table).await?;
        let current = view.get(row.id).ok_or_else(|| LedgerError::RowNotFound {
            table: table.to_string(),
            id: row.id,
        })?;
        if current.version != row.version {
            return Err(LedgerError::WriteConflict {
                table: table.to_string(),
                id: row.id,
            });
        }

        let expected_version = row.version;
        let mut staged = row.clone();
        staged.version = expected_version + 1;
        self.active_transaction()?.record_change(Change::UpdateRow {
            table: table.to_string(),
            row: staged,
            expected_version,
        })?;
        Ok(expected_version + 1)
    }

    async fn execute_delete(&mut self, table: &str, id: RecordId) -> Result<bool> {
        self.active_transaction()?;

        if self.view(table).await?.get(id).is_none() {
            return Ok(false);
        }

        self.active_transaction()?.record_change(Change::DeleteRow {
            table: table.to_string(),
            id,
        })?;
        Ok(true)
    }

    async fn query(
        &self,
        table: &str,
        predicate: &Predicate,
        order: &OrderBy,
    ) -> Result<Vec<StoredRow>> {
        Ok(self.view(table).await?.scan(predicate, order))
    }

    async fn fetch_by_id(&self, table: &str, id: RecordId) -> Result<Option<StoredRow>> {
        Ok(self.view(table).await?.get(id).cloned())
    }

    async fn begin(&mut self) -> Result<()> {
        if self.transaction.is_some() {
            return Err(LedgerError::TransactionError(
                "Transaction already active".into(),
            ));
        }
        self.transaction = Some(Transaction::new(TransactionId::new()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut transaction = self
            .transaction
            .take()
            .ok_or_else(|| LedgerError::TransactionError("No active transaction".into()))?;

        let mut tables = self.store.tables.write().await;

        // Replay onto copies first so a conflict leaves committed tables untouched.
        let changes = transaction.changes().to_vec();
        let mut working: HashMap<String, Table> = HashMap::new();
        for change in &changes {
            let name = change.table_name();
            if !working.contains_key(name) {
                let table = tables
                    .get(name)
                    .cloned()
                    .ok_or_else(|| LedgerError::TableNotFound(name.to_string()))?;
                working.insert(name.to_string(), table);
            }
            let Some(table) = working.get_mut(name) else {
                continue;
            };
            if let Err(err) = table.apply(change) {
                warn!(
                    "Rolling back {} after {} staged changes: {}",
                    transaction.id(),
                    transaction.change_count(),
                    err
                );
                transaction.rollback()?;
                return Err(err);
            }
        }

        transaction.commit()?;
        for (name, table) in working {
            tables.insert(name, table);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.transaction.take() {
            Some(mut transaction) => transaction.rollback(),
            None => Err(LedgerError::TransactionError("No active transaction".into())),
        }
    }

    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}
