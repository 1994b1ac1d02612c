// ============================================================================
// Session (Unit of Work)
// ============================================================================
//
// A session owns one storage connection and composes:
// - TenantRegistry: the current tenant and the adoption rule
// - IdentityMap: one live instance per (record type, identity)
// - gate: tenant and deletion-state scoping for every read
// - lifecycle: delete / restore / destroy transitions
//
// Changes are staged in pending sets and written by `flush`. Everything
// flushed inside the open transaction is remembered so a rollback can put
// it back into the pending sets.
//
// ============================================================================

pub mod config;
pub mod gate;
pub mod identity_map;
pub mod lifecycle;
pub mod query;
pub mod tenant;

pub use config::{SessionConfig, TenantAdoption};
pub use identity_map::{IdentityMap, RecordHandle, SlotKey};
pub use lifecycle::{LifecycleOp, Transition};
pub use query::Query;
pub use tenant::{TenantContext, TenantRegistry};

use crate::core::{LedgerError, RecordId, Result};
use crate::record::{DynRecord, Record};
use crate::storage::{OrderBy, Storage, StoredRow, Visibility};
use chrono::Utc;
use std::collections::HashSet;
use tenant::Adoption;
use tracing::{Level, event};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Dirty,
    Deleted,
}

/// A write made by `flush` inside the open transaction.
#[derive(Debug, Clone, Copy)]
enum Flushed {
    Inserted {
        key: SlotKey,
        adoption: Option<Adoption>,
    },
    Updated {
        key: SlotKey,
        prior_version: u64,
        kind: PendingKind,
    },
}

/// Sizes of the pending sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingCounts {
    pub new: usize,
    pub dirty: usize,
    pub deleted: usize,
}

impl PendingCounts {
    pub fn is_empty(&self) -> bool {
        self.new == 0 && self.dirty == 0 && self.deleted == 0
    }
}

/// Tenant-scoped unit of work over a storage connection.
///
/// # Examples
///
/// ```
/// use ledgerdb::{Entity, InMemoryStore, Query, Session, User};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryStore::new();
/// let mut session = Session::new(store.connect());
///
/// let acme = session.add(Entity::new("Acme"))?;
/// session.flush().await?;
/// // The first tenant persisted becomes the session's tenant.
/// assert_eq!(session.current_tenant(), session.record(acme)?.meta.id);
///
/// session.add(User::new("Alice", "alice@acme.test"))?;
/// session.commit().await?;
///
/// let users = session.query(Query::<User>::new()).await?;
/// assert_eq!(users.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct Session<S: Storage> {
    id: Uuid,
    storage: S,
    config: SessionConfig,
    tenants: TenantRegistry,
    identity_map: IdentityMap,
    pending_new: Vec<SlotKey>,
    pending_dirty: Vec<SlotKey>,
    pending_deleted: Vec<SlotKey>,
    flushed: Vec<Flushed>,
    known_tables: HashSet<String>,
}

impl<S: Storage> Session<S> {
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, SessionConfig::default())
    }

    pub fn with_config(storage: S, config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            storage,
            tenants: TenantRegistry::new(config.initial_tenant, config.adoption),
            config,
            identity_map: IdentityMap::new(),
            pending_new: Vec::new(),
            pending_dirty: Vec::new(),
            pending_deleted: Vec::new(),
            flushed: Vec::new(),
            known_tables: HashSet::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.identity_map
    }

    pub fn in_transaction(&self) -> bool {
        self.storage.in_transaction()
    }

    // ------------------------------------------------------------------
    // Tenant context
    // ------------------------------------------------------------------

    pub fn current_tenant(&self) -> Option<RecordId> {
        self.tenants.current()
    }

    /// Switch the tenant used by subsequent scoped operations. `None` clears it.
    ///
    /// Loaded instances and pending changes are left alone.
    pub fn set_current(&mut self, tenant: Option<RecordId>) {
        let previous = self.tenants.set_current(tenant);
        event!(
            Level::DEBUG,
            session = %self.id,
            ?previous,
            ?tenant,
            "tenant context switched"
        );
    }

    pub fn context(&self) -> TenantContext {
        self.tenants.context()
    }

    // ------------------------------------------------------------------
    // Record access
    // ------------------------------------------------------------------

    pub fn record<T: Record>(&self, handle: RecordHandle<T>) -> Result<&T> {
        self.identity_map
            .typed::<T>(handle.key())
            .ok_or(LedgerError::StaleHandle)
    }

    /// Mutable access. Persisted records are marked dirty.
    pub fn record_mut<T: Record>(&mut self, handle: RecordHandle<T>) -> Result<&mut T> {
        let key = handle.key();
        self.identity_map
            .typed::<T>(key)
            .ok_or(LedgerError::StaleHandle)?;
        if self.identity_map.persisted_id(key).is_some() {
            self.mark(key, PendingKind::Dirty);
        }
        self.identity_map
            .typed_mut::<T>(key)
            .ok_or(LedgerError::StaleHandle)
    }

    pub fn pending_counts(&self) -> PendingCounts {
        PendingCounts {
            new: self.pending_new.len(),
            dirty: self.pending_dirty.len(),
            deleted: self.pending_deleted.len(),
        }
    }

    pub fn is_pending_new<T: Record>(&self, handle: RecordHandle<T>) -> bool {
        self.pending_new.contains(&handle.key())
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Stage a record. Scoped records without an explicit tenant take the
    /// session's current tenant; with neither, the add is rejected.
    pub fn add<T: Record>(&mut self, mut record: T) -> Result<RecordHandle<T>> {
        if !T::IS_TENANT && record.tenant_ref().is_none() {
            let tenant = self.tenants.current().ok_or(LedgerError::MissingTenant {
                record_type: T::TYPE_NAME,
            })?;
            record.meta_mut().tenant_ref = Some(tenant);
        }

        let key = match record.id() {
            Some(id) => {
                if self.identity_map.lookup(T::TYPE_NAME, id).is_some() {
                    return Err(LedgerError::IdentityConflict {
                        record_type: T::TYPE_NAME,
                        id,
                    });
                }
                // Detached record: written back as an update, version looked up at flush.
                let key = self.identity_map.insert(Box::new(record), 0);
                self.mark(key, PendingKind::Dirty);
                key
            }
            None => {
                let key = self.identity_map.insert(Box::new(record), 0);
                self.pending_new.push(key);
                key
            }
        };

        event!(
            Level::TRACE,
            session = %self.id,
            record_type = T::TYPE_NAME,
            "record staged"
        );
        Ok(RecordHandle::new(key))
    }

    /// Stage several records; if any is rejected none are kept.
    pub fn add_all<T, I>(&mut self, records: I) -> Result<Vec<RecordHandle<T>>>
    where
        T: Record,
        I: IntoIterator<Item = T>,
    {
        let mut handles = Vec::new();
        for record in records {
            match self.add(record) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in handles {
                        self.expunge(handle);
                    }
                    return Err(err);
                }
            }
        }
        Ok(handles)
    }

    /// Detach a record from the session, discarding its unflushed changes.
    ///
    /// Never fails: stale handles are ignored.
    pub fn expunge<T: Record>(&mut self, handle: RecordHandle<T>) -> Option<T> {
        let key = handle.key();
        self.identity_map.typed::<T>(key)?;

        self.pending_new.retain(|pending| *pending != key);
        self.pending_dirty.retain(|pending| *pending != key);
        self.pending_deleted.retain(|pending| *pending != key);

        let record = match self.identity_map.persisted_id(key) {
            Some(id) => self.identity_map.evict(T::TYPE_NAME, id)?,
            None => self.identity_map.remove(key)?,
        };
        record.into_any().downcast::<T>().ok().map(|record| *record)
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Fetch an active, in-scope record by identity.
    pub async fn get<T: Record>(&mut self, id: RecordId) -> Result<Option<RecordHandle<T>>> {
        self.get_with(id, Visibility::default()).await
    }

    /// Fetch a record by identity with explicit deletion-state visibility.
    ///
    /// Out-of-scope and missing identities yield `Ok(None)`.
    pub async fn get_with<T: Record>(
        &mut self,
        id: RecordId,
        visibility: Visibility,
    ) -> Result<Option<RecordHandle<T>>> {
        if self.config.autoflush {
            self.flush().await?;
        }
        let context = self.tenants.context();

        if let Some(key) = self.identity_map.lookup(T::TYPE_NAME, id)
            && self.admitted(key, &context, visibility)
        {
            return Ok(Some(RecordHandle::new(key)));
        }

        self.ensure_table(T::TABLE).await?;
        self.begin_if_needed().await?;

        let predicate = gate::predicate(&context, T::IS_TENANT, visibility).with_id(id);
        let rows = self
            .storage
            .query(T::TABLE, &predicate, &OrderBy::default())
            .await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        let key = self.attach_row::<T>(row)?;
        Ok(self
            .admitted(key, &context, visibility)
            .then(|| RecordHandle::new(key)))
    }

    /// Run a scoped bulk read. Deletion state is judged on the live instance
    /// when one is mapped.
    pub async fn query<T: Record>(&mut self, query: Query<T>) -> Result<Vec<RecordHandle<T>>> {
        if self.config.autoflush {
            self.flush().await?;
        }
        let context = self.tenants.context();

        self.ensure_table(T::TABLE).await?;
        self.begin_if_needed().await?;

        // Without autoflush, pending lifecycle changes exist only on the live
        // instances, so deletion state is filtered after attaching.
        let stored_visibility = if self.config.autoflush {
            query.visibility
        } else {
            Visibility::everything()
        };
        let mut predicate = gate::predicate(&context, T::IS_TENANT, stored_visibility);
        predicate.fields = query.fields;
        let rows = self.storage.query(T::TABLE, &predicate, &query.order).await?;

        let mut handles = Vec::with_capacity(rows.len());
        for row in rows {
            if query.limit.is_some_and(|limit| handles.len() >= limit) {
                break;
            }
            let key = self.attach_row::<T>(row)?;
            // The live instance is authoritative over the stored row.
            if self.admitted(key, &context, query.visibility) {
                handles.push(RecordHandle::new(key));
            }
        }
        Ok(handles)
    }

    /// All active, in-scope records of a type, by identity.
    pub async fn list<T: Record>(&mut self) -> Result<Vec<RecordHandle<T>>> {
        self.query(Query::new()).await
    }

    /// Create the storage table for a record type.
    pub async fn ensure_schema<T: Record>(&mut self) -> Result<()> {
        self.ensure_table(T::TABLE).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Soft-delete a persisted record.
    pub fn delete<T: Record>(&mut self, handle: RecordHandle<T>) -> Result<()> {
        let context = self.tenants.context();
        let record = self.live_mut::<T>(handle.key())?;
        let transition = lifecycle::delete(&context, record, Utc::now())?;
        self.stage(handle.key(), transition, PendingKind::Deleted, LifecycleOp::Delete);
        Ok(())
    }

    /// Bring a soft-deleted record back. Destroyed records stay destroyed.
    pub fn restore<T: Record>(&mut self, handle: RecordHandle<T>) -> Result<()> {
        let record = self.live_mut::<T>(handle.key())?;
        let transition = lifecycle::restore(record)?;
        self.stage(handle.key(), transition, PendingKind::Dirty, LifecycleOp::Restore);
        Ok(())
    }

    /// Irreversibly mark a persisted record destroyed.
    pub fn destroy<T: Record>(&mut self, handle: RecordHandle<T>) -> Result<()> {
        let record = self.live_mut::<T>(handle.key())?;
        let transition = lifecycle::destroy(record, Utc::now())?;
        self.stage(handle.key(), transition, PendingKind::Deleted, LifecycleOp::Destroy);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Unit of work boundaries
    // ------------------------------------------------------------------

    /// Write pending changes inside the current transaction without ending it.
    ///
    /// Tenant inserts go first, then scoped inserts, then updates. Flushing
    /// with nothing pending is a no-op.
    pub async fn flush(&mut self) -> Result<()> {
        let counts = self.pending_counts();
        if counts.is_empty() {
            return Ok(());
        }

        self.begin_if_needed().await?;
        event!(
            Level::DEBUG,
            session = %self.id,
            new = counts.new,
            dirty = counts.dirty,
            deleted = counts.deleted,
            "flushing"
        );

        let mut inserts = std::mem::take(&mut self.pending_new);
        inserts.sort_by_key(|key| !self.identity_map.get(*key).is_some_and(|r| r.is_tenant()));
        for (position, key) in inserts.iter().enumerate() {
            if let Err(err) = self.insert_pending(*key).await {
                let mut remaining = inserts[position..].to_vec();
                remaining.append(&mut self.pending_new);
                self.pending_new = remaining;
                return Err(err);
            }
        }

        let mut updates: Vec<(SlotKey, PendingKind)> = std::mem::take(&mut self.pending_dirty)
            .into_iter()
            .map(|key| (key, PendingKind::Dirty))
            .collect();
        for key in std::mem::take(&mut self.pending_deleted) {
            match updates.iter_mut().find(|(pending, _)| *pending == key) {
                Some(update) => update.1 = PendingKind::Deleted,
                None => updates.push((key, PendingKind::Deleted)),
            }
        }
        for (position, (key, kind)) in updates.iter().enumerate() {
            if let Err(err) = self.update_pending(*key, *kind).await {
                for (key, kind) in &updates[position..] {
                    self.mark(*key, *kind);
                }
                return Err(err);
            }
        }

        Ok(())
    }

    /// Flush and commit. On failure the transaction is rolled back and the
    /// pending sets again hold everything that was not persisted.
    pub async fn commit(&mut self) -> Result<()> {
        match self.flush_and_commit().await {
            Ok(()) => {
                event!(
                    Level::DEBUG,
                    session = %self.id,
                    writes = self.flushed.len(),
                    "committed"
                );
                self.flushed.clear();
                Ok(())
            }
            Err(err) => {
                event!(
                    Level::WARN,
                    session = %self.id,
                    error = %err,
                    "commit failed, rolling back"
                );
                if let Err(rollback_err) = self.rollback().await {
                    event!(
                        Level::WARN,
                        session = %self.id,
                        error = %rollback_err,
                        "rollback after failed commit failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Roll back the open transaction and return its flushed writes to the
    /// pending sets. New records become transient again.
    pub async fn rollback(&mut self) -> Result<()> {
        let outcome = if self.storage.in_transaction() {
            self.storage.rollback().await
        } else {
            Ok(())
        };

        let restored = self.restore_flushed();
        event!(
            Level::DEBUG,
            session = %self.id,
            restored,
            "rolled back"
        );
        outcome
    }

    /// End the session: roll back anything uncommitted and drop every instance.
    pub async fn close(mut self) -> Result<()> {
        let outcome = if self.storage.in_transaction() {
            self.storage.rollback().await
        } else {
            Ok(())
        };
        self.identity_map.clear();
        event!(Level::DEBUG, session = %self.id, "session closed");
        outcome
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn flush_and_commit(&mut self) -> Result<()> {
        self.flush().await?;
        if self.storage.in_transaction() {
            self.storage.commit().await?;
        }
        Ok(())
    }

    async fn begin_if_needed(&mut self) -> Result<()> {
        if !self.storage.in_transaction() {
            self.storage.begin().await?;
            event!(Level::TRACE, session = %self.id, "transaction started");
        }
        Ok(())
    }

    async fn ensure_table(&mut self, table: &str) -> Result<()> {
        if !self.known_tables.contains(table) {
            self.storage.create_table(table).await?;
            self.known_tables.insert(table.to_string());
        }
        Ok(())
    }

    fn attach_row<T: Record>(&mut self, row: StoredRow) -> Result<SlotKey> {
        self.identity_map.get_or_attach(T::TYPE_NAME, row.id, || {
            let record = T::from_row(&row)?;
            Ok((Box::new(record) as Box<dyn DynRecord>, row.version))
        })
    }

    fn admitted(&self, key: SlotKey, context: &TenantContext, visibility: Visibility) -> bool {
        self.identity_map
            .get(key)
            .is_some_and(|record| gate::admits(context, record, visibility))
    }

    fn live_mut<T: Record>(&mut self, key: SlotKey) -> Result<&mut (dyn DynRecord + 'static)> {
        self.identity_map
            .get_mut(key)
            .filter(|record| record.as_any().is::<T>())
            .ok_or(LedgerError::StaleHandle)
    }

    fn mark(&mut self, key: SlotKey, kind: PendingKind) {
        let set = match kind {
            PendingKind::Dirty => &mut self.pending_dirty,
            PendingKind::Deleted => &mut self.pending_deleted,
        };
        if !set.contains(&key) {
            set.push(key);
        }
    }

    fn stage(&mut self, key: SlotKey, transition: Transition, kind: PendingKind, op: LifecycleOp) {
        if transition == Transition::Applied {
            self.mark(key, kind);
        }
        event!(
            Level::DEBUG,
            session = %self.id,
            operation = op.name(),
            ?transition,
            "lifecycle transition"
        );
    }

    async fn verify_tenant(&mut self, record_type: &'static str, tenant: RecordId) -> Result<()> {
        let tenant_table = self.config.tenant_table.clone();
        self.ensure_table(&tenant_table).await?;
        if self.storage.fetch_by_id(&tenant_table, tenant).await?.is_none() {
            return Err(LedgerError::UnresolvedTenant {
                record_type,
                tenant,
            });
        }
        Ok(())
    }

    async fn insert_pending(&mut self, key: SlotKey) -> Result<()> {
        let Some(record) = self.identity_map.get(key) else {
            return Ok(());
        };
        let record_type = record.type_name();
        let table = record.table_name();
        let is_tenant = record.is_tenant();
        let meta = record.record_meta().clone();
        let fields = record.fields()?;

        if !is_tenant {
            let tenant = meta
                .tenant_ref
                .ok_or(LedgerError::MissingTenant { record_type })?;
            self.verify_tenant(record_type, tenant).await?;
        }

        self.ensure_table(table).await?;
        let id = self
            .storage
            .insert(table, StoredRow::new(&meta, fields, 0))
            .await?;

        if let Some(record) = self.identity_map.get_mut(key) {
            record.record_meta_mut().id = Some(id);
        }
        self.identity_map.set_version(key, 1);
        self.identity_map.register(key, id);

        let adoption = if is_tenant { self.tenants.adopt(id) } else { None };
        if adoption.is_some() {
            event!(Level::DEBUG, session = %self.id, tenant = %id, "adopted new tenant");
        }
        self.flushed.push(Flushed::Inserted { key, adoption });
        Ok(())
    }

    async fn update_pending(&mut self, key: SlotKey, kind: PendingKind) -> Result<()> {
        let Some(record) = self.identity_map.get(key) else {
            return Ok(());
        };
        let record_type = record.type_name();
        let table = record.table_name();
        let is_tenant = record.is_tenant();
        let meta = record.record_meta().clone();
        let fields = record.fields()?;
        let Some(id) = self.identity_map.persisted_id(key) else {
            return Ok(());
        };

        // Identity and tenant are fixed once a record is stored.
        if meta.id != Some(id) {
            return Err(LedgerError::IdentityChanged { record_type, id });
        }

        let prior_version = self.identity_map.version(key).unwrap_or(0);
        let expected_version = if prior_version == 0 {
            self.ensure_table(table).await?;
            let stored = self
                .storage
                .fetch_by_id(table, id)
                .await?
                .ok_or_else(|| LedgerError::RowNotFound {
                    table: table.to_string(),
                    id,
                })?;
            self.identity_map.set_persisted_tenant(key, stored.tenant_ref);
            stored.version
        } else {
            prior_version
        };

        if !is_tenant {
            if meta.tenant_ref.is_none() {
                return Err(LedgerError::MissingTenant { record_type });
            }
            if meta.tenant_ref != self.identity_map.persisted_tenant(key) {
                return Err(LedgerError::TenantChanged { record_type, id });
            }
        }

        let version = self
            .storage
            .update(table, &StoredRow::new(&meta, fields, expected_version))
            .await?;
        self.identity_map.set_version(key, version);
        self.flushed.push(Flushed::Updated {
            key,
            prior_version,
            kind,
        });
        Ok(())
    }

    fn restore_flushed(&mut self) -> usize {
        let flushed = std::mem::take(&mut self.flushed);
        let count = flushed.len();
        let mut restored_new = Vec::new();

        for change in flushed.into_iter().rev() {
            match change {
                Flushed::Inserted { key, adoption } => {
                    if let Some(adoption) = adoption {
                        self.tenants.revert(adoption);
                    }
                    let Some(record) = self.identity_map.get_mut(key) else {
                        continue;
                    };
                    let type_name = record.type_name();
                    record.record_meta_mut().id = None;
                    if let Some(id) = self.identity_map.persisted_id(key) {
                        self.identity_map.unregister(type_name, id);
                    }
                    self.identity_map.set_version(key, 0);
                    restored_new.push(key);
                }
                Flushed::Updated {
                    key,
                    prior_version,
                    kind,
                } => {
                    if !self.identity_map.contains(key) {
                        continue;
                    }
                    self.identity_map.set_version(key, prior_version);
                    self.mark(key, kind);
                }
            }
        }

        restored_new.reverse();
        restored_new.append(&mut self.pending_new);
        self.pending_new = restored_new;

        // Transient again, so a single insert carries their latest state.
        let pending_new = &self.pending_new;
        self.pending_dirty.retain(|key| !pending_new.contains(key));
        self.pending_deleted.retain(|key| !pending_new.contains(key));
        count
    }
}
