use crate::core::{DeletionState, RecordId, RecordMeta, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted row: record metadata as first-class columns plus JSON business fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    /// Ignored by `Storage::insert`, which assigns the identity.
    pub id: RecordId,
    pub tenant_ref: Option<RecordId>,
    pub state: DeletionState,
    pub deleted_at: Option<DateTime<Utc>>,
    pub destroyed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version. For updates this is the version the
    /// writer last observed.
    pub version: u64,
    pub fields: serde_json::Value,
}

impl StoredRow {
    pub fn new(meta: &RecordMeta, fields: serde_json::Value, version: u64) -> Self {
        Self {
            id: meta.id.unwrap_or(RecordId(0)),
            tenant_ref: meta.tenant_ref,
            state: meta.state,
            deleted_at: meta.deleted_at,
            destroyed_at: meta.destroyed_at,
            version,
            fields,
        }
    }

    pub fn meta(&self) -> RecordMeta {
        RecordMeta {
            id: Some(self.id),
            tenant_ref: self.tenant_ref,
            state: self.state,
            deleted_at: self.deleted_at,
            destroyed_at: self.destroyed_at,
        }
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }
}

/// Tenant component of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantFilter {
    /// No tenant restriction (tenant record types, raw storage access).
    Any,
    Equals(RecordId),
    /// Matches no rows. Used when a scoped read has no tenant context.
    MatchNone,
}

impl TenantFilter {
    pub fn admits(&self, tenant_ref: Option<RecordId>) -> bool {
        match self {
            TenantFilter::Any => true,
            TenantFilter::Equals(tenant) => tenant_ref == Some(*tenant),
            TenantFilter::MatchNone => false,
        }
    }
}

/// Which deletion states a read may surface. Defaults to active rows only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Visibility {
    pub include_deleted: bool,
    pub include_destroyed: bool,
}

impl Visibility {
    pub fn active_only() -> Self {
        Self::default()
    }

    pub fn everything() -> Self {
        Self {
            include_deleted: true,
            include_destroyed: true,
        }
    }

    pub fn admits(&self, state: DeletionState) -> bool {
        match state {
            DeletionState::Active => true,
            DeletionState::SoftDeleted => self.include_deleted,
            DeletionState::Destroyed => self.include_destroyed,
        }
    }
}

/// Filter applied by `Storage::query`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub id: Option<RecordId>,
    pub tenant: TenantFilter,
    pub visibility: Visibility,
    /// Equality constraints on business fields.
    pub fields: Vec<(String, serde_json::Value)>,
}

impl Predicate {
    /// Matches every row regardless of tenant or deletion state.
    pub fn all() -> Self {
        Self {
            id: None,
            tenant: TenantFilter::Any,
            visibility: Visibility::everything(),
            fields: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn field_eq(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn matches(&self, row: &StoredRow) -> bool {
        if let Some(id) = self.id
            && row.id != id
        {
            return false;
        }

        self.tenant.admits(row.tenant_ref)
            && self.visibility.admits(row.state)
            && self
                .fields
                .iter()
                .all(|(name, expected)| row.field(name) == Some(expected))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OrderKey {
    #[default]
    Id,
    Field(String),
}

/// Result ordering for `Storage::query`. Ties are broken by identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderBy {
    pub key: OrderKey,
    pub descending: bool,
}

impl OrderBy {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            key: OrderKey::Field(name.into()),
            descending: false,
        }
    }

    pub fn desc(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// Storage collaborator - the engine a session persists through.
///
/// Writes are only accepted inside a transaction; reads outside a
/// transaction observe committed data.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create a table if it does not exist yet. Schema changes are not transactional.
    async fn create_table(&mut self, table: &str) -> Result<()>;

    /// Insert a row and return its store-assigned identity. New rows start at version 1.
    async fn insert(&mut self, table: &str, row: StoredRow) -> Result<RecordId>;

    /// Overwrite a row, checking `row.version` against the stored version.
    /// Returns the new version.
    async fn update(&mut self, table: &str, row: &StoredRow) -> Result<u64>;

    /// Physically remove a row.
    async fn execute_delete(&mut self, table: &str, id: RecordId) -> Result<bool>;

    async fn query(
        &self,
        table: &str,
        predicate: &Predicate,
        order: &OrderBy,
    ) -> Result<Vec<StoredRow>>;

    async fn fetch_by_id(&self, table: &str, id: RecordId) -> Result<Option<StoredRow>>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    fn in_transaction(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: u64, tenant: Option<u64>, state: DeletionState) -> StoredRow {
        StoredRow {
            id: RecordId(id),
            tenant_ref: tenant.map(RecordId),
            state,
            deleted_at: None,
            destroyed_at: None,
            version: 1,
            fields: json!({"name": format!("row-{}", id)}),
        }
    }

    #[test]
    fn test_visibility_defaults_to_active_only() {
        let visibility = Visibility::default();
        assert!(visibility.admits(DeletionState::Active));
        assert!(!visibility.admits(DeletionState::SoftDeleted));
        assert!(!visibility.admits(DeletionState::Destroyed));
    }

    #[test]
    fn test_destroyed_needs_its_own_flag() {
        let visibility = Visibility {
            include_deleted: true,
            include_destroyed: false,
        };
        assert!(visibility.admits(DeletionState::SoftDeleted));
        assert!(!visibility.admits(DeletionState::Destroyed));
    }

    #[test]
    fn test_match_none_rejects_everything() {
        let predicate = Predicate {
            tenant: TenantFilter::MatchNone,
            ..Predicate::all()
        };
        assert!(!predicate.matches(&row(1, Some(1), DeletionState::Active)));
        assert!(!predicate.matches(&row(2, None, DeletionState::Active)));
    }

    #[test]
    fn test_predicate_combines_filters() {
        let predicate = Predicate {
            tenant: TenantFilter::Equals(RecordId(1)),
            visibility: Visibility::active_only(),
            ..Predicate::all()
        }
        .field_eq("name", json!("row-3"));

        assert!(predicate.matches(&row(3, Some(1), DeletionState::Active)));
        assert!(!predicate.matches(&row(3, Some(2), DeletionState::Active)));
        assert!(!predicate.matches(&row(3, Some(1), DeletionState::SoftDeleted)));
        assert!(!predicate.matches(&row(4, Some(1), DeletionState::Active)));
    }
}
