// ============================================================================
// Record Contracts
// ============================================================================
//
// Every persisted object exposes three capabilities: an identity, a tenant
// reference and deletion-state fields. These live in `RecordMeta`; business
// fields are serialized to JSON and stored alongside it.
//
// ============================================================================

pub mod models;

use crate::core::{DeletionState, RecordId, RecordMeta, Result};
use crate::storage::StoredRow;
use serde::{Serialize, de::DeserializeOwned};
use std::any::Any;

pub use models::{Currency, Entity, User};

/// Core trait for records managed by a session.
///
/// Implementors keep their `RecordMeta` out of the serialized business fields
/// (`#[serde(skip)]`); the session stores and restores it separately.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique type name, used as the identity-map type tag.
    const TYPE_NAME: &'static str;
    /// Storage table the record type lives in.
    const TABLE: &'static str;
    /// Tenant records form the isolation boundary and carry no tenant reference.
    const IS_TENANT: bool = false;

    fn meta(&self) -> &RecordMeta;
    fn meta_mut(&mut self) -> &mut RecordMeta;

    fn id(&self) -> Option<RecordId> {
        self.meta().id
    }

    fn tenant_ref(&self) -> Option<RecordId> {
        self.meta().tenant_ref
    }

    fn deletion_state(&self) -> DeletionState {
        self.meta().state
    }

    /// Rebuilds a record from a stored row.
    fn from_row(row: &StoredRow) -> Result<Self> {
        let mut record: Self = serde_json::from_value(row.fields.clone())?;
        *record.meta_mut() = row.meta();
        Ok(record)
    }
}

/// Object-safe view of a `Record`, used for the session's heterogeneous arena.
pub trait DynRecord: Any + Send + Sync {
    fn type_name(&self) -> &'static str;
    fn table_name(&self) -> &'static str;
    fn is_tenant(&self) -> bool;
    fn record_meta(&self) -> &RecordMeta;
    fn record_meta_mut(&mut self) -> &mut RecordMeta;
    /// Serializes the business fields only.
    fn fields(&self) -> Result<serde_json::Value>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Record> DynRecord for T {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn table_name(&self) -> &'static str {
        T::TABLE
    }

    fn is_tenant(&self) -> bool {
        T::IS_TENANT
    }

    fn record_meta(&self) -> &RecordMeta {
        self.meta()
    }

    fn record_meta_mut(&mut self) -> &mut RecordMeta {
        self.meta_mut()
    }

    fn fields(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_exclude_meta() {
        let mut user = User::new("Alice", "alice@example.com");
        user.meta.tenant_ref = Some(RecordId(1));

        let fields = DynRecord::fields(&user).unwrap();
        let object = fields.as_object().unwrap();
        assert_eq!(object.get("name").unwrap(), "Alice");
        assert!(object.get("meta").is_none());
    }

    #[test]
    fn test_from_row_restores_meta() {
        let mut meta = RecordMeta::owned_by(RecordId(3));
        meta.id = Some(RecordId(9));
        meta.state = DeletionState::SoftDeleted;

        let row = StoredRow::new(&meta, serde_json::json!({"name": "Euro", "code": "EUR"}), 2);
        let currency = Currency::from_row(&row).unwrap();

        assert_eq!(currency.code, "EUR");
        assert_eq!(currency.id(), Some(RecordId(9)));
        assert_eq!(currency.tenant_ref(), Some(RecordId(3)));
        assert_eq!(currency.deletion_state(), DeletionState::SoftDeleted);
    }

    #[test]
    fn test_dyn_record_downcast() {
        let entity: Box<dyn DynRecord> = Box::new(Entity::new("Acme"));
        assert!(entity.is_tenant());
        assert_eq!(entity.table_name(), Entity::TABLE);
        assert!(entity.as_any().downcast_ref::<Entity>().is_some());
        assert!(entity.as_any().downcast_ref::<User>().is_none());
    }
}
