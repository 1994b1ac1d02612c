// ============================================================================
// Lifecycle State Machine
// ============================================================================
//
// Active ──delete──> SoftDeleted ──restore──> Active
// Active | SoftDeleted ──destroy──> Destroyed (terminal)
//
// Restoring a destroyed record is a deliberate no-op. Every other
// transition not drawn above is rejected.
//
// ============================================================================

use super::tenant::TenantContext;
use crate::core::{DeletionState, LedgerError, RecordMeta, Result};
use crate::record::DynRecord;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Delete,
    Restore,
    Destroy,
}

impl LifecycleOp {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleOp::Delete => "delete",
            LifecycleOp::Restore => "restore",
            LifecycleOp::Destroy => "destroy",
        }
    }
}

/// Outcome of a lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed and must be written back
    Applied,
    /// Nothing to write
    Unchanged,
}

fn persisted_meta<R: DynRecord + ?Sized>(record: &mut R) -> Result<&mut RecordMeta> {
    let record_type = record.type_name();
    let meta = record.record_meta_mut();
    if !meta.is_persisted() {
        return Err(LedgerError::NotPersisted { record_type });
    }
    Ok(meta)
}

fn invalid<R: DynRecord + ?Sized>(record: &R, operation: LifecycleOp) -> LedgerError {
    LedgerError::InvalidTransition {
        record_type: record.type_name(),
        from: record.record_meta().state,
        operation: operation.name(),
    }
}

/// Soft-delete. The session's current tenant is protected.
pub fn delete<R: DynRecord + ?Sized>(
    context: &TenantContext,
    record: &mut R,
    now: DateTime<Utc>,
) -> Result<Transition> {
    let is_tenant = record.is_tenant();
    let meta = persisted_meta(record)?;

    if is_tenant
        && let Some(id) = meta.id
        && context.is_current(id)
    {
        return Err(LedgerError::ActiveTenantDeletion(id));
    }

    if meta.state != DeletionState::Active {
        return Err(invalid(&*record, LifecycleOp::Delete));
    }

    meta.state = DeletionState::SoftDeleted;
    meta.deleted_at = Some(now);
    Ok(Transition::Applied)
}

pub fn restore<R: DynRecord + ?Sized>(record: &mut R) -> Result<Transition> {
    let meta = persisted_meta(record)?;
    match meta.state {
        DeletionState::SoftDeleted => {
            meta.state = DeletionState::Active;
            meta.deleted_at = None;
            Ok(Transition::Applied)
        }
        DeletionState::Destroyed => Ok(Transition::Unchanged),
        DeletionState::Active => Err(invalid(&*record, LifecycleOp::Restore)),
    }
}

pub fn destroy<R: DynRecord + ?Sized>(record: &mut R, now: DateTime<Utc>) -> Result<Transition> {
    let meta = persisted_meta(record)?;
    if meta.state.is_terminal() {
        return Err(invalid(&*record, LifecycleOp::Destroy));
    }

    meta.state = DeletionState::Destroyed;
    meta.destroyed_at = Some(now);
    Ok(Transition::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RecordId;
    use crate::record::{Entity, User};

    fn stored_user() -> User {
        let mut user = User::new("Alice", "alice@example.com");
        user.meta.tenant_ref = Some(RecordId(1));
        user.meta.id = Some(RecordId(10));
        user
    }

    fn stored_entity(id: u64) -> Entity {
        let mut entity = Entity::new("Acme");
        entity.meta.id = Some(RecordId(id));
        entity
    }

    #[test]
    fn test_delete_then_restore() {
        let context = TenantContext::new(Some(RecordId(1)));
        let mut user = stored_user();
        let now = Utc::now();

        assert_eq!(delete(&context, &mut user, now).unwrap(), Transition::Applied);
        assert_eq!(user.meta.state, DeletionState::SoftDeleted);
        assert_eq!(user.meta.deleted_at, Some(now));

        assert_eq!(restore(&mut user).unwrap(), Transition::Applied);
        assert_eq!(user.meta.state, DeletionState::Active);
        assert_eq!(user.meta.deleted_at, None);
    }

    #[test]
    fn test_destroy_is_terminal() {
        let mut user = stored_user();
        destroy(&mut user, Utc::now()).unwrap();
        assert_eq!(user.meta.state, DeletionState::Destroyed);
        assert!(user.meta.destroyed_at.is_some());

        assert_eq!(restore(&mut user).unwrap(), Transition::Unchanged);
        assert_eq!(user.meta.state, DeletionState::Destroyed);

        let context = TenantContext::default();
        assert!(matches!(
            delete(&context, &mut user, Utc::now()),
            Err(LedgerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            destroy(&mut user, Utc::now()),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_destroy_from_soft_deleted() {
        let context = TenantContext::default();
        let mut user = stored_user();
        delete(&context, &mut user, Utc::now()).unwrap();
        assert_eq!(destroy(&mut user, Utc::now()).unwrap(), Transition::Applied);
        assert_eq!(user.meta.state, DeletionState::Destroyed);
    }

    #[test]
    fn test_current_tenant_cannot_be_deleted() {
        let context = TenantContext::new(Some(RecordId(1)));
        let mut current = stored_entity(1);
        let mut other = stored_entity(2);

        assert!(matches!(
            delete(&context, &mut current, Utc::now()),
            Err(LedgerError::ActiveTenantDeletion(RecordId(1)))
        ));
        assert_eq!(current.meta.state, DeletionState::Active);

        assert_eq!(delete(&context, &mut other, Utc::now()).unwrap(), Transition::Applied);
    }

    #[test]
    fn test_transient_records_rejected() {
        let context = TenantContext::default();
        let mut user = User::new("Draft", "draft@example.com");

        assert!(matches!(
            delete(&context, &mut user, Utc::now()),
            Err(LedgerError::NotPersisted { record_type: "User" })
        ));
        assert!(matches!(restore(&mut user), Err(LedgerError::NotPersisted { .. })));
        assert!(matches!(
            destroy(&mut user, Utc::now()),
            Err(LedgerError::NotPersisted { .. })
        ));
    }

    #[test]
    fn test_restore_active_is_rejected() {
        let mut user = stored_user();
        assert!(matches!(
            restore(&mut user),
            Err(LedgerError::InvalidTransition { operation: "restore", .. })
        ));
    }

    #[test]
    fn test_double_delete_is_rejected() {
        let context = TenantContext::default();
        let mut user = stored_user();
        delete(&context, &mut user, Utc::now()).unwrap();
        assert!(matches!(
            delete(&context, &mut user, Utc::now()),
            Err(LedgerError::InvalidTransition {
                from: DeletionState::SoftDeleted,
                ..
            })
        ));
    }
}
