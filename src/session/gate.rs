//! Scoped query gate: every session read goes through here.
//!
//! Scoped record types are restricted to the current tenant, failing closed
//! when there is none. All types are restricted to active records unless the
//! caller opts into soft-deleted or destroyed ones.

use super::tenant::TenantContext;
use crate::record::DynRecord;
use crate::storage::{Predicate, TenantFilter, Visibility};

pub fn tenant_filter(context: &TenantContext, is_tenant: bool) -> TenantFilter {
    if is_tenant {
        return TenantFilter::Any;
    }
    match context.current() {
        Some(tenant) => TenantFilter::Equals(tenant),
        None => TenantFilter::MatchNone,
    }
}

pub fn predicate(context: &TenantContext, is_tenant: bool, visibility: Visibility) -> Predicate {
    Predicate {
        id: None,
        tenant: tenant_filter(context, is_tenant),
        visibility,
        fields: Vec::new(),
    }
}

/// Whether a live instance may be surfaced under the same rules.
pub fn admits<R: DynRecord + ?Sized>(context: &TenantContext, record: &R, visibility: Visibility) -> bool {
    let meta = record.record_meta();
    tenant_filter(context, record.is_tenant()).admits(meta.tenant_ref) && visibility.admits(meta.state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DeletionState, RecordId, RecordMeta};
    use crate::record::{Entity, User};

    #[test]
    fn test_scoped_types_fail_closed_without_tenant() {
        let context = TenantContext::default();
        assert_eq!(tenant_filter(&context, false), TenantFilter::MatchNone);
        assert_eq!(tenant_filter(&context, true), TenantFilter::Any);
    }

    #[test]
    fn test_predicate_uses_current_tenant() {
        let context = TenantContext::new(Some(RecordId(2)));
        let predicate = predicate(&context, false, Visibility::default());
        assert_eq!(predicate.tenant, TenantFilter::Equals(RecordId(2)));
        assert_eq!(predicate.visibility, Visibility::active_only());
    }

    #[test]
    fn test_admits_checks_live_state() {
        let context = TenantContext::new(Some(RecordId(1)));

        let mut user = User::new("Alice", "alice@example.com");
        user.meta = RecordMeta::owned_by(RecordId(1));
        assert!(admits(&context, &user, Visibility::default()));

        user.meta.state = DeletionState::SoftDeleted;
        assert!(!admits(&context, &user, Visibility::default()));
        assert!(admits(
            &context,
            &user,
            Visibility {
                include_deleted: true,
                include_destroyed: false
            }
        ));

        user.meta = RecordMeta::owned_by(RecordId(2));
        assert!(!admits(&context, &user, Visibility::everything()));
    }

    #[test]
    fn test_tenant_records_ignore_tenant_scope() {
        let context = TenantContext::new(Some(RecordId(1)));
        let mut entity = Entity::new("Other");
        entity.meta.id = Some(RecordId(2));
        assert!(admits(&context, &entity, Visibility::default()));

        entity.meta.state = DeletionState::Destroyed;
        assert!(!admits(
            &context,
            &entity,
            Visibility {
                include_deleted: true,
                include_destroyed: false
            }
        ));
    }
}
