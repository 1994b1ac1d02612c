use super::config::TenantAdoption;
use crate::core::RecordId;

/// Explicit tenant context handed to the query gate and the lifecycle guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TenantContext {
    current: Option<RecordId>,
}

impl TenantContext {
    pub fn new(current: Option<RecordId>) -> Self {
        Self { current }
    }

    pub fn current(&self) -> Option<RecordId> {
        self.current
    }

    pub fn is_current(&self, tenant: RecordId) -> bool {
        self.current == Some(tenant)
    }
}

/// Undo token for an automatic adoption, kept until the transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adoption {
    tenant: RecordId,
    had_tenant_before: bool,
}

/// Holds the session's current tenant and decides when to adopt a new one.
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    context: TenantContext,
    adoption: TenantAdoption,
    has_had_tenant: bool,
}

impl TenantRegistry {
    pub fn new(initial: Option<RecordId>, adoption: TenantAdoption) -> Self {
        Self {
            context: TenantContext::new(initial),
            adoption,
            has_had_tenant: initial.is_some(),
        }
    }

    pub fn context(&self) -> TenantContext {
        self.context
    }

    pub fn current(&self) -> Option<RecordId> {
        self.context.current
    }

    /// Switch tenants explicitly. Returns the previous tenant.
    pub fn set_current(&mut self, tenant: Option<RecordId>) -> Option<RecordId> {
        if tenant.is_some() {
            self.has_had_tenant = true;
        }
        std::mem::replace(&mut self.context.current, tenant)
    }

    /// Called when a tenant record is first persisted.
    pub fn adopt(&mut self, tenant: RecordId) -> Option<Adoption> {
        if self.context.current.is_some() {
            return None;
        }

        let allowed = match self.adoption {
            TenantAdoption::WhenUnset => true,
            TenantAdoption::FirstOnly => !self.has_had_tenant,
            TenantAdoption::Never => false,
        };
        if !allowed {
            return None;
        }

        let token = Adoption {
            tenant,
            had_tenant_before: self.has_had_tenant,
        };
        self.context.current = Some(tenant);
        self.has_had_tenant = true;
        Some(token)
    }

    /// Undo an adoption whose insert was rolled back, unless the caller has
    /// switched tenants since.
    pub fn revert(&mut self, adoption: Adoption) -> bool {
        if self.context.current != Some(adoption.tenant) {
            return false;
        }
        self.context.current = None;
        self.has_had_tenant = adoption.had_tenant_before;
        true
    }
}
