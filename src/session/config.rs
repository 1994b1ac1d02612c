use crate::core::RecordId;
use crate::record::{Entity, Record};
use serde::{Deserialize, Serialize};

/// When a newly persisted tenant becomes the session's current tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantAdoption {
    /// Adopt whenever no tenant is current, including after an explicit clear.
    #[default]
    WhenUnset,
    /// Adopt only if the session has never had a current tenant.
    FirstOnly,
    /// Never adopt; the tenant must be set explicitly.
    Never,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Storage table of the tenant record type
    pub tenant_table: String,

    /// Automatic tenant adoption rule
    pub adoption: TenantAdoption,

    /// Flush pending changes before reads reach storage
    pub autoflush: bool,

    /// Tenant the session starts out scoped to
    pub initial_tenant: Option<RecordId>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::for_tenant::<Entity>()
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for sessions whose tenant records are of type `T`
    pub fn for_tenant<T: Record>() -> Self {
        Self {
            tenant_table: T::TABLE.to_string(),
            adoption: TenantAdoption::default(),
            autoflush: true,
            initial_tenant: None,
        }
    }

    /// Set the adoption rule
    pub fn adoption(mut self, adoption: TenantAdoption) -> Self {
        self.adoption = adoption;
        self
    }

    /// Enable or disable autoflush
    pub fn autoflush(mut self, enabled: bool) -> Self {
        self.autoflush = enabled;
        self
    }

    /// Set the initial tenant
    pub fn initial_tenant(mut self, tenant: RecordId) -> Self {
        self.initial_tenant = Some(tenant);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.tenant_table, "entities");
        assert_eq!(config.adoption, TenantAdoption::WhenUnset);
        assert!(config.autoflush);
        assert_eq!(config.initial_tenant, None);
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::new()
            .adoption(TenantAdoption::Never)
            .autoflush(false)
            .initial_tenant(RecordId(3));

        assert_eq!(config.adoption, TenantAdoption::Never);
        assert!(!config.autoflush);
        assert_eq!(config.initial_tenant, Some(RecordId(3)));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"adoption": "first_only", "initial_tenant": 2}"#).unwrap();

        assert_eq!(config.adoption, TenantAdoption::FirstOnly);
        assert_eq!(config.initial_tenant, Some(RecordId(2)));
        assert_eq!(config.tenant_table, "entities");
        assert!(config.autoflush);
    }
}
