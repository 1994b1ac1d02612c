//! Reference record types for a multi-tenant ledger.
//!
//! `Entity` is the tenant: every other record belongs to exactly one entity.

use super::Record;
use crate::core::{RecordId, RecordMeta};
use serde::{Deserialize, Serialize};

/// An accounting entity (organization). The tenant boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(skip)]
    pub meta: RecordMeta,
    pub name: String,
    /// Reporting currency.
    #[serde(default)]
    pub currency_id: Option<RecordId>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            name: name.into(),
            currency_id: None,
        }
    }
}

impl Record for Entity {
    const TYPE_NAME: &'static str = "Entity";
    const TABLE: &'static str = "entities";
    const IS_TENANT: bool = true;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(skip)]
    pub meta: RecordMeta,
    pub name: String,
    pub email: String,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            name: name.into(),
            email: email.into(),
        }
    }

    /// Sets the owning entity explicitly instead of taking the session's.
    pub fn with_tenant(mut self, tenant: RecordId) -> Self {
        self.meta.tenant_ref = Some(tenant);
        self
    }
}

impl Record for User {
    const TYPE_NAME: &'static str = "User";
    const TABLE: &'static str = "users";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    #[serde(skip)]
    pub meta: RecordMeta,
    pub name: String,
    /// ISO 4217 code.
    pub code: String,
}

impl Currency {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            name: name.into(),
            code: code.into(),
        }
    }

    pub fn with_tenant(mut self, tenant: RecordId) -> Self {
        self.meta.tenant_ref = Some(tenant);
        self
    }
}

impl Record for Currency {
    const TYPE_NAME: &'static str = "Currency";
    const TABLE: &'static str = "currencies";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}
