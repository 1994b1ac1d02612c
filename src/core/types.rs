use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned identity of a record, unique per record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        RecordId(value)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Recoverable-deletion state of a record.
///
/// ```text
/// Active ──delete──> SoftDeleted ──restore──> Active
///   │                    │
///   └──destroy──> Destroyed <──destroy──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeletionState {
    #[default]
    Active,
    SoftDeleted,
    Destroyed,
}

impl DeletionState {
    pub fn is_active(&self) -> bool {
        matches!(self, DeletionState::Active)
    }

    /// Destroyed has no outgoing transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeletionState::Destroyed)
    }
}

impl std::fmt::Display for DeletionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeletionState::Active => write!(f, "ACTIVE"),
            DeletionState::SoftDeleted => write!(f, "SOFT_DELETED"),
            DeletionState::Destroyed => write!(f, "DESTROYED"),
        }
    }
}

/// Identity, tenant reference and deletion-state fields carried by every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Assigned by storage on first flush; immutable afterwards.
    pub id: Option<RecordId>,
    /// Owning tenant. Always `None` for tenant records.
    pub tenant_ref: Option<RecordId>,
    pub state: DeletionState,
    pub deleted_at: Option<DateTime<Utc>>,
    pub destroyed_at: Option<DateTime<Utc>>,
}

impl RecordMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for a scoped record explicitly owned by `tenant`.
    pub fn owned_by(tenant: RecordId) -> Self {
        Self {
            tenant_ref: Some(tenant),
            ..Self::default()
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deletion_state_classification() {
        assert!(DeletionState::Active.is_active());
        assert!(!DeletionState::SoftDeleted.is_active());
        assert!(DeletionState::Destroyed.is_terminal());
        assert!(!DeletionState::SoftDeleted.is_terminal());
        assert_eq!(DeletionState::default(), DeletionState::Active);
    }

    #[test]
    fn test_meta_owned_by() {
        let meta = RecordMeta::owned_by(RecordId(7));
        assert_eq!(meta.tenant_ref, Some(RecordId(7)));
        assert!(!meta.is_persisted());
        assert_eq!(meta.state, DeletionState::Active);
    }

    #[test]
    fn test_record_id_serializes_transparently() {
        let json = serde_json::to_string(&RecordId(42)).unwrap();
        assert_eq!(json, "42");
    }
}
