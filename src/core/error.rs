use super::{DeletionState, RecordId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{record_type} requires a tenant but none is set on the record or the session")]
    MissingTenant { record_type: &'static str },

    #[error("Tenant {0} is the session's current tenant and cannot be deleted")]
    ActiveTenantDeletion(RecordId),

    #[error("{record_type} has not been persisted yet")]
    NotPersisted { record_type: &'static str },

    #[error("Cannot {operation} {record_type} in state {from}")]
    InvalidTransition {
        record_type: &'static str,
        from: DeletionState,
        operation: &'static str,
    },

    #[error("{record_type} references tenant {tenant} which does not exist")]
    UnresolvedTenant {
        record_type: &'static str,
        tenant: RecordId,
    },

    #[error("Record handle is stale or addresses another record type")]
    StaleHandle,

    #[error("{record_type} {id} is already attached to this session")]
    IdentityConflict { record_type: &'static str, id: RecordId },

    #[error("{record_type} {id} was given another identity after it was stored")]
    IdentityChanged { record_type: &'static str, id: RecordId },

    #[error("{record_type} {id} cannot be moved to another tenant")]
    TenantChanged { record_type: &'static str, id: RecordId },

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Row {id} not found in table '{table}'")]
    RowNotFound { table: String, id: RecordId },

    #[error("Write-write conflict on row {id} in table '{table}'")]
    WriteConflict { table: String, id: RecordId },

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
