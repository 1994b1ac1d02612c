// ============================================================================
// LedgerDB Library
// ============================================================================
//
// Tenant-scoped unit-of-work sessions over a transactional record store.
//
// - core:        identifiers, deletion state, errors
// - record:      the `Record` contract and the reference record types
// - storage:     the `Storage` seam and the in-memory engine
// - transaction: staged changes and transaction bookkeeping
// - session:     identity map, tenant gate, lifecycle, flush/commit
//
// ============================================================================

pub mod core;
pub mod record;
pub mod session;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use core::{DeletionState, LedgerError, RecordId, RecordMeta, Result};
pub use record::{Currency, DynRecord, Entity, Record, User};
pub use session::{
    PendingCounts, Query, RecordHandle, Session, SessionConfig, TenantAdoption, TenantContext,
};
pub use storage::{InMemoryStore, MemoryConnection, OrderBy, Storage, StoredRow, Visibility};
