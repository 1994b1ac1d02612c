// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Transactions for the in-memory store:
// - State Pattern: Transaction state management (Active, Committed, Aborted)
// - Command Pattern: staged changes replayed at commit, dropped at rollback
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{Transaction, TransactionId, TransactionState};
