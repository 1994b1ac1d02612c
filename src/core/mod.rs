pub mod error;
pub mod types;

pub use error::{LedgerError, Result};
pub use types::{DeletionState, RecordId, RecordMeta};
