pub mod engine;
pub mod memory;
pub mod table;

pub use engine::{OrderBy, OrderKey, Predicate, Storage, StoredRow, TenantFilter, Visibility};
pub use memory::{InMemoryStore, MemoryConnection};
pub use table::Table;
