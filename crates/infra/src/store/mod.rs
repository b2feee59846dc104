//! Storage boundary for inventory, the sale ledger and the catalog.
//!
//! The engine only talks to the traits in [`r#trait`]; backends decide how a
//! unit of work is isolated.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryScope, InMemorySaleStore};
pub use postgres::{PostgresSaleStore, PostgresScope};
pub use r#trait::{
    DecrementOutcome, InventoryStore, ProductCatalog, SaleLedger, SaleStore, StoreError,
    TransactionScope,
};
