//! Inventory domain module.
//!
//! Product records and the catalog inputs that create or edit them. Stock is
//! only ever reduced through a guarded decrement; nothing here performs IO.

pub mod product;

pub use product::{NewProduct, Product, ProductPatch};
