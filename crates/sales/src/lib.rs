//! Sales domain module.
//!
//! Cart requests, their normalization, and the immutable sale record they turn
//! into. Pure domain logic (no IO, no HTTP, no storage).

pub mod error;
pub mod request;
pub mod sale;

pub use error::SaleError;
pub use request::{Cart, DuplicatePolicy, IdempotencyKey, SaleRequest, SaleRequestItem};
pub use sale::{Sale, SaleLineItem};
