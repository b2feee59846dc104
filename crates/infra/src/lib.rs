//! Infrastructure layer: storage backends and the sale transaction engine.

pub mod engine;
pub mod store;


pub use engine::{EngineConfig, IsolationStrategy, SaleEngine};
