//! Shared identifier types used across the fulfillment crates.

pub mod types;

pub use types::{OrderId, ProductId};
