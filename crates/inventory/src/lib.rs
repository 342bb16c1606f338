//! Inventory reservation engine and stock ledger.
//!
//! Stock for each product lives in one independently lockable row with
//! `available` and `reserved` counters. Every mutation is recorded in an
//! append-only ledger inside the same transaction.

pub mod engine;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod publisher;
pub mod query;
pub mod store;

pub use common::ProductId;
pub use engine::{ReleaseOutcome, ReservationEngine};
pub use error::{InventoryError, Result};
pub use memory::{InMemoryInventoryStore, InMemoryInventoryTx, LockAcquisition};
pub use model::{
    Inventory, InventoryUpdate, MovementContext, MovementType, StockMovement, channel_for,
};
pub use postgres::{PgNotifyPublisher, PostgresInventoryStore, PostgresInventoryTx};
pub use publisher::{
    BroadcastInventoryPublisher, InventoryPublisher, NoopInventoryPublisher, PublishError,
};
pub use query::MovementQuery;
pub use store::{InventoryStore, InventoryTx};
