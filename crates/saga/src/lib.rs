//! Order fulfillment saga.
//!
//! The saga reserves stock when an order is created, then, once the caller
//! has collected payment, deducts the stock, creates the delivery and marks
//! the order paid:
//!
//! 1. Reserve inventory
//! 2. Process payment (performed by the caller)
//! 3. Deduct inventory
//! 4. Create delivery
//! 5. Confirm order
//!
//! Progress is persisted as a [`SagaState`] after every step. If a step
//! fails, completed steps are compensated in reverse order. Deducted stock
//! is never restored automatically; such sagas are flagged for an operator.

pub mod checkout;
pub mod config;
pub mod error;
pub mod events;
pub mod locks;
pub mod orchestrator;
mod postgres;
pub mod services;
mod state;
mod status;
mod step;
pub mod store;

pub use checkout::CheckoutService;
pub use config::{MAX_COMPENSATION_ATTEMPTS, SagaConfig};
pub use error::{Result, SagaError};
pub use events::{EventPublisher, FulfillmentEvent, InMemoryEventPublisher};
pub use locks::OrderLocks;
pub use orchestrator::{CompensationOutcome, OrderSagaOrchestrator};
pub use postgres::PostgresSagaStateStore;
pub use services::{
    Delivery, DeliveryCancellation, DeliveryService, InMemoryDeliveryService,
    InMemoryPaymentProcessor, InventoryService, PaymentMethod, PaymentProcessor, PaymentReceipt,
};
pub use state::SagaState;
pub use status::SagaStatus;
pub use step::{STEP_ORDER, SagaStep};
pub use store::{InMemorySagaStateStore, SagaStateStore};
