//! Collaborator traits and in-memory implementations used by the saga.

pub mod delivery;
pub mod inventory;
pub mod payment;

pub use delivery::{Delivery, DeliveryCancellation, DeliveryService, InMemoryDeliveryService};
pub use self::inventory::InventoryService;
pub use payment::{InMemoryPaymentProcessor, PaymentMethod, PaymentProcessor, PaymentReceipt};
