//! Order aggregate for order fulfillment.

pub mod error;
mod order;
mod postgres;
pub mod repository;
mod status;
mod value_objects;

pub use common::{OrderId, ProductId};
pub use error::{OrderError, Result};
pub use order::Order;
pub use postgres::PostgresOrderRepository;
pub use repository::{InMemoryOrderRepository, OrderRepository};
pub use status::OrderStatus;
pub use value_objects::{Money, OrderItem, ShippingAddress, generate_order_number};
