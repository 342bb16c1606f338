//! Order status machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// Pending ──► Confirmed ──► Paid ──► Shipping ──► Delivered
///    │            │           │          │            │
///    └────────────┴──► Cancelled         └────────────┴──► Refunded
///                                 (Paid also ──► Refunded)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order created, not yet confirmed.
    #[default]
    Pending,

    /// Order confirmed and stock reserved, awaiting payment.
    Confirmed,

    /// Payment captured and stock deducted.
    Paid,

    /// Handed to the delivery provider.
    Shipping,

    /// Delivered to the customer.
    Delivered,

    /// Order was cancelled (terminal state).
    Cancelled,

    /// Payment was refunded (terminal state).
    Refunded,
}

impl OrderStatus {
    /// Returns true if the order can still be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    /// Returns true if the order can be refunded.
    pub fn is_refundable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Shipping | OrderStatus::Delivered
        )
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Paid => "PAID",
            OrderStatus::Shipping => "SHIPPING",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    /// Parses a stored status name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(OrderStatus::Pending),
            "CONFIRMED" => Some(OrderStatus::Confirmed),
            "PAID" => Some(OrderStatus::Paid),
            "SHIPPING" => Some(OrderStatus::Shipping),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "REFUNDED" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
