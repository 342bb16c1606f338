use thiserror::Error;

use crate::OrderStatus;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// No order exists with the given order number.
    #[error("Order not found: {0}")]
    NotFound(String),

    /// The order is not in a status that allows the action.
    #[error("Invalid order status: cannot {action} from {current} status")]
    InvalidStatus {
        current: OrderStatus,
        action: &'static str,
    },

    /// The order can no longer be cancelled or refunded.
    #[error("Order {order_number} cannot be cancelled in {status} status")]
    CannotBeCancelled {
        order_number: String,
        status: OrderStatus,
    },

    /// The order belongs to a different user.
    #[error("Order {order_number} does not belong to user {user_id}")]
    UserMismatch {
        order_number: String,
        user_id: String,
    },

    /// A line item has a zero quantity or negative price.
    #[error("Invalid order item for product {product_id}: {reason}")]
    InvalidItem {
        product_id: common::ProductId,
        reason: &'static str,
    },

    /// The order has no line items.
    #[error("Order has no items")]
    NoItems,

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The order could not be stored or loaded.
    #[error("Order storage error: {0}")]
    Storage(String),
}

impl OrderError {
    /// Returns the stable error code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::NotFound(_) => "ORDER_NOT_FOUND",
            OrderError::InvalidStatus { .. } => "INVALID_ORDER_STATUS",
            OrderError::CannotBeCancelled { .. } => "ORDER_CANNOT_BE_CANCELLED",
            OrderError::UserMismatch { .. } => "ORDER_USER_MISMATCH",
            OrderError::InvalidItem { .. } | OrderError::NoItems => "INVALID_ORDER_ITEM",
            OrderError::Database(_) | OrderError::Storage(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;
