//! Saga error types.

use thiserror::Error;

use crate::{SagaStatus, SagaStep};

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No saga exists for the order.
    #[error("Saga not found for order {0}")]
    NotFound(String),

    /// The saga is not in a state that allows the operation.
    #[error("Invalid saga state for order {order_number}: expected {expected}, found {status} at {step}")]
    InvalidState {
        order_number: String,
        expected: &'static str,
        status: SagaStatus,
        step: SagaStep,
    },

    /// A saga step failed and compensation ran.
    #[error("Saga execution failed for order {order_number} at {step}: {reason}")]
    ExecutionFailed {
        order_number: String,
        step: SagaStep,
        reason: String,
    },

    /// The payment processor declined or failed the charge.
    #[error("Payment failed for order {order_number}: {reason}")]
    PaymentFailed {
        order_number: String,
        reason: String,
    },

    /// The order already has a payment that was not refunded.
    #[error("Payment already completed for order {0}")]
    PaymentAlreadyCompleted(String),

    /// A refund could not be made.
    #[error("Refund failed for payment {payment_id}: {reason}")]
    RefundFailed {
        payment_id: String,
        reason: String,
    },

    /// The delivery service rejected the request.
    #[error("Delivery failed for order {order_number}: {reason}")]
    DeliveryFailed {
        order_number: String,
        reason: String,
    },

    /// Inventory error.
    #[error(transparent)]
    Inventory(#[from] inventory::InventoryError),

    /// Order error.
    #[error(transparent)]
    Order(#[from] order::OrderError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The saga state could not be stored or loaded.
    #[error("Saga storage error: {0}")]
    Storage(String),
}

impl SagaError {
    /// Returns the stable error code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            SagaError::NotFound(_) => "SAGA_NOT_FOUND",
            SagaError::InvalidState { .. } => "INVALID_SAGA_STATE",
            SagaError::ExecutionFailed { .. } => "SAGA_EXECUTION_FAILED",
            SagaError::PaymentFailed { .. } => "PAYMENT_FAILED",
            SagaError::PaymentAlreadyCompleted(_) => "PAYMENT_ALREADY_COMPLETED",
            SagaError::RefundFailed { .. } => "PAYMENT_REFUND_FAILED",
            SagaError::DeliveryFailed { .. } => "DELIVERY_FAILED",
            SagaError::Inventory(e) => e.code(),
            SagaError::Order(e) => e.code(),
            SagaError::Database(_) | SagaError::Serialization(_) | SagaError::Storage(_) => {
                "INTERNAL_ERROR"
            }
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
