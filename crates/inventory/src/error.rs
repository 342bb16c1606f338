use thiserror::Error;

use crate::ProductId;

/// Errors that can occur when reading or mutating inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// No inventory row exists for the product.
    #[error("Inventory not found for product {0}")]
    NotFound(ProductId),

    /// An inventory row already exists for the product.
    #[error("Inventory already exists for product {0}")]
    AlreadyExists(ProductId),

    /// Not enough available stock to reserve.
    #[error(
        "Insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Not enough reserved stock to deduct.
    #[error(
        "Cannot deduct {requested} units from product {product_id}: only {reserved} reserved"
    )]
    DeductionFailed {
        product_id: ProductId,
        requested: u32,
        reserved: u32,
    },

    /// Not enough reserved stock to release.
    #[error(
        "Cannot release {requested} units for product {product_id}: only {reserved} reserved"
    )]
    ReleaseFailed {
        product_id: ProductId,
        requested: u32,
        reserved: u32,
    },

    /// The quantity is zero or would overflow a counter.
    #[error("Invalid stock quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// A persisted row violates the non-negative counter invariant.
    #[error("Corrupt inventory row for product {product_id}: {reason}")]
    CorruptRow {
        product_id: ProductId,
        reason: String,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InventoryError {
    /// Returns the stable error code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            InventoryError::NotFound(_) => "INVENTORY_NOT_FOUND",
            InventoryError::AlreadyExists(_) => "INVENTORY_ALREADY_EXISTS",
            InventoryError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            InventoryError::DeductionFailed { .. } => "STOCK_DEDUCTION_FAILED",
            InventoryError::ReleaseFailed { .. } => "STOCK_RELEASE_FAILED",
            InventoryError::InvalidQuantity { .. } => "INVALID_STOCK_QUANTITY",
            InventoryError::CorruptRow { .. }
            | InventoryError::Database(_)
            | InventoryError::Migration(_)
            | InventoryError::Serialization(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true for business conflicts (as opposed to missing rows or infrastructure).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            InventoryError::AlreadyExists(_)
                | InventoryError::InsufficientStock { .. }
                | InventoryError::DeductionFailed { .. }
                | InventoryError::ReleaseFailed { .. }
        )
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
