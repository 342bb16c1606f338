use thiserror::Error;

/// Errors reported by operator commands.
#[derive(Debug, Error)]
pub enum OpsError {
    /// Required configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inventory error.
    #[error(transparent)]
    Inventory(#[from] inventory::InventoryError),

    /// Saga error.
    #[error(transparent)]
    Saga(#[from] saga::SagaError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OpsError {
    /// Returns the stable error code printed on failure.
    pub fn code(&self) -> &'static str {
        match self {
            OpsError::Config(_) => "INVALID_CONFIGURATION",
            OpsError::Inventory(e) => e.code(),
            OpsError::Saga(e) => e.code(),
            OpsError::Database(_) | OpsError::Serialization(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type for operator commands.
pub type Result<T> = std::result::Result<T, OpsError>;
