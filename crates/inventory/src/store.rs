use async_trait::async_trait;

use crate::{Inventory, MovementQuery, MovementType, ProductId, Result, StockMovement};

/// A transactional, row-locking view of the inventory table and stock ledger.
///
/// Locks taken through [`InventoryTx::lock`] are held until the transaction
/// is committed or dropped. Dropping a transaction without committing
/// discards every staged write.
#[async_trait]
pub trait InventoryTx: Send + Sized {
    /// Returns true if a row exists for the product.
    async fn exists(&mut self, product_id: ProductId) -> Result<bool>;

    /// Stages a new row. Fails with `AlreadyExists` if the product has one.
    async fn insert(&mut self, inventory: &Inventory) -> Result<()>;

    /// Acquires the row lock for a product and returns the row.
    ///
    /// Returns `None` if the row does not exist. Locking the same product
    /// twice in one transaction returns the staged row without re-locking.
    async fn lock(&mut self, product_id: ProductId) -> Result<Option<Inventory>>;

    /// Stages an update to a row previously locked in this transaction.
    async fn update(&mut self, inventory: &Inventory) -> Result<()>;

    /// Stages a ledger entry.
    async fn record_movement(&mut self, movement: &StockMovement) -> Result<()>;

    /// Returns the movement types already recorded for a product under a reference,
    /// including entries staged in this transaction.
    async fn reference_movements(
        &mut self,
        product_id: ProductId,
        reference_id: &str,
    ) -> Result<Vec<MovementType>>;

    /// Commits every staged write and releases the row locks.
    async fn commit(self) -> Result<()>;
}

/// Storage backend for inventory rows and the stock ledger.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// The transaction type handed out by [`InventoryStore::begin`].
    type Tx: InventoryTx;

    /// Starts a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Reads a row without locking it.
    async fn get(&self, product_id: ProductId) -> Result<Option<Inventory>>;

    /// Queries the stock ledger. Results are newest first.
    async fn movements(&self, query: &MovementQuery) -> Result<Vec<StockMovement>>;
}
