//! Reserve/deduct/release/add operations over a transactional inventory store.

use std::collections::{BTreeMap, HashMap};

use crate::{
    Inventory, InventoryError, InventoryUpdate, MovementContext, MovementQuery, MovementType,
    ProductId, Result, StockMovement,
    publisher::{InventoryPublisher, NoopInventoryPublisher},
    store::{InventoryStore, InventoryTx},
};

/// Result of [`ReservationEngine::release_reservation`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Rows whose reservation was returned to available stock.
    pub released: Vec<Inventory>,
    /// Products with nothing outstanding for the reference.
    pub skipped: Vec<ProductId>,
}

impl ReleaseOutcome {
    /// Returns true if nothing was released.
    pub fn is_noop(&self) -> bool {
        self.released.is_empty()
    }
}

/// The inventory reservation engine.
///
/// Every mutating call runs in one store transaction: it locks the affected
/// rows, applies the counter change, writes exactly one ledger entry per row
/// and commits. Multi-row calls lock rows in ascending product order and load
/// every row before changing any of them. Notifications go out after commit.
pub struct ReservationEngine<S, P = NoopInventoryPublisher> {
    store: S,
    publisher: P,
}

impl<S> ReservationEngine<S>
where
    S: InventoryStore,
{
    /// Creates an engine that publishes nothing.
    pub fn without_publisher(store: S) -> Self {
        Self::new(store, NoopInventoryPublisher)
    }
}

impl<S, P> ReservationEngine<S, P>
where
    S: InventoryStore,
    P: InventoryPublisher,
{
    /// Creates a new engine.
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the publisher.
    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Reads a product's counters without locking.
    pub async fn get_inventory(&self, product_id: ProductId) -> Result<Inventory> {
        self.store
            .get(product_id)
            .await?
            .ok_or(InventoryError::NotFound(product_id))
    }

    /// Creates the inventory row for a product.
    #[tracing::instrument(skip(self))]
    pub async fn initialize_inventory(
        &self,
        product_id: ProductId,
        initial_stock: u32,
        actor: &str,
    ) -> Result<Inventory> {
        let reference_id = product_id.to_string();
        let context = MovementContext {
            reference_type: "SYSTEM",
            reference_id: &reference_id,
            reason: "Initial stock setup",
            performed_by: actor,
        };

        let result: Result<Inventory> = async {
            let mut tx = self.store.begin().await?;
            if tx.exists(product_id).await? {
                return Err(InventoryError::AlreadyExists(product_id));
            }

            let inventory = Inventory::new(product_id, initial_stock);
            let empty = Inventory {
                available: 0,
                ..inventory.clone()
            };
            tx.insert(&inventory).await?;
            tx.record_movement(&StockMovement::record(
                MovementType::Initial,
                initial_stock,
                &empty,
                &inventory,
                &context,
            ))
            .await?;
            tx.commit().await?;
            Ok(inventory)
        }
        .await;

        let inventory = record_outcome("initialize", result)?;
        tracing::info!(product_id = %product_id, initial_stock, "inventory initialized");
        Ok(inventory)
    }

    /// Moves `quantity` from available to reserved.
    #[tracing::instrument(skip(self))]
    pub async fn reserve_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<Inventory> {
        let context = MovementContext {
            reference_type,
            reference_id,
            reason: "Stock reserved for order",
            performed_by: actor,
        };
        let inventory = self
            .mutate_one("reserve", product_id, MovementType::Reserve, quantity, &context)
            .await?;
        tracing::info!(product_id = %product_id, quantity, reference_id, "stock reserved");
        Ok(inventory)
    }

    /// Permanently removes `quantity` of reserved stock.
    #[tracing::instrument(skip(self))]
    pub async fn deduct_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<Inventory> {
        let context = MovementContext {
            reference_type,
            reference_id,
            reason: "Stock deducted after payment",
            performed_by: actor,
        };
        let inventory = self
            .mutate_one("deduct", product_id, MovementType::Deduct, quantity, &context)
            .await?;
        tracing::info!(product_id = %product_id, quantity, reference_id, "stock deducted");
        Ok(inventory)
    }

    /// Moves `quantity` from reserved back to available.
    #[tracing::instrument(skip(self))]
    pub async fn release_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<Inventory> {
        let context = MovementContext {
            reference_type,
            reference_id,
            reason: "Stock released due to cancellation",
            performed_by: actor,
        };
        let inventory = self
            .mutate_one("release", product_id, MovementType::Release, quantity, &context)
            .await?;
        tracing::info!(product_id = %product_id, quantity, reference_id, "stock released");
        Ok(inventory)
    }

    /// Adds inbound stock to available.
    #[tracing::instrument(skip(self))]
    pub async fn add_stock(
        &self,
        product_id: ProductId,
        quantity: u32,
        reason: &str,
        actor: &str,
    ) -> Result<Inventory> {
        let context = MovementContext {
            reference_type: "ADMIN",
            reference_id: actor,
            reason,
            performed_by: actor,
        };
        let inventory = self
            .mutate_one("add", product_id, MovementType::Inbound, quantity, &context)
            .await?;
        tracing::info!(product_id = %product_id, quantity, actor, "stock added");
        Ok(inventory)
    }

    /// Reserves several products atomically.
    #[tracing::instrument(skip(self, quantities), fields(products = quantities.len()))]
    pub async fn reserve_stock_batch(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<Vec<Inventory>> {
        let context = MovementContext {
            reference_type,
            reference_id,
            reason: "Stock reserved for order (batch)",
            performed_by: actor,
        };
        let rows = self
            .mutate_batch("reserve_batch", quantities, MovementType::Reserve, &context)
            .await?;
        tracing::info!(products = rows.len(), reference_id, "batch stock reserved");
        Ok(rows)
    }

    /// Deducts several products atomically.
    #[tracing::instrument(skip(self, quantities), fields(products = quantities.len()))]
    pub async fn deduct_stock_batch(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<Vec<Inventory>> {
        let context = MovementContext {
            reference_type,
            reference_id,
            reason: "Stock deducted after payment (batch)",
            performed_by: actor,
        };
        let rows = self
            .mutate_batch("deduct_batch", quantities, MovementType::Deduct, &context)
            .await?;
        tracing::info!(products = rows.len(), reference_id, "batch stock deducted");
        Ok(rows)
    }

    /// Releases several products atomically.
    #[tracing::instrument(skip(self, quantities), fields(products = quantities.len()))]
    pub async fn release_stock_batch(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<Vec<Inventory>> {
        let context = MovementContext {
            reference_type,
            reference_id,
            reason: "Stock released due to cancellation (batch)",
            performed_by: actor,
        };
        let rows = self
            .mutate_batch("release_batch", quantities, MovementType::Release, &context)
            .await?;
        tracing::info!(products = rows.len(), reference_id, "batch stock released");
        Ok(rows)
    }

    /// Releases the outstanding reservation held under `reference_id`.
    ///
    /// A product is released only if the ledger holds a RESERVE for the
    /// reference and no RELEASE or DEDUCT for it yet; the check runs under
    /// the row lock, so repeated or racing calls release at most once.
    #[tracing::instrument(skip(self, quantities), fields(products = quantities.len()))]
    pub async fn release_reservation(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<ReleaseOutcome> {
        let context = MovementContext {
            reference_type,
            reference_id,
            reason: "Stock released due to cancellation",
            performed_by: actor,
        };

        let result: Result<ReleaseOutcome> = async {
            let mut outcome = ReleaseOutcome::default();
            if quantities.is_empty() {
                return Ok(outcome);
            }

            let mut tx = self.store.begin().await?;
            let locked = lock_sorted(&mut tx, quantities).await?;

            for (before, quantity) in locked {
                let seen = tx
                    .reference_movements(before.product_id, reference_id)
                    .await?;
                let reserved = seen.contains(&MovementType::Reserve);
                let settled = seen
                    .iter()
                    .any(|m| matches!(m, MovementType::Release | MovementType::Deduct));
                if !reserved || settled {
                    outcome.skipped.push(before.product_id);
                    continue;
                }

                let after = apply_and_record(
                    &mut tx,
                    &before,
                    MovementType::Release,
                    quantity,
                    &context,
                )
                .await?;
                outcome.released.push(after);
            }

            tx.commit().await?;
            Ok(outcome)
        }
        .await;

        let outcome = record_outcome("release_reservation", result)?;
        for row in &outcome.released {
            self.publish(row).await;
        }
        if !outcome.skipped.is_empty() {
            tracing::info!(
                reference_id,
                skipped = ?outcome.skipped,
                "reservation already settled for some products"
            );
        }
        Ok(outcome)
    }

    /// Queries the stock ledger, newest first.
    pub async fn get_stock_movements(&self, query: &MovementQuery) -> Result<Vec<StockMovement>> {
        self.store.movements(query).await
    }

    async fn mutate_one(
        &self,
        operation: &'static str,
        product_id: ProductId,
        movement_type: MovementType,
        quantity: u32,
        context: &MovementContext<'_>,
    ) -> Result<Inventory> {
        let result: Result<Inventory> = async {
            let mut tx = self.store.begin().await?;
            let before = tx
                .lock(product_id)
                .await?
                .ok_or(InventoryError::NotFound(product_id))?;
            let after = apply_and_record(&mut tx, &before, movement_type, quantity, context).await?;
            tx.commit().await?;
            Ok(after)
        }
        .await;

        let inventory = record_outcome(operation, result)?;
        self.publish(&inventory).await;
        Ok(inventory)
    }

    async fn mutate_batch(
        &self,
        operation: &'static str,
        quantities: &HashMap<ProductId, u32>,
        movement_type: MovementType,
        context: &MovementContext<'_>,
    ) -> Result<Vec<Inventory>> {
        if quantities.is_empty() {
            return Ok(Vec::new());
        }

        let result: Result<Vec<Inventory>> = async {
            let mut tx = self.store.begin().await?;
            let locked = lock_sorted(&mut tx, quantities).await?;

            let mut updated = Vec::with_capacity(locked.len());
            for (before, quantity) in locked {
                updated
                    .push(apply_and_record(&mut tx, &before, movement_type, quantity, context).await?);
            }

            tx.commit().await?;
            Ok(updated)
        }
        .await;

        let rows = record_outcome(operation, result)?;
        for row in &rows {
            self.publish(row).await;
        }
        Ok(rows)
    }

    async fn publish(&self, inventory: &Inventory) {
        let update = InventoryUpdate::from_inventory(inventory);
        match self.publisher.publish(&update).await {
            Ok(()) => tracing::debug!(
                channel = %update.channel(),
                available = update.available,
                reserved = update.reserved,
                "published inventory update"
            ),
            Err(e) => tracing::warn!(
                channel = %update.channel(),
                error = %e,
                "failed to publish inventory update"
            ),
        }
    }
}

/// Locks every product in ascending ID order and returns the rows in that order.
///
/// Fails with `NotFound` before anything is modified if any row is missing.
async fn lock_sorted<T: InventoryTx>(
    tx: &mut T,
    quantities: &HashMap<ProductId, u32>,
) -> Result<Vec<(Inventory, u32)>> {
    let ordered: BTreeMap<ProductId, u32> = quantities.iter().map(|(&id, &q)| (id, q)).collect();

    let mut locked = Vec::with_capacity(ordered.len());
    for (product_id, quantity) in ordered {
        let row = tx
            .lock(product_id)
            .await?
            .ok_or(InventoryError::NotFound(product_id))?;
        locked.push((row, quantity));
    }
    Ok(locked)
}

async fn apply_and_record<T: InventoryTx>(
    tx: &mut T,
    before: &Inventory,
    movement_type: MovementType,
    quantity: u32,
    context: &MovementContext<'_>,
) -> Result<Inventory> {
    let mut after = before.clone();
    after.apply(movement_type, quantity)?;
    tx.update(&after).await?;
    tx.record_movement(&StockMovement::record(
        movement_type,
        quantity,
        before,
        &after,
        context,
    ))
    .await?;
    Ok(after)
}

fn record_outcome<T>(operation: &'static str, result: Result<T>) -> Result<T> {
    metrics::counter!("inventory_operations_total", "operation" => operation).increment(1);
    if let Err(ref e) = result {
        metrics::counter!("inventory_operation_failures_total", "operation" => operation)
            .increment(1);
        tracing::warn!(operation, code = e.code(), error = %e, "inventory operation failed");
    }
    result
}
