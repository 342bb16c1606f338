//! Inventory operations the saga needs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::ProductId;
use inventory::{InventoryPublisher, InventoryStore, ReleaseOutcome, ReservationEngine};

use crate::error::Result;

/// Trait for the inventory calls made by saga steps and compensation.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves every product in the batch, or nothing.
    async fn reserve_batch(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<()>;

    /// Deducts every product in the batch from reserved stock, or nothing.
    async fn deduct_batch(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<()>;

    /// Releases whatever is still reserved under `reference_id`.
    async fn release_reservation(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<ReleaseOutcome>;
}

#[async_trait]
impl<S, P> InventoryService for ReservationEngine<S, P>
where
    S: InventoryStore,
    P: InventoryPublisher,
{
    async fn reserve_batch(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<()> {
        self.reserve_stock_batch(quantities, reference_type, reference_id, actor)
            .await?;
        Ok(())
    }

    async fn deduct_batch(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<()> {
        self.deduct_stock_batch(quantities, reference_type, reference_id, actor)
            .await?;
        Ok(())
    }

    async fn release_reservation(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<ReleaseOutcome> {
        Ok(ReservationEngine::release_reservation(
            self,
            quantities,
            reference_type,
            reference_id,
            actor,
        )
        .await?)
    }
}

#[async_trait]
impl<T: InventoryService + ?Sized> InventoryService for Arc<T> {
    async fn reserve_batch(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<()> {
        (**self)
            .reserve_batch(quantities, reference_type, reference_id, actor)
            .await
    }

    async fn deduct_batch(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<()> {
        (**self)
            .deduct_batch(quantities, reference_type, reference_id, actor)
            .await
    }

    async fn release_reservation(
        &self,
        quantities: &HashMap<ProductId, u32>,
        reference_type: &str,
        reference_id: &str,
        actor: &str,
    ) -> Result<ReleaseOutcome> {
        (**self)
            .release_reservation(quantities, reference_type, reference_id, actor)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory::InMemoryInventoryStore;

    const A: ProductId = ProductId::new(1);

    #[tokio::test]
    async fn test_engine_as_inventory_service() {
        let engine = ReservationEngine::without_publisher(InMemoryInventoryStore::new());
        engine.initialize_inventory(A, 10, "SYSTEM").await.unwrap();
        let service: Arc<dyn InventoryService> = Arc::new(engine);

        let quantities = HashMap::from([(A, 4)]);
        service
            .reserve_batch(&quantities, "ORDER", "ORD-1", "user-1")
            .await
            .unwrap();

        let outcome = service
            .release_reservation(&quantities, "ORDER_CANCEL", "ORD-1", "SYSTEM")
            .await
            .unwrap();
        assert_eq!(outcome.released.len(), 1);
        assert_eq!(outcome.released[0].available, 10);

        let err = service
            .deduct_batch(&quantities, "ORDER", "ORD-1", "user-1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STOCK_DEDUCTION_FAILED");
    }
}
