use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::RwLock;

use crate::{Order, OrderError, Result};

/// Storage for order aggregates, keyed by order number.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts or replaces an order.
    async fn save(&self, order: &Order) -> Result<()>;

    /// Loads an order by its external order number.
    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>>;

    /// Loads an order by its internal ID.
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists a user's orders, newest first.
    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>>;
}

#[async_trait]
impl<R: OrderRepository + ?Sized> OrderRepository for Arc<R> {
    async fn save(&self, order: &Order) -> Result<()> {
        (**self).save(order).await
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>> {
        (**self).find_by_order_number(order_number).await
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        (**self).find_by_id(id).await
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>> {
        (**self).find_by_user(user_id).await
    }
}

/// In-memory order repository for testing.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<String, Order>>>,
    fail_on_save: Arc<AtomicBool>,
}

impl InMemoryOrderRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the repository to fail on every save.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.fail_on_save.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Removes an order. Used to simulate lost records.
    pub async fn remove(&self, order_number: &str) -> Option<Order> {
        self.orders.write().await.remove(order_number)
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save(&self, order: &Order) -> Result<()> {
        if self.fail_on_save.load(Ordering::SeqCst) {
            return Err(OrderError::Storage("simulated save failure".to_string()));
        }
        self.orders
            .write()
            .await
            .insert(order.order_number().to_string(), order.clone());
        Ok(())
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(order_number).cloned())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.id() == id)
            .cloned())
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.is_owned_by(user_id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(orders)
    }
}
