//! Delivery service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::OrderId;
use order::Order;

use crate::error::{Result, SagaError};

/// Delivery record created for a paid order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// The tracking number assigned by the delivery service.
    pub tracking_number: String,
    pub order_id: OrderId,
    pub order_number: String,
    pub cancelled: bool,
}

/// What a cancel request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryCancellation {
    /// The delivery was active and is now cancelled.
    Cancelled { tracking_number: String },
    /// The delivery had been cancelled before; nothing changed.
    AlreadyCancelled { tracking_number: String },
    /// No delivery exists for the order.
    NotFound,
}

/// Trait for delivery operations.
#[async_trait]
pub trait DeliveryService: Send + Sync {
    /// Creates a delivery for an order.
    async fn create_delivery(&self, order: &Order) -> Result<Delivery>;

    /// Cancels the delivery of an order. Safe to call repeatedly.
    async fn cancel_delivery(&self, order_id: OrderId) -> Result<DeliveryCancellation>;
}

#[async_trait]
impl<T: DeliveryService + ?Sized> DeliveryService for Arc<T> {
    async fn create_delivery(&self, order: &Order) -> Result<Delivery> {
        (**self).create_delivery(order).await
    }

    async fn cancel_delivery(&self, order_id: OrderId) -> Result<DeliveryCancellation> {
        (**self).cancel_delivery(order_id).await
    }
}

#[derive(Debug, Default)]
struct InMemoryDeliveryState {
    deliveries: HashMap<OrderId, Delivery>,
    next_id: u32,
    fail_on_create: bool,
    fail_on_cancel: bool,
}

/// In-memory delivery service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeliveryService {
    state: Arc<RwLock<InMemoryDeliveryState>>,
}

impl InMemoryDeliveryService {
    /// Creates a new in-memory delivery service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail every create_delivery call.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.write().fail_on_create = fail;
    }

    /// Configures the service to fail every cancel_delivery call.
    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.write().fail_on_cancel = fail;
    }

    /// Returns the number of deliveries that are not cancelled.
    pub fn active_count(&self) -> usize {
        self.read()
            .deliveries
            .values()
            .filter(|d| !d.cancelled)
            .count()
    }

    /// Returns the delivery for an order, if one was created.
    pub fn delivery_for(&self, order_id: OrderId) -> Option<Delivery> {
        self.read().deliveries.get(&order_id).cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryDeliveryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryDeliveryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DeliveryService for InMemoryDeliveryService {
    async fn create_delivery(&self, order: &Order) -> Result<Delivery> {
        let mut state = self.write();

        if state.fail_on_create {
            return Err(SagaError::DeliveryFailed {
                order_number: order.order_number().to_string(),
                reason: "Delivery service unavailable".to_string(),
            });
        }

        state.next_id += 1;
        let delivery = Delivery {
            tracking_number: format!("TRK-{:06}", state.next_id),
            order_id: order.id(),
            order_number: order.order_number().to_string(),
            cancelled: false,
        };
        state.deliveries.insert(order.id(), delivery.clone());

        tracing::info!(
            order_number = %delivery.order_number,
            tracking_number = %delivery.tracking_number,
            "delivery created"
        );
        Ok(delivery)
    }

    async fn cancel_delivery(&self, order_id: OrderId) -> Result<DeliveryCancellation> {
        let mut state = self.write();

        if state.fail_on_cancel {
            return Err(SagaError::DeliveryFailed {
                order_number: order_id.to_string(),
                reason: "Delivery cancellation unavailable".to_string(),
            });
        }

        let Some(delivery) = state.deliveries.get_mut(&order_id) else {
            tracing::info!(order_id = %order_id, "no delivery to cancel");
            return Ok(DeliveryCancellation::NotFound);
        };

        let tracking_number = delivery.tracking_number.clone();
        if delivery.cancelled {
            tracing::warn!(
                order_id = %order_id,
                tracking_number = %tracking_number,
                "delivery already cancelled"
            );
            return Ok(DeliveryCancellation::AlreadyCancelled { tracking_number });
        }

        delivery.cancelled = true;
        tracing::info!(order_id = %order_id, tracking_number = %tracking_number, "delivery cancelled");
        Ok(DeliveryCancellation::Cancelled { tracking_number })
    }
}
