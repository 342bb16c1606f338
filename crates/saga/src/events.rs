//! Order fulfillment domain events.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use order::{Money, Order};
use serde::{Deserialize, Serialize};

use crate::{SagaState, SagaStep, services::PaymentMethod};

/// Events emitted as orders and their sagas progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FulfillmentEvent {
    /// An order was confirmed and its stock reserved.
    OrderCreated(OrderCreatedData),

    /// Payment succeeded and the saga completed.
    OrderPaid(OrderPaidData),

    /// The user cancelled the order.
    OrderCancelled(OrderCancelledData),

    /// Every saga step completed.
    SagaCompleted(SagaOutcomeData),

    /// Compensation finished after a failure.
    SagaFailed(SagaFailedData),

    /// Compensation gave up.
    SagaCompensationFailed(SagaFailedData),
}

impl FulfillmentEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            FulfillmentEvent::OrderCreated(_) => "OrderCreated",
            FulfillmentEvent::OrderPaid(_) => "OrderPaid",
            FulfillmentEvent::OrderCancelled(_) => "OrderCancelled",
            FulfillmentEvent::SagaCompleted(_) => "SagaCompleted",
            FulfillmentEvent::SagaFailed(_) => "SagaFailed",
            FulfillmentEvent::SagaCompensationFailed(_) => "SagaCompensationFailed",
        }
    }

    /// Returns the order number the event belongs to.
    pub fn order_number(&self) -> &str {
        match self {
            FulfillmentEvent::OrderCreated(d) => &d.order_number,
            FulfillmentEvent::OrderPaid(d) => &d.order_number,
            FulfillmentEvent::OrderCancelled(d) => &d.order_number,
            FulfillmentEvent::SagaCompleted(d) => &d.order_number,
            FulfillmentEvent::SagaFailed(d) | FulfillmentEvent::SagaCompensationFailed(d) => {
                &d.order_number
            }
        }
    }

    pub fn order_created(order: &Order) -> Self {
        FulfillmentEvent::OrderCreated(OrderCreatedData {
            order_id: order.id(),
            order_number: order.order_number().to_string(),
            user_id: order.user_id().to_string(),
            final_amount: order.final_amount(),
            item_count: order.items().len(),
            occurred_at: Utc::now(),
        })
    }

    pub fn order_paid(order: &Order, payment_id: &str, method: PaymentMethod) -> Self {
        FulfillmentEvent::OrderPaid(OrderPaidData {
            order_id: order.id(),
            order_number: order.order_number().to_string(),
            payment_id: payment_id.to_string(),
            amount: order.final_amount(),
            method,
            occurred_at: Utc::now(),
        })
    }

    pub fn order_cancelled(order: &Order, reason: &str) -> Self {
        FulfillmentEvent::OrderCancelled(OrderCancelledData {
            order_id: order.id(),
            order_number: order.order_number().to_string(),
            user_id: order.user_id().to_string(),
            reason: reason.to_string(),
            occurred_at: Utc::now(),
        })
    }

    pub fn saga_completed(saga: &SagaState) -> Self {
        FulfillmentEvent::SagaCompleted(SagaOutcomeData {
            saga_id: saga.saga_id().to_string(),
            order_number: saga.order_number().to_string(),
            completed_steps: saga.completed_steps().to_vec(),
            occurred_at: Utc::now(),
        })
    }

    pub fn saga_failed(saga: &SagaState, manual_intervention: bool) -> Self {
        FulfillmentEvent::SagaFailed(SagaFailedData::from_state(saga, manual_intervention))
    }

    pub fn saga_compensation_failed(saga: &SagaState) -> Self {
        FulfillmentEvent::SagaCompensationFailed(SagaFailedData::from_state(saga, true))
    }
}

/// Data for OrderCreated event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: String,
    pub final_amount: Money,
    pub item_count: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Data for OrderPaid event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaidData {
    pub order_id: OrderId,
    pub order_number: String,
    pub payment_id: String,
    pub amount: Money,
    pub method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Data for OrderCancelled event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Data for SagaCompleted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaOutcomeData {
    pub saga_id: String,
    pub order_number: String,
    pub completed_steps: Vec<SagaStep>,
    pub occurred_at: DateTime<Utc>,
}

/// Data for SagaFailed and SagaCompensationFailed events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub saga_id: String,
    pub order_number: String,
    /// The step the saga was on when it failed.
    pub failed_step: SagaStep,
    pub reason: Option<String>,
    pub compensation_attempts: u32,
    /// True when an operator has to finish the rollback by hand.
    pub manual_intervention: bool,
    pub occurred_at: DateTime<Utc>,
}

impl SagaFailedData {
    fn from_state(saga: &SagaState, manual_intervention: bool) -> Self {
        Self {
            saga_id: saga.saga_id().to_string(),
            order_number: saga.order_number().to_string(),
            failed_step: saga.current_step(),
            reason: saga.last_error_message().map(str::to_string),
            compensation_attempts: saga.compensation_attempts(),
            manual_intervention,
            occurred_at: Utc::now(),
        }
    }
}

/// Error returned by an event publisher.
#[derive(Debug, thiserror::Error)]
#[error("Event publish failed: {0}")]
pub struct EventPublishError(pub String);

/// Fire-and-forget sink for fulfillment events.
///
/// Callers log publish errors; they never fail the operation that produced
/// the event.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event.
    async fn publish(&self, event: FulfillmentEvent) -> Result<(), EventPublishError>;
}

#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, event: FulfillmentEvent) -> Result<(), EventPublishError> {
        (**self).publish(event).await
    }
}

/// Publishes an event and logs a failure.
pub(crate) async fn publish_logged<E: EventPublisher + ?Sized>(events: &E, event: FulfillmentEvent) {
    let event_type = event.event_type();
    let order_number = event.order_number().to_string();
    if let Err(e) = events.publish(event).await {
        tracing::warn!(event_type, order_number = %order_number, error = %e, "failed to publish event");
    }
}

/// Event publisher that records events in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    events: Arc<RwLock<Vec<FulfillmentEvent>>>,
    fail: Arc<RwLock<bool>>,
}

impl InMemoryEventPublisher {
    /// Creates a new empty publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the publisher to fail every publish.
    pub fn set_fail_on_publish(&self, fail: bool) {
        *self.fail.write().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Returns every recorded event, oldest first.
    pub fn events(&self) -> Vec<FulfillmentEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the type names of the events recorded for an order.
    pub fn event_types_for(&self, order_number: &str) -> Vec<&'static str> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.order_number() == order_number)
            .map(FulfillmentEvent::event_type)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: FulfillmentEvent) -> Result<(), EventPublishError> {
        if *self.fail.read().unwrap_or_else(PoisonError::into_inner) {
            return Err(EventPublishError("simulated publish failure".to_string()));
        }
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}
