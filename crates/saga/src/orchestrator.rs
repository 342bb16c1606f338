//! Order fulfillment saga orchestrator.

use chrono::Utc;
use order::{Order, OrderError, OrderRepository};

use crate::config::{CANCEL_REFERENCE, ORDER_REFERENCE, SagaConfig};
use crate::error::{Result, SagaError};
use crate::events::{EventPublisher, FulfillmentEvent, publish_logged};
use crate::locks::OrderLocks;
use crate::services::{DeliveryService, InventoryService};
use crate::{SagaState, SagaStateStore, SagaStatus, SagaStep};

/// What a compensation run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationOutcome {
    /// Completed steps were unwound and the saga is FAILED.
    ///
    /// `manual_intervention` is set when stock had already been deducted
    /// and cannot be returned automatically.
    Compensated { manual_intervention: bool },
    /// The rollback failed; the saga stays COMPENSATING for another attempt.
    RetryScheduled { attempts: u32 },
    /// The rollback failed for the last allowed time; the saga is
    /// COMPENSATION_FAILED.
    Exhausted,
    /// The order no longer exists; the saga is COMPENSATION_FAILED.
    OrderMissing,
    /// The saga had already finished; nothing was done.
    AlreadyTerminal,
}

enum Unwound {
    Done { manual_intervention: bool },
    OrderMissing,
}

/// Drives the order fulfillment saga.
///
/// The saga is split at the payment boundary. `start_saga` reserves stock
/// and stops at PROCESS_PAYMENT; the caller charges the customer and then
/// calls `complete_saga_after_payment`, which deducts stock, creates the
/// delivery and marks the order paid. A failure at any step runs
/// compensation, which unwinds completed steps in reverse order.
///
/// Entry points take the per-order lock, so one task at a time mutates an
/// order and its saga. Saga state is persisted after every step.
pub struct OrderSagaOrchestrator<St, R, I, D, E>
where
    St: SagaStateStore,
    R: OrderRepository,
    I: InventoryService,
    D: DeliveryService,
    E: EventPublisher,
{
    sagas: St,
    orders: R,
    inventory: I,
    delivery: D,
    events: E,
    locks: OrderLocks,
    config: SagaConfig,
}

impl<St, R, I, D, E> OrderSagaOrchestrator<St, R, I, D, E>
where
    St: SagaStateStore,
    R: OrderRepository,
    I: InventoryService,
    D: DeliveryService,
    E: EventPublisher,
{
    /// Creates an orchestrator with the default configuration.
    pub fn new(sagas: St, orders: R, inventory: I, delivery: D, events: E) -> Self {
        Self {
            sagas,
            orders,
            inventory,
            delivery,
            events,
            locks: OrderLocks::new(),
            config: SagaConfig::default(),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: SagaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sagas(&self) -> &St {
        &self.sagas
    }

    pub fn orders(&self) -> &R {
        &self.orders
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    pub fn delivery(&self) -> &D {
        &self.delivery
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn locks(&self) -> &OrderLocks {
        &self.locks
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Starts the saga for a confirmed, stored order and reserves its stock.
    ///
    /// On success the saga is STARTED at PROCESS_PAYMENT. On failure
    /// compensation runs and `SagaError::ExecutionFailed` is returned.
    #[tracing::instrument(skip(self, order), fields(order_number = %order.order_number()))]
    pub async fn start_saga(&self, order: &Order) -> Result<SagaState> {
        let order_number = order.order_number();
        let _guard = self.locks.lock(order_number).await;

        if let Some(existing) = self.sagas.find_by_order_number(order_number).await? {
            return Err(invalid_state(&existing, "no saga for the order"));
        }

        let mut saga = SagaState::new(order.id(), order_number);
        self.sagas.save(&saga).await?;
        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(saga_id = %saga.saga_id(), "saga started");

        let result: Result<()> = async {
            let quantities = order.quantities_by_product();
            self.inventory
                .reserve_batch(&quantities, ORDER_REFERENCE, order_number, order.user_id())
                .await?;
            saga.proceed_to_next_step();
            self.sagas.save(&saga).await
        }
        .await;

        match result {
            Ok(()) => {
                tracing::info!(saga_id = %saga.saga_id(), "stock reserved, awaiting payment");
                Ok(saga)
            }
            Err(e) => Err(self.fail(&mut saga, e).await),
        }
    }

    /// Finishes the saga once the caller has collected payment.
    ///
    /// The saga must be STARTED at PROCESS_PAYMENT. Records the payment,
    /// deducts the reserved stock, creates the delivery, marks the order
    /// PAID and completes the saga.
    #[tracing::instrument(skip(self))]
    pub async fn complete_saga_after_payment(&self, order_number: &str) -> Result<SagaState> {
        let _guard = self.locks.lock(order_number).await;

        let mut saga = self
            .sagas
            .find_by_order_number(order_number)
            .await?
            .ok_or_else(|| SagaError::NotFound(order_number.to_string()))?;

        if saga.status() != SagaStatus::Started || saga.current_step() != SagaStep::ProcessPayment {
            return Err(invalid_state(&saga, "STARTED at PROCESS_PAYMENT"));
        }

        let result: Result<()> = async {
            let mut order = self
                .orders
                .find_by_order_number(order_number)
                .await?
                .ok_or_else(|| OrderError::NotFound(order_number.to_string()))?;

            saga.proceed_to_next_step();
            self.sagas.save(&saga).await?;

            let quantities = order.quantities_by_product();
            self.inventory
                .deduct_batch(&quantities, ORDER_REFERENCE, order_number, order.user_id())
                .await?;
            saga.proceed_to_next_step();
            self.sagas.save(&saga).await?;

            let delivery = self.delivery.create_delivery(&order).await?;
            tracing::info!(tracking_number = %delivery.tracking_number, "delivery created");
            saga.proceed_to_next_step();
            self.sagas.save(&saga).await?;

            order.mark_as_paid()?;
            self.orders.save(&order).await?;

            saga.complete();
            self.sagas.save(&saga).await
        }
        .await;

        match result {
            Ok(()) => {
                metrics::counter!("saga_completed_total").increment(1);
                record_duration(&saga);
                tracing::info!(saga_id = %saga.saga_id(), "saga completed");
                publish_logged(&self.events, FulfillmentEvent::saga_completed(&saga)).await;
                Ok(saga)
            }
            Err(e) => Err(self.fail(&mut saga, e).await),
        }
    }

    /// Runs compensation for a saga under the order's lock.
    ///
    /// The stored saga is reloaded once the lock is held and compensation
    /// runs on that copy; `saga` is overwritten with the result. A stale
    /// copy therefore never reopens a saga that has since finished.
    #[tracing::instrument(skip(self, saga), fields(order_number = %saga.order_number()))]
    pub async fn compensate(
        &self,
        saga: &mut SagaState,
        error_message: &str,
    ) -> Result<CompensationOutcome> {
        let _guard = self.locks.lock(saga.order_number()).await;

        let mut stored = self
            .sagas
            .find_by_order_number(saga.order_number())
            .await?
            .filter(|stored| stored.saga_id() == saga.saga_id())
            .ok_or_else(|| SagaError::NotFound(saga.order_number().to_string()))?;

        let outcome = self.run_compensation(&mut stored, error_message).await;
        *saga = stored;
        Ok(outcome)
    }

    /// Re-runs compensation for a saga left COMPENSATING by a failed attempt.
    #[tracing::instrument(skip(self))]
    pub async fn resume_compensation(&self, order_number: &str) -> Result<CompensationOutcome> {
        let _guard = self.locks.lock(order_number).await;

        let mut saga = self
            .sagas
            .find_by_order_number(order_number)
            .await?
            .ok_or_else(|| SagaError::NotFound(order_number.to_string()))?;

        if saga.status() != SagaStatus::Compensating {
            return Err(invalid_state(&saga, "COMPENSATING"));
        }

        let error_message = saga
            .last_error_message()
            .unwrap_or("Compensation resumed")
            .to_string();
        Ok(self.run_compensation(&mut saga, &error_message).await)
    }

    /// Loads the saga of an order.
    pub async fn get_saga(&self, order_number: &str) -> Result<SagaState> {
        self.sagas
            .find_by_order_number(order_number)
            .await?
            .ok_or_else(|| SagaError::NotFound(order_number.to_string()))
    }

    /// Lists sagas in a status, for operators.
    pub async fn find_sagas_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>> {
        self.sagas.find_by_status(status).await
    }

    /// Compensates after a step failure and builds the error for the caller.
    async fn fail(&self, saga: &mut SagaState, error: SagaError) -> SagaError {
        let step = saga.current_step();
        let reason = error.to_string();
        tracing::error!(
            step = %step,
            action = step.description(),
            error = %reason,
            code = error.code(),
            "saga step failed"
        );

        let outcome = self.run_compensation(saga, &reason).await;
        tracing::info!(?outcome, "compensation finished");

        SagaError::ExecutionFailed {
            order_number: saga.order_number().to_string(),
            step,
            reason,
        }
    }

    /// Compensation without taking the order lock. Callers hold it.
    async fn run_compensation(&self, saga: &mut SagaState, error_message: &str) -> CompensationOutcome {
        if saga.is_terminal() {
            tracing::info!(status = %saga.status(), "saga already terminal, compensation skipped");
            return CompensationOutcome::AlreadyTerminal;
        }

        tracing::warn!(
            saga_id = %saga.saga_id(),
            step = %saga.current_step(),
            completed = ?saga.completed_steps(),
            "starting compensation"
        );
        saga.start_compensation(error_message);
        self.persist(saga).await;

        let outcome = match self.unwind(saga, error_message).await {
            Ok(Unwound::Done {
                manual_intervention,
            }) => {
                saga.mark_as_failed(error_message);
                CompensationOutcome::Compensated {
                    manual_intervention,
                }
            }
            Ok(Unwound::OrderMissing) => {
                saga.mark_as_compensation_failed("Order not found during compensation");
                CompensationOutcome::OrderMissing
            }
            Err(e) => {
                let attempts = saga.increment_compensation_attempts();
                tracing::error!(attempts, error = %e, "compensation attempt failed");
                if attempts >= self.config.max_compensation_attempts {
                    saga.mark_as_compensation_failed(format!(
                        "Compensation failed after {attempts} attempts: {e}"
                    ));
                    CompensationOutcome::Exhausted
                } else {
                    CompensationOutcome::RetryScheduled { attempts }
                }
            }
        };

        self.persist(saga).await;

        match outcome {
            CompensationOutcome::Compensated {
                manual_intervention,
            } => {
                metrics::counter!("saga_failed_total").increment(1);
                if manual_intervention {
                    metrics::counter!("saga_manual_intervention_total").increment(1);
                }
                record_duration(saga);
                publish_logged(
                    &self.events,
                    FulfillmentEvent::saga_failed(saga, manual_intervention),
                )
                .await;
            }
            CompensationOutcome::Exhausted | CompensationOutcome::OrderMissing => {
                metrics::counter!("saga_compensation_failed_total").increment(1);
                record_duration(saga);
                tracing::error!(
                    saga_id = %saga.saga_id(),
                    reason = saga.last_error_message().unwrap_or_default(),
                    "compensation failed, operator action required"
                );
                publish_logged(&self.events, FulfillmentEvent::saga_compensation_failed(saga))
                    .await;
            }
            CompensationOutcome::RetryScheduled { .. } | CompensationOutcome::AlreadyTerminal => {}
        }

        outcome
    }

    /// Undoes completed steps, latest first.
    async fn unwind(&self, saga: &SagaState, error_message: &str) -> Result<Unwound> {
        let order_number = saga.order_number();
        let Some(mut order) = self.orders.find_by_order_number(order_number).await? else {
            tracing::error!("order not found during compensation");
            return Ok(Unwound::OrderMissing);
        };

        if saga.is_step_completed(SagaStep::CreateDelivery) {
            let cancellation = self.delivery.cancel_delivery(order.id()).await?;
            tracing::info!(?cancellation, "delivery compensated");
        }

        let mut manual_intervention = false;
        if saga.is_step_completed(SagaStep::DeductInventory) {
            manual_intervention = true;
            tracing::error!(
                items = ?order.quantities_by_product(),
                "stock already deducted, manual intervention required"
            );
        } else if saga.is_step_completed(SagaStep::ReserveInventory) {
            let released = self
                .inventory
                .release_reservation(
                    &order.quantities_by_product(),
                    CANCEL_REFERENCE,
                    order_number,
                    &self.config.system_actor,
                )
                .await?;
            tracing::info!(
                released = released.released.len(),
                skipped = released.skipped.len(),
                "reservation compensated"
            );
        }

        if saga.is_step_completed(SagaStep::ProcessPayment) {
            tracing::warn!(
                amount = %order.final_amount(),
                "payment was captured, the paying caller refunds it"
            );
        }

        if order.status().is_cancellable() {
            order.cancel(format!("Saga compensation: {error_message}"))?;
            self.orders.save(&order).await?;
        }

        Ok(Unwound::Done {
            manual_intervention,
        })
    }

    async fn persist(&self, saga: &SagaState) {
        if let Err(e) = self.sagas.save(saga).await {
            tracing::error!(saga_id = %saga.saga_id(), error = %e, "failed to persist saga state");
        }
    }
}

fn invalid_state(saga: &SagaState, expected: &'static str) -> SagaError {
    SagaError::InvalidState {
        order_number: saga.order_number().to_string(),
        expected,
        status: saga.status(),
        step: saga.current_step(),
    }
}

fn record_duration(saga: &SagaState) {
    let end = saga.completed_at().unwrap_or_else(Utc::now);
    let seconds = (end - saga.started_at())
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    metrics::histogram!("saga_duration_seconds", "status" => saga.status().as_str())
        .record(seconds);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use common::ProductId;
    use inventory::{InMemoryInventoryStore, ReservationEngine};
    use order::{InMemoryOrderRepository, Money, OrderStatus};

    use crate::events::InMemoryEventPublisher;
    use crate::services::InMemoryDeliveryService;
    use crate::store::InMemorySagaStateStore;

    const A: ProductId = ProductId::new(1);
    const B: ProductId = ProductId::new(2);

    type Engine = Arc<ReservationEngine<InMemoryInventoryStore>>;
    type Orchestrator = OrderSagaOrchestrator<
        InMemorySagaStateStore,
        InMemoryOrderRepository,
        Engine,
        InMemoryDeliveryService,
        InMemoryEventPublisher,
    >;

    async fn setup() -> (Orchestrator, Engine) {
        let engine = Arc::new(ReservationEngine::without_publisher(
            InMemoryInventoryStore::new(),
        ));
        engine.initialize_inventory(A, 10, "SYSTEM").await.unwrap();
        engine.initialize_inventory(B, 5, "SYSTEM").await.unwrap();
        let orchestrator = OrderSagaOrchestrator::new(
            InMemorySagaStateStore::new(),
            InMemoryOrderRepository::new(),
            engine.clone(),
            InMemoryDeliveryService::new(),
            InMemoryEventPublisher::new(),
        );
        (orchestrator, engine)
    }

    async fn stored_order(orchestrator: &Orchestrator, items: &[(ProductId, u32)]) -> Order {
        let mut order = Order::new("user-1");
        for (product_id, quantity) in items {
            order
                .add_item(*product_id, "Item", Money::from_units(10), *quantity)
                .unwrap();
        }
        order.confirm().unwrap();
        orchestrator.orders().save(&order).await.unwrap();
        order
    }

    async fn counters(engine: &Engine, product_id: ProductId) -> (u32, u32) {
        let inv = engine.get_inventory(product_id).await.unwrap();
        (inv.available, inv.reserved)
    }

    #[tokio::test]
    async fn test_start_saga_reserves_and_waits_for_payment() {
        let (orchestrator, engine) = setup().await;
        let order = stored_order(&orchestrator, &[(A, 3), (B, 2)]).await;

        let saga = orchestrator.start_saga(&order).await.unwrap();

        assert_eq!(saga.status(), SagaStatus::Started);
        assert_eq!(saga.current_step(), SagaStep::ProcessPayment);
        assert_eq!(saga.completed_steps(), &[SagaStep::ReserveInventory]);
        assert_eq!(counters(&engine, A).await, (7, 3));
        assert_eq!(counters(&engine, B).await, (3, 2));

        let stored = orchestrator.get_saga(order.order_number()).await.unwrap();
        assert_eq!(stored, saga);
    }

    #[tokio::test]
    async fn test_start_saga_twice_is_rejected() {
        let (orchestrator, engine) = setup().await;
        let order = stored_order(&orchestrator, &[(A, 1)]).await;
        orchestrator.start_saga(&order).await.unwrap();

        let err = orchestrator.start_saga(&order).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_SAGA_STATE");
        assert_eq!(counters(&engine, A).await, (9, 1));
    }

    #[tokio::test]
    async fn test_insufficient_stock_fails_and_cancels_order() {
        let (orchestrator, engine) = setup().await;
        let order = stored_order(&orchestrator, &[(A, 2), (B, 6)]).await;

        let err = orchestrator.start_saga(&order).await.unwrap_err();
        assert_eq!(err.code(), "SAGA_EXECUTION_FAILED");

        let saga = orchestrator.get_saga(order.order_number()).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Failed);
        assert!(saga.completed_steps().is_empty());
        assert_eq!(counters(&engine, A).await, (10, 0));
        assert_eq!(counters(&engine, B).await, (5, 0));

        let stored = orchestrator
            .orders()
            .find_by_order_number(order.order_number())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), OrderStatus::Cancelled);
        assert!(stored.cancel_reason().unwrap().starts_with("Saga compensation: "));
    }

    #[tokio::test]
    async fn test_complete_requires_payment_step() {
        let (orchestrator, _engine) = setup().await;

        let err = orchestrator
            .complete_saga_after_payment("ORD-missing")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SAGA_NOT_FOUND");

        let order = stored_order(&orchestrator, &[(A, 1)]).await;
        orchestrator.start_saga(&order).await.unwrap();
        orchestrator
            .complete_saga_after_payment(order.order_number())
            .await
            .unwrap();

        let err = orchestrator
            .complete_saga_after_payment(order.order_number())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_SAGA_STATE");
    }

    #[tokio::test]
    async fn test_compensating_a_terminal_saga_is_a_no_op() {
        let (orchestrator, engine) = setup().await;
        let order = stored_order(&orchestrator, &[(A, 4)]).await;
        orchestrator.start_saga(&order).await.unwrap();
        let mut saga = orchestrator
            .complete_saga_after_payment(order.order_number())
            .await
            .unwrap();

        let outcome = orchestrator.compensate(&mut saga, "late failure").await.unwrap();
        assert_eq!(outcome, CompensationOutcome::AlreadyTerminal);
        assert_eq!(saga.status(), SagaStatus::Completed);
        assert_eq!(counters(&engine, A).await, (6, 0));
    }

    #[tokio::test]
    async fn test_stale_copy_cannot_reopen_completed_saga() {
        let (orchestrator, engine) = setup().await;
        let order = stored_order(&orchestrator, &[(A, 2)]).await;
        let mut stale = orchestrator.start_saga(&order).await.unwrap();
        orchestrator
            .complete_saga_after_payment(order.order_number())
            .await
            .unwrap();
        assert_eq!(stale.status(), SagaStatus::Started);

        let outcome = orchestrator.compensate(&mut stale, "late").await.unwrap();
        assert_eq!(outcome, CompensationOutcome::AlreadyTerminal);
        assert_eq!(stale.status(), SagaStatus::Completed);

        let stored = orchestrator.get_saga(order.order_number()).await.unwrap();
        assert_eq!(stored.status(), SagaStatus::Completed);
        let order = orchestrator
            .orders()
            .find_by_order_number(order.order_number())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(counters(&engine, A).await, (8, 0));
        assert!(
            !orchestrator
                .events()
                .event_types_for(order.order_number())
                .contains(&"SagaFailed")
        );
    }

    #[tokio::test]
    async fn test_stale_copy_cannot_rewrite_failed_saga() {
        let (orchestrator, engine) = setup().await;
        let order = stored_order(&orchestrator, &[(A, 2)]).await;
        let mut stale = orchestrator.start_saga(&order).await.unwrap();

        let mut current = stale.clone();
        let first = orchestrator.compensate(&mut current, "payment declined").await.unwrap();
        assert_eq!(
            first,
            CompensationOutcome::Compensated {
                manual_intervention: false
            }
        );

        let second = orchestrator.compensate(&mut stale, "again").await.unwrap();
        assert_eq!(second, CompensationOutcome::AlreadyTerminal);
        assert_eq!(stale.status(), SagaStatus::Failed);
        assert_eq!(stale.last_error_message(), Some("payment declined"));
        assert_eq!(counters(&engine, A).await, (10, 0));
    }

    #[tokio::test]
    async fn test_compensate_unknown_saga_is_not_found() {
        let (orchestrator, _engine) = setup().await;
        let mut saga = SagaState::new(common::OrderId::new(), "ORD-unknown");

        let err = orchestrator.compensate(&mut saga, "boom").await.unwrap_err();
        assert_eq!(err.code(), "SAGA_NOT_FOUND");
        assert_eq!(saga.status(), SagaStatus::Started);
    }

    #[tokio::test]
    async fn test_missing_order_marks_compensation_failed() {
        let (orchestrator, engine) = setup().await;
        let order = stored_order(&orchestrator, &[(A, 2)]).await;
        let mut saga = orchestrator.start_saga(&order).await.unwrap();
        orchestrator.orders().remove(order.order_number()).await;

        let outcome = orchestrator
            .compensate(&mut saga, "order lost")
            .await
            .unwrap();
        assert_eq!(outcome, CompensationOutcome::OrderMissing);
        assert_eq!(saga.status(), SagaStatus::CompensationFailed);
        assert_eq!(
            saga.last_error_message(),
            Some("Order not found during compensation")
        );
        // Nothing can be inferred without the order, so the stock stays held.
        assert_eq!(counters(&engine, A).await, (8, 2));
    }

    #[tokio::test]
    async fn test_resume_requires_compensating_saga() {
        let (orchestrator, _engine) = setup().await;
        let order = stored_order(&orchestrator, &[(A, 1)]).await;
        orchestrator.start_saga(&order).await.unwrap();

        let err = orchestrator
            .resume_compensation(order.order_number())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_SAGA_STATE");

        let err = orchestrator
            .resume_compensation("ORD-missing")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SAGA_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_find_sagas_by_status() {
        let (orchestrator, _engine) = setup().await;
        let ok = stored_order(&orchestrator, &[(A, 1)]).await;
        let too_big = stored_order(&orchestrator, &[(B, 50)]).await;
        orchestrator.start_saga(&ok).await.unwrap();
        orchestrator.start_saga(&too_big).await.unwrap_err();

        let failed = orchestrator
            .find_sagas_by_status(SagaStatus::Failed)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].order_number(), too_big.order_number());

        let started = orchestrator
            .find_sagas_by_status(SagaStatus::Started)
            .await
            .unwrap();
        assert_eq!(started.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_products_are_summed() {
        let (orchestrator, engine) = setup().await;
        let order = stored_order(&orchestrator, &[(A, 2), (A, 3)]).await;
        assert_eq!(
            order.quantities_by_product(),
            HashMap::from([(A, 5)])
        );

        orchestrator.start_saga(&order).await.unwrap();
        assert_eq!(counters(&engine, A).await, (5, 5));
    }
}
