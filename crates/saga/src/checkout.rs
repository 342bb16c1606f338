//! Order checkout: creation, payment and user cancellation around the saga.

use order::{Money, Order, OrderError, OrderItem, OrderRepository, OrderStatus, ShippingAddress};

use crate::config::CANCEL_REFERENCE;
use crate::error::{Result, SagaError};
use crate::events::{EventPublisher, FulfillmentEvent, publish_logged};
use crate::orchestrator::OrderSagaOrchestrator;
use crate::services::{
    DeliveryService, InventoryService, PaymentMethod, PaymentProcessor, PaymentReceipt,
};
use crate::SagaStateStore;

/// Entry point for order lifecycle requests.
///
/// Payment is charged here, outside any lock, between the two halves of
/// the saga.
pub struct CheckoutService<St, R, I, D, E, P>
where
    St: SagaStateStore,
    R: OrderRepository,
    I: InventoryService,
    D: DeliveryService,
    E: EventPublisher,
    P: PaymentProcessor,
{
    orchestrator: OrderSagaOrchestrator<St, R, I, D, E>,
    payments: P,
}

impl<St, R, I, D, E, P> CheckoutService<St, R, I, D, E, P>
where
    St: SagaStateStore,
    R: OrderRepository,
    I: InventoryService,
    D: DeliveryService,
    E: EventPublisher,
    P: PaymentProcessor,
{
    /// Creates a new checkout service.
    pub fn new(orchestrator: OrderSagaOrchestrator<St, R, I, D, E>, payments: P) -> Self {
        Self {
            orchestrator,
            payments,
        }
    }

    pub fn orchestrator(&self) -> &OrderSagaOrchestrator<St, R, I, D, E> {
        &self.orchestrator
    }

    pub fn payments(&self) -> &P {
        &self.payments
    }

    /// Creates a confirmed order and reserves its stock.
    ///
    /// If the reservation fails the order is cancelled by compensation and
    /// `SAGA_EXECUTION_FAILED` is returned.
    #[tracing::instrument(skip(self, items, discount, address), fields(items = items.len()))]
    pub async fn create_order(
        &self,
        user_id: &str,
        items: &[OrderItem],
        discount: Option<Money>,
        address: Option<ShippingAddress>,
    ) -> Result<Order> {
        let mut order = Order::new(user_id);
        if let Some(address) = address {
            order = order.with_shipping_address(address);
        }
        for item in items {
            order.add_item(
                item.product_id,
                item.product_name.clone(),
                item.price,
                item.quantity,
            )?;
        }
        if let Some(discount) = discount {
            order.apply_discount(discount);
        }
        order.confirm()?;
        self.orchestrator.orders().save(&order).await?;

        self.orchestrator.start_saga(&order).await?;

        tracing::info!(
            order_number = %order.order_number(),
            amount = %order.final_amount(),
            "order created"
        );
        publish_logged(self.orchestrator.events(), FulfillmentEvent::order_created(&order)).await;
        Ok(order)
    }

    /// Charges a confirmed order and completes its saga.
    ///
    /// A declined charge returns `PAYMENT_FAILED` and leaves the reservation
    /// in place so the user can retry or cancel. If the saga cannot be
    /// completed after the charge, the payment is refunded and the saga
    /// error is returned.
    #[tracing::instrument(skip(self))]
    pub async fn pay_order(
        &self,
        user_id: &str,
        order_number: &str,
        method: PaymentMethod,
    ) -> Result<Order> {
        let order = self.load_owned(user_id, order_number).await?;
        if order.status() != OrderStatus::Confirmed {
            return Err(OrderError::InvalidStatus {
                current: order.status(),
                action: "pay",
            }
            .into());
        }

        let receipt = self
            .payments
            .charge(order_number, order.final_amount(), method)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, code = e.code(), "payment failed"))?;
        tracing::info!(payment_id = %receipt.payment_id, "payment captured");

        if let Err(e) = self
            .orchestrator
            .complete_saga_after_payment(order_number)
            .await
        {
            self.refund(&receipt, &e).await;
            return Err(e);
        }

        let order = self.load_owned(user_id, order_number).await?;
        publish_logged(
            self.orchestrator.events(),
            FulfillmentEvent::order_paid(&order, &receipt.payment_id, method),
        )
        .await;
        Ok(order)
    }

    /// Cancels an order on the user's request.
    ///
    /// Stock release failures are logged and do not block the cancellation.
    /// The release only returns what is still reserved for the order, so it
    /// is safe after a compensation already released it.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, user_id: &str, order_number: &str, reason: &str) -> Result<Order> {
        let _guard = self.orchestrator.locks().lock(order_number).await;

        let mut order = self.load_owned(user_id, order_number).await?;
        if !order.status().is_cancellable() {
            return Err(OrderError::CannotBeCancelled {
                order_number: order_number.to_string(),
                status: order.status(),
            }
            .into());
        }

        match self
            .orchestrator
            .inventory()
            .release_reservation(
                &order.quantities_by_product(),
                CANCEL_REFERENCE,
                order_number,
                user_id,
            )
            .await
        {
            Ok(outcome) => tracing::info!(
                released = outcome.released.len(),
                skipped = outcome.skipped.len(),
                "stock released for cancelled order"
            ),
            Err(e) => tracing::warn!(error = %e, "failed to release stock, cancelling anyway"),
        }

        order.cancel(reason)?;
        self.orchestrator.orders().save(&order).await?;

        let sagas = self.orchestrator.sagas();
        if let Some(mut saga) = sagas.find_by_order_number(order_number).await? {
            if !saga.is_terminal() {
                saga.mark_as_failed(format!("Order cancelled by user: {reason}"));
                sagas.save(&saga).await?;
            }
        }

        tracing::info!("order cancelled");
        publish_logged(
            self.orchestrator.events(),
            FulfillmentEvent::order_cancelled(&order, reason),
        )
        .await;
        Ok(order)
    }

    async fn refund(&self, receipt: &PaymentReceipt, cause: &SagaError) {
        tracing::warn!(
            payment_id = %receipt.payment_id,
            cause = %cause,
            "order completion failed after payment, refunding"
        );
        match self.payments.refund(&receipt.payment_id).await {
            Ok(()) => {
                metrics::counter!("payment_refunded_total").increment(1);
                tracing::info!(payment_id = %receipt.payment_id, "payment refunded");
            }
            Err(e) => {
                metrics::counter!("payment_refund_failed_total").increment(1);
                tracing::error!(
                    payment_id = %receipt.payment_id,
                    amount = %receipt.amount,
                    error = %e,
                    "refund failed, operator action required"
                );
            }
        }
    }

    /// Loads an order the user owns.
    pub async fn get_order(&self, user_id: &str, order_number: &str) -> Result<Order> {
        self.load_owned(user_id, order_number).await
    }

    async fn load_owned(&self, user_id: &str, order_number: &str) -> Result<Order> {
        let order = self
            .orchestrator
            .orders()
            .find_by_order_number(order_number)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_number.to_string()))?;
        if !order.is_owned_by(user_id) {
            return Err(OrderError::UserMismatch {
                order_number: order_number.to_string(),
                user_id: user_id.to_string(),
            }
            .into());
        }
        Ok(order)
    }
}
