//! Payment processor trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use order::Money;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    VirtualAccount,
}

/// Result of a successful charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    /// The payment ID assigned by the processor.
    pub payment_id: String,
    pub order_number: String,
    pub amount: Money,
    pub method: PaymentMethod,
}

/// Trait for charging customers. Called by checkout, never by the saga.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Charges the order amount. A decline is a `PaymentFailed` error.
    ///
    /// An order with a payment that was not refunded is rejected with
    /// `PaymentAlreadyCompleted`. The check and the charge are atomic.
    async fn charge(
        &self,
        order_number: &str,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<PaymentReceipt>;

    /// Refunds a previously made payment.
    async fn refund(&self, payment_id: &str) -> Result<()>;
}

#[async_trait]
impl<T: PaymentProcessor + ?Sized> PaymentProcessor for Arc<T> {
    async fn charge(
        &self,
        order_number: &str,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<PaymentReceipt> {
        (**self).charge(order_number, amount, method).await
    }

    async fn refund(&self, payment_id: &str) -> Result<()> {
        (**self).refund(payment_id).await
    }
}

#[derive(Debug)]
struct StoredPayment {
    receipt: PaymentReceipt,
    refunded: bool,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, StoredPayment>,
    next_id: u32,
    decline: bool,
    fail_on_refund: bool,
}

/// In-memory payment processor for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentProcessor {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentProcessor {
    /// Creates a new in-memory payment processor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the processor to decline every charge.
    pub fn set_decline(&self, decline: bool) {
        self.write().decline = decline;
    }

    /// Configures the processor to fail every refund.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.write().fail_on_refund = fail;
    }

    /// Returns the number of successful charges, refunded or not.
    pub fn payment_count(&self) -> usize {
        self.read().payments.len()
    }

    /// Returns the number of refunded payments.
    pub fn refund_count(&self) -> usize {
        self.read().payments.values().filter(|p| p.refunded).count()
    }

    /// Returns true if the order has a payment that was not refunded.
    pub fn is_charged(&self, order_number: &str) -> bool {
        self.read()
            .payments
            .values()
            .any(|p| !p.refunded && p.receipt.order_number == order_number)
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryPaymentState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryPaymentState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryPaymentProcessor {
    async fn charge(
        &self,
        order_number: &str,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<PaymentReceipt> {
        let mut state = self.write();

        let already_paid = state
            .payments
            .values()
            .any(|p| !p.refunded && p.receipt.order_number == order_number);
        if already_paid {
            return Err(SagaError::PaymentAlreadyCompleted(order_number.to_string()));
        }

        if state.decline {
            return Err(SagaError::PaymentFailed {
                order_number: order_number.to_string(),
                reason: "Payment declined".to_string(),
            });
        }

        state.next_id += 1;
        let receipt = PaymentReceipt {
            payment_id: format!("PAY-{:06}", state.next_id),
            order_number: order_number.to_string(),
            amount,
            method,
        };
        state.payments.insert(
            receipt.payment_id.clone(),
            StoredPayment {
                receipt: receipt.clone(),
                refunded: false,
            },
        );
        Ok(receipt)
    }

    async fn refund(&self, payment_id: &str) -> Result<()> {
        let mut state = self.write();
        let refund_failed = |reason: &str| SagaError::RefundFailed {
            payment_id: payment_id.to_string(),
            reason: reason.to_string(),
        };

        if state.fail_on_refund {
            return Err(refund_failed("Refund rejected"));
        }
        let payment = state
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| refund_failed("Payment not found"))?;
        if payment.refunded {
            return Err(refund_failed("Payment already refunded"));
        }
        payment.refunded = true;
        Ok(())
    }
}
