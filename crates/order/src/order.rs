use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{OrderId, ProductId};
use serde::{Deserialize, Serialize};

use crate::{
    Money, OrderError, OrderItem, OrderStatus, Result, ShippingAddress,
    value_objects::generate_order_number,
};

/// Order aggregate root.
///
/// Holds the line items, amounts and status of one order. Status changes go
/// through the transition methods, which reject moves the status machine
/// does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub(crate) id: OrderId,
    pub(crate) order_number: String,
    pub(crate) user_id: String,
    pub(crate) status: OrderStatus,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) total_amount: Money,
    pub(crate) discount_amount: Money,
    pub(crate) shipping_address: Option<ShippingAddress>,
    pub(crate) cancel_reason: Option<String>,
    pub(crate) cancelled_at: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates an empty PENDING order for a user.
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            order_number: generate_order_number(now),
            user_id: user_id.into(),
            status: OrderStatus::Pending,
            items: Vec::new(),
            total_amount: Money::zero(),
            discount_amount: Money::zero(),
            shipping_address: None,
            cancel_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the delivery address.
    pub fn with_shipping_address(mut self, address: ShippingAddress) -> Self {
        self.shipping_address = Some(address);
        self
    }

    // Accessors

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn discount_amount(&self) -> Money {
        self.discount_amount
    }

    /// Returns `total_amount - discount_amount`.
    pub fn final_amount(&self) -> Money {
        self.total_amount - self.discount_amount
    }

    pub fn shipping_address(&self) -> Option<&ShippingAddress> {
        self.shipping_address.as_ref()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if the order belongs to the user.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Returns the total number of units across all line items.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }

    /// Sums line-item quantities per product.
    ///
    /// Duplicate products are merged, which is the shape batch inventory
    /// calls expect.
    pub fn quantities_by_product(&self) -> HashMap<ProductId, u32> {
        let mut quantities = HashMap::new();
        for item in &self.items {
            let total = quantities.entry(item.product_id).or_insert(0u32);
            // add_item keeps every per-product total within u32.
            *total = total.saturating_add(item.quantity);
        }
        quantities
    }

    fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.items
            .iter()
            .filter(|i| i.product_id == product_id)
            .fold(0u32, |acc, i| acc.saturating_add(i.quantity))
    }

    /// Adds a line item and recalculates the total.
    pub fn add_item(
        &mut self,
        product_id: ProductId,
        product_name: impl Into<String>,
        price: Money,
        quantity: u32,
    ) -> Result<()> {
        if self.status != OrderStatus::Pending {
            return Err(OrderError::InvalidStatus {
                current: self.status,
                action: "add item",
            });
        }
        if quantity == 0 {
            return Err(OrderError::InvalidItem {
                product_id,
                reason: "quantity must be greater than 0",
            });
        }
        if price.is_negative() {
            return Err(OrderError::InvalidItem {
                product_id,
                reason: "price must not be negative",
            });
        }

        if self.quantity_of(product_id).checked_add(quantity).is_none() {
            return Err(OrderError::InvalidItem {
                product_id,
                reason: "total quantity for the product is too large",
            });
        }
        let item = OrderItem::new(product_id, product_name, quantity, price);
        let total = item
            .subtotal()
            .and_then(|subtotal| self.total_amount.checked_add(subtotal))
            .ok_or(OrderError::InvalidItem {
                product_id,
                reason: "order amount is too large",
            })?;

        self.items.push(item);
        self.total_amount = total;
        self.touch();
        Ok(())
    }

    /// Applies a discount, capped at the order total. Returns the applied amount.
    pub fn apply_discount(&mut self, amount: Money) -> Money {
        let applied = if amount.is_negative() {
            Money::zero()
        } else {
            amount.min(self.total_amount)
        };
        self.discount_amount = applied;
        self.touch();
        applied
    }

    /// PENDING → CONFIRMED.
    pub fn confirm(&mut self) -> Result<()> {
        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        self.transition(OrderStatus::Pending, OrderStatus::Confirmed, "confirm")
    }

    /// CONFIRMED → PAID.
    pub fn mark_as_paid(&mut self) -> Result<()> {
        self.transition(OrderStatus::Confirmed, OrderStatus::Paid, "mark as paid")
    }

    /// PAID → SHIPPING.
    pub fn ship(&mut self) -> Result<()> {
        self.transition(OrderStatus::Paid, OrderStatus::Shipping, "ship")
    }

    /// SHIPPING → DELIVERED.
    pub fn deliver(&mut self) -> Result<()> {
        self.transition(OrderStatus::Shipping, OrderStatus::Delivered, "deliver")
    }

    /// Cancels a PENDING or CONFIRMED order.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<()> {
        if !self.status.is_cancellable() {
            return Err(self.cannot_be_cancelled());
        }
        let now = Utc::now();
        self.status = OrderStatus::Cancelled;
        self.cancel_reason = Some(reason.into());
        self.cancelled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Refunds a PAID, SHIPPING or DELIVERED order.
    pub fn refund(&mut self) -> Result<()> {
        if !self.status.is_refundable() {
            return Err(self.cannot_be_cancelled());
        }
        self.status = OrderStatus::Refunded;
        self.touch();
        Ok(())
    }

    fn transition(
        &mut self,
        from: OrderStatus,
        to: OrderStatus,
        action: &'static str,
    ) -> Result<()> {
        if self.status != from {
            return Err(OrderError::InvalidStatus {
                current: self.status,
                action,
            });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    fn cannot_be_cancelled(&self) -> OrderError {
        OrderError::CannotBeCancelled {
            order_number: self.order_number.clone(),
            status: self.status,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
