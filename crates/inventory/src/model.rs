//! Inventory rows, stock movements and change notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{InventoryError, ProductId, Result};

/// Per-product stock counters.
///
/// `available` is sellable stock; `reserved` is held for orders awaiting
/// payment. Total owned stock is `available + reserved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub product_id: ProductId,
    pub available: u32,
    pub reserved: u32,
    /// Bumped on every committed mutation.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Inventory {
    /// Creates a new inventory row with all stock available.
    pub fn new(product_id: ProductId, initial_stock: u32) -> Self {
        let now = Utc::now();
        Self {
            product_id,
            available: initial_stock,
            reserved: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `available + reserved`.
    pub fn total(&self) -> u64 {
        u64::from(self.available) + u64::from(self.reserved)
    }

    /// Moves `quantity` from available to reserved.
    pub fn reserve(&mut self, quantity: u32) -> Result<()> {
        self.check_quantity(quantity)?;
        if self.available < quantity {
            return Err(InventoryError::InsufficientStock {
                product_id: self.product_id,
                requested: quantity,
                available: self.available,
            });
        }
        let reserved = self.checked_add(self.reserved, quantity)?;
        self.available -= quantity;
        self.reserved = reserved;
        self.touch();
        Ok(())
    }

    /// Removes `quantity` of reserved stock from the system.
    pub fn deduct(&mut self, quantity: u32) -> Result<()> {
        self.check_quantity(quantity)?;
        if self.reserved < quantity {
            return Err(InventoryError::DeductionFailed {
                product_id: self.product_id,
                requested: quantity,
                reserved: self.reserved,
            });
        }
        self.reserved -= quantity;
        self.touch();
        Ok(())
    }

    /// Moves `quantity` from reserved back to available.
    pub fn release(&mut self, quantity: u32) -> Result<()> {
        self.check_quantity(quantity)?;
        if self.reserved < quantity {
            return Err(InventoryError::ReleaseFailed {
                product_id: self.product_id,
                requested: quantity,
                reserved: self.reserved,
            });
        }
        let available = self.checked_add(self.available, quantity)?;
        self.reserved -= quantity;
        self.available = available;
        self.touch();
        Ok(())
    }

    /// Adds inbound stock to available.
    pub fn add_stock(&mut self, quantity: u32) -> Result<()> {
        self.check_quantity(quantity)?;
        self.available = self.checked_add(self.available, quantity)?;
        self.touch();
        Ok(())
    }

    /// Applies the counter change described by `movement_type`.
    ///
    /// `Initial` only describes row creation, so an existing row rejects it.
    pub(crate) fn apply(&mut self, movement_type: MovementType, quantity: u32) -> Result<()> {
        match movement_type {
            MovementType::Reserve => self.reserve(quantity),
            MovementType::Deduct => self.deduct(quantity),
            MovementType::Release => self.release(quantity),
            MovementType::Inbound => self.add_stock(quantity),
            MovementType::Initial => Err(InventoryError::AlreadyExists(self.product_id)),
        }
    }

    fn check_quantity(&self, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity {
                product_id: self.product_id,
                quantity,
            });
        }
        Ok(())
    }

    fn checked_add(&self, current: u32, quantity: u32) -> Result<u32> {
        current
            .checked_add(quantity)
            .ok_or(InventoryError::InvalidQuantity {
                product_id: self.product_id,
                quantity,
            })
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// The kind of change recorded in the stock ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Initial,
    Reserve,
    Deduct,
    Release,
    Inbound,
}

impl MovementType {
    /// Returns the stored name of the movement type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Initial => "INITIAL",
            MovementType::Reserve => "RESERVE",
            MovementType::Deduct => "DEDUCT",
            MovementType::Release => "RELEASE",
            MovementType::Inbound => "INBOUND",
        }
    }

    /// Parses a stored movement type name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INITIAL" => Some(MovementType::Initial),
            "RESERVE" => Some(MovementType::Reserve),
            "DEDUCT" => Some(MovementType::Deduct),
            "RELEASE" => Some(MovementType::Release),
            "INBOUND" => Some(MovementType::Inbound),
            _ => None,
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who caused a movement and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementContext<'a> {
    pub reference_type: &'a str,
    pub reference_id: &'a str,
    pub reason: &'a str,
    pub performed_by: &'a str,
}

/// An immutable stock ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity: u32,
    pub previous_available: u32,
    pub after_available: u32,
    pub previous_reserved: u32,
    pub after_reserved: u32,
    pub reference_type: String,
    pub reference_id: String,
    pub reason: String,
    pub performed_by: String,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Records the transition of a row from `before` to `after`.
    pub fn record(
        movement_type: MovementType,
        quantity: u32,
        before: &Inventory,
        after: &Inventory,
        context: &MovementContext<'_>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: after.product_id,
            movement_type,
            quantity,
            previous_available: before.available,
            after_available: after.available,
            previous_reserved: before.reserved,
            after_reserved: after.reserved,
            reference_type: context.reference_type.to_string(),
            reference_id: context.reference_id.to_string(),
            reason: context.reason.to_string(),
            performed_by: context.performed_by.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Payload published after an inventory row changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryUpdate {
    pub product_id: ProductId,
    pub available: u32,
    pub reserved: u32,
    pub timestamp: DateTime<Utc>,
}

impl InventoryUpdate {
    /// Snapshots the counters of an inventory row.
    pub fn from_inventory(inventory: &Inventory) -> Self {
        Self {
            product_id: inventory.product_id,
            available: inventory.available,
            reserved: inventory.reserved,
            timestamp: Utc::now(),
        }
    }

    /// Returns the per-product channel name, e.g. `inventory:42`.
    pub fn channel(&self) -> String {
        channel_for(self.product_id)
    }
}

/// Returns the notification channel for a product.
pub fn channel_for(product_id: ProductId) -> String {
    format!("inventory:{product_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(available: u32) -> Inventory {
        Inventory::new(ProductId::new(1), available)
    }

    #[test]
    fn test_new_inventory_has_nothing_reserved() {
        let inv = product(10);
        assert_eq!(inv.available, 10);
        assert_eq!(inv.reserved, 0);
        assert_eq!(inv.total(), 10);
    }

    #[test]
    fn test_reserve_moves_stock_to_reserved() {
        let mut inv = product(10);
        inv.reserve(4).unwrap();
        assert_eq!(inv.available, 6);
        assert_eq!(inv.reserved, 4);
        assert_eq!(inv.total(), 10);
        assert_eq!(inv.version, 1);
    }

    #[test]
    fn test_reserve_exact_available_succeeds() {
        let mut inv = product(5);
        inv.reserve(5).unwrap();
        assert_eq!(inv.available, 0);
        assert_eq!(inv.reserved, 5);
    }

    #[test]
    fn test_reserve_more_than_available_fails_without_change() {
        let mut inv = product(3);
        let err = inv.reserve(4).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock {
                requested: 4,
                available: 3,
                ..
            }
        ));
        assert_eq!(inv.available, 3);
        assert_eq!(inv.reserved, 0);
        assert_eq!(inv.version, 0);
    }

    #[test]
    fn test_release_is_inverse_of_reserve() {
        let mut inv = product(10);
        inv.reserve(7).unwrap();
        inv.release(7).unwrap();
        assert_eq!(inv.available, 10);
        assert_eq!(inv.reserved, 0);
    }

    #[test]
    fn test_deduct_leaves_available_unchanged() {
        let mut inv = product(10);
        inv.reserve(5).unwrap();
        inv.deduct(5).unwrap();
        assert_eq!(inv.available, 5);
        assert_eq!(inv.reserved, 0);
        assert_eq!(inv.total(), 5);
    }

    #[test]
    fn test_deduct_requires_reserved_stock() {
        let mut inv = product(10);
        let err = inv.deduct(1).unwrap_err();
        assert_eq!(err.code(), "STOCK_DEDUCTION_FAILED");
    }

    #[test]
    fn test_release_requires_reserved_stock() {
        let mut inv = product(10);
        inv.reserve(2).unwrap();
        let err = inv.release(3).unwrap_err();
        assert_eq!(err.code(), "STOCK_RELEASE_FAILED");
        assert_eq!(inv.reserved, 2);
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut inv = product(10);
        assert_eq!(inv.reserve(0).unwrap_err().code(), "INVALID_STOCK_QUANTITY");
        assert_eq!(inv.add_stock(0).unwrap_err().code(), "INVALID_STOCK_QUANTITY");
    }

    #[test]
    fn test_apply_initial_on_existing_row_rejected() {
        let mut inv = product(10);
        let err = inv.apply(MovementType::Initial, 5).unwrap_err();
        assert_eq!(err.code(), "INVENTORY_ALREADY_EXISTS");
        assert_eq!((inv.available, inv.version), (10, 0));

        inv.apply(MovementType::Inbound, 5).unwrap();
        assert_eq!(inv.available, 15);
    }

    #[test]
    fn test_add_stock_overflow_rejected() {
        let mut inv = product(u32::MAX);
        assert_eq!(inv.add_stock(1).unwrap_err().code(), "INVALID_STOCK_QUANTITY");
        assert_eq!(inv.available, u32::MAX);
    }

    #[test]
    fn test_movement_type_names_roundtrip() {
        for mt in [
            MovementType::Initial,
            MovementType::Reserve,
            MovementType::Deduct,
            MovementType::Release,
            MovementType::Inbound,
        ] {
            assert_eq!(MovementType::parse(mt.as_str()), Some(mt));
        }
        assert_eq!(MovementType::parse("ADJUST"), None);
    }

    #[test]
    fn test_update_payload_shape() {
        let mut inv = Inventory::new(ProductId::new(42), 10);
        inv.reserve(3).unwrap();
        let update = InventoryUpdate::from_inventory(&inv);
        assert_eq!(update.channel(), "inventory:42");

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["productId"], 42);
        assert_eq!(json["available"], 7);
        assert_eq!(json["reserved"], 3);
        assert!(json.get("timestamp").is_some());
    }
}
