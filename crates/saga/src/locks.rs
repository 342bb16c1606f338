//! Per-order async locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// In-process lock table keyed by order number.
///
/// At most one task at a time mutates an order and its saga. Entries nobody
/// holds or waits on are pruned when the next lock is taken.
#[derive(Debug, Clone, Default)]
pub struct OrderLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl OrderLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the lock of an order. Released when the guard drops.
    pub async fn lock(&self, order_number: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(order_number.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Returns the number of orders with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no lock entries exist.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_order_is_serialized() {
        let locks = OrderLocks::new();
        let guard = locks.lock("ORD-1").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = other.lock("ORD-1").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_orders_do_not_block() {
        let locks = OrderLocks::new();
        let _a = locks.lock("ORD-1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("ORD-2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = OrderLocks::new();
        drop(locks.lock("ORD-1").await);
        drop(locks.lock("ORD-2").await);
        assert_eq!(locks.len(), 1);

        let _held = locks.lock("ORD-3").await;
        let _other = locks.lock("ORD-4").await;
        assert_eq!(locks.len(), 2);
    }
}
