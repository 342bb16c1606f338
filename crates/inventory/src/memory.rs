use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    Inventory, InventoryError, MovementQuery, MovementType, ProductId, Result, StockMovement,
    store::{InventoryStore, InventoryTx},
};

/// One row-lock acquisition observed by the in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockAcquisition {
    /// The transaction that acquired the lock.
    pub tx_id: u64,
    /// The locked product row.
    pub product_id: ProductId,
}

#[derive(Debug, Default)]
struct LockInstrumentation {
    trace: Vec<LockAcquisition>,
    delay: Option<Duration>,
}

/// In-memory inventory store for testing.
///
/// Each row sits behind its own async mutex, so a transaction holding a row
/// lock serializes every other mutator of that product while leaving other
/// products untouched. Writes are staged in the transaction and applied on
/// commit; dropping the transaction discards them.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    rows: Arc<RwLock<HashMap<ProductId, Arc<Mutex<Inventory>>>>>,
    ledger: Arc<RwLock<Vec<StockMovement>>>,
    next_tx_id: Arc<AtomicU64>,
    instrumentation: Arc<StdMutex<LockInstrumentation>>,
}

impl InMemoryInventoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every row-lock acquisition in the order it happened.
    pub fn lock_trace(&self) -> Vec<LockAcquisition> {
        self.instrumentation().trace.clone()
    }

    /// Returns the products locked by one transaction, in acquisition order.
    pub fn locks_for_tx(&self, tx_id: u64) -> Vec<ProductId> {
        self.instrumentation()
            .trace
            .iter()
            .filter(|a| a.tx_id == tx_id)
            .map(|a| a.product_id)
            .collect()
    }

    /// Clears the lock-acquisition trace.
    pub fn clear_lock_trace(&self) {
        self.instrumentation().trace.clear();
    }

    /// Sleeps for `delay` after every row-lock acquisition.
    ///
    /// Widens the window in which concurrent transactions interleave.
    pub fn set_lock_delay(&self, delay: Option<Duration>) {
        self.instrumentation().delay = delay;
    }

    /// Returns the total number of ledger entries.
    pub async fn movement_count(&self) -> usize {
        self.ledger.read().await.len()
    }

    fn instrumentation(&self) -> StdMutexGuard<'_, LockInstrumentation> {
        self.instrumentation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_acquisition(&self, tx_id: u64, product_id: ProductId) -> Option<Duration> {
        let mut instrumentation = self.instrumentation();
        instrumentation
            .trace
            .push(LockAcquisition { tx_id, product_id });
        instrumentation.delay
    }
}

/// A transaction against [`InMemoryInventoryStore`].
pub struct InMemoryInventoryTx {
    store: InMemoryInventoryStore,
    id: u64,
    guards: BTreeMap<ProductId, OwnedMutexGuard<Inventory>>,
    staged: BTreeMap<ProductId, Inventory>,
    inserts: BTreeMap<ProductId, Inventory>,
    movements: Vec<StockMovement>,
}

impl InMemoryInventoryTx {
    /// Returns this transaction's ID as it appears in the lock trace.
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl InventoryTx for InMemoryInventoryTx {
    async fn exists(&mut self, product_id: ProductId) -> Result<bool> {
        if self.inserts.contains_key(&product_id) {
            return Ok(true);
        }
        Ok(self.store.rows.read().await.contains_key(&product_id))
    }

    async fn insert(&mut self, inventory: &Inventory) -> Result<()> {
        if self.exists(inventory.product_id).await? {
            return Err(InventoryError::AlreadyExists(inventory.product_id));
        }
        self.inserts
            .insert(inventory.product_id, inventory.clone());
        Ok(())
    }

    async fn lock(&mut self, product_id: ProductId) -> Result<Option<Inventory>> {
        if let Some(staged) = self.staged.get(&product_id) {
            return Ok(Some(staged.clone()));
        }
        if let Some(guard) = self.guards.get(&product_id) {
            return Ok(Some((**guard).clone()));
        }
        if let Some(inserted) = self.inserts.get(&product_id) {
            return Ok(Some(inserted.clone()));
        }

        // The table lock is only held long enough to find the row.
        let row = self.store.rows.read().await.get(&product_id).cloned();
        let Some(row) = row else {
            return Ok(None);
        };

        let guard = row.lock_owned().await;
        if let Some(delay) = self.store.record_acquisition(self.id, product_id) {
            tokio::time::sleep(delay).await;
        }

        let current = (*guard).clone();
        self.guards.insert(product_id, guard);
        Ok(Some(current))
    }

    async fn update(&mut self, inventory: &Inventory) -> Result<()> {
        let product_id = inventory.product_id;
        if let Some(inserted) = self.inserts.get_mut(&product_id) {
            *inserted = inventory.clone();
            return Ok(());
        }
        if !self.guards.contains_key(&product_id) {
            return Err(InventoryError::NotFound(product_id));
        }
        self.staged.insert(product_id, inventory.clone());
        Ok(())
    }

    async fn record_movement(&mut self, movement: &StockMovement) -> Result<()> {
        self.movements.push(movement.clone());
        Ok(())
    }

    async fn reference_movements(
        &mut self,
        product_id: ProductId,
        reference_id: &str,
    ) -> Result<Vec<MovementType>> {
        let ledger = self.store.ledger.read().await;
        Ok(ledger
            .iter()
            .chain(self.movements.iter())
            .filter(|m| m.product_id == product_id && m.reference_id == reference_id)
            .map(|m| m.movement_type)
            .collect())
    }

    async fn commit(self) -> Result<()> {
        let Self {
            store,
            mut guards,
            staged,
            inserts,
            movements,
            ..
        } = self;

        if !inserts.is_empty() {
            let mut rows = store.rows.write().await;
            if let Some(existing) = inserts.keys().find(|id| rows.contains_key(*id)) {
                return Err(InventoryError::AlreadyExists(*existing));
            }
            for (product_id, inventory) in inserts {
                rows.insert(product_id, Arc::new(Mutex::new(inventory)));
            }
        }

        for (product_id, inventory) in staged {
            if let Some(guard) = guards.get_mut(&product_id) {
                **guard = inventory;
            }
        }

        store.ledger.write().await.extend(movements);
        drop(guards);
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    type Tx = InMemoryInventoryTx;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryInventoryTx {
            store: self.clone(),
            id: self.next_tx_id.fetch_add(1, Ordering::SeqCst) + 1,
            guards: BTreeMap::new(),
            staged: BTreeMap::new(),
            inserts: BTreeMap::new(),
            movements: Vec::new(),
        })
    }

    async fn get(&self, product_id: ProductId) -> Result<Option<Inventory>> {
        let Some(row) = self.rows.read().await.get(&product_id).cloned() else {
            return Ok(None);
        };
        // Waits for an in-flight writer; the guarded value is always the committed one.
        let inventory = row.lock().await.clone();
        Ok(Some(inventory))
    }

    async fn movements(&self, query: &MovementQuery) -> Result<Vec<StockMovement>> {
        let ledger = self.ledger.read().await;
        let mut movements: Vec<_> = ledger
            .iter()
            .rev()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        movements.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(movements.into_iter().skip(offset).take(limit).collect())
    }
}
