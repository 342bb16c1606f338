//! Saga state storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Result, SagaError, SagaState, SagaStatus, SagaStep};

/// Durable storage for saga states, one per order.
#[async_trait]
pub trait SagaStateStore: Send + Sync {
    /// Inserts or replaces a saga state, keyed by saga ID.
    async fn save(&self, state: &SagaState) -> Result<()>;

    /// Loads the saga for an order.
    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<SagaState>>;

    /// Loads a saga by its ID.
    async fn find_by_saga_id(&self, saga_id: &str) -> Result<Option<SagaState>>;

    /// Lists sagas in a status, oldest first.
    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>>;
}

#[async_trait]
impl<S: SagaStateStore + ?Sized> SagaStateStore for Arc<S> {
    async fn save(&self, state: &SagaState) -> Result<()> {
        (**self).save(state).await
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<SagaState>> {
        (**self).find_by_order_number(order_number).await
    }

    async fn find_by_saga_id(&self, saga_id: &str) -> Result<Option<SagaState>> {
        (**self).find_by_saga_id(saga_id).await
    }

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>> {
        (**self).find_by_status(status).await
    }
}

#[derive(Debug, Default)]
struct InMemorySagaState {
    sagas: HashMap<String, SagaState>,
    fail_on_save_at: Option<SagaStep>,
}

/// In-memory saga state store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaStateStore {
    state: Arc<RwLock<InMemorySagaState>>,
}

impl InMemorySagaStateStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails any save of a STARTED saga whose current step is `step`.
    ///
    /// With `Some(ProcessPayment)` the save right after a successful
    /// reservation fails, which lets tests break a saga between a step's
    /// side effect and its bookkeeping.
    pub async fn set_fail_on_save_at(&self, step: Option<SagaStep>) {
        self.state.write().await.fail_on_save_at = step;
    }

    /// Returns the number of stored sagas.
    pub async fn saga_count(&self) -> usize {
        self.state.read().await.sagas.len()
    }
}

#[async_trait]
impl SagaStateStore for InMemorySagaStateStore {
    async fn save(&self, saga: &SagaState) -> Result<()> {
        let mut state = self.state.write().await;
        if saga.status() == SagaStatus::Started
            && state.fail_on_save_at == Some(saga.current_step())
        {
            return Err(SagaError::Storage(format!(
                "simulated save failure at {}",
                saga.current_step()
            )));
        }
        state
            .sagas
            .insert(saga.saga_id().to_string(), saga.clone());
        Ok(())
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<SagaState>> {
        Ok(self
            .state
            .read()
            .await
            .sagas
            .values()
            .find(|s| s.order_number() == order_number)
            .cloned())
    }

    async fn find_by_saga_id(&self, saga_id: &str) -> Result<Option<SagaState>> {
        Ok(self.state.read().await.sagas.get(saga_id).cloned())
    }

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>> {
        let mut sagas: Vec<SagaState> = self
            .state
            .read()
            .await
            .sagas
            .values()
            .filter(|s| s.status() == status)
            .cloned()
            .collect();
        sagas.sort_by_key(SagaState::started_at);
        Ok(sagas)
    }
}
