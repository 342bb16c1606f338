//! Operator command execution against the inventory engine and saga
//! orchestrator.

use std::sync::Arc;

use common::ProductId;
use inventory::{InventoryPublisher, InventoryStore, MovementQuery, ReservationEngine};
use order::OrderRepository;
use saga::{DeliveryService, EventPublisher, OrderSagaOrchestrator, SagaError, SagaStateStore};
use serde_json::{Value, json};

use crate::cli::{InventoryCommand, OperatorCommand, SagaCommand};
use crate::error::Result;

/// Engine shared by the operator and its orchestrator.
pub type SharedEngine<S, P> = Arc<ReservationEngine<S, P>>;

/// Runs operator commands and renders their results as JSON.
pub struct Operator<S, P, St, R, D, E>
where
    S: InventoryStore,
    P: InventoryPublisher,
    St: SagaStateStore,
    R: OrderRepository,
    D: DeliveryService,
    E: EventPublisher,
{
    engine: SharedEngine<S, P>,
    orchestrator: OrderSagaOrchestrator<St, R, SharedEngine<S, P>, D, E>,
}

impl<S, P, St, R, D, E> Operator<S, P, St, R, D, E>
where
    S: InventoryStore,
    P: InventoryPublisher,
    St: SagaStateStore,
    R: OrderRepository,
    D: DeliveryService,
    E: EventPublisher,
{
    pub fn new(engine: ReservationEngine<S, P>, sagas: St, orders: R, delivery: D, events: E) -> Self {
        let engine = Arc::new(engine);
        let orchestrator =
            OrderSagaOrchestrator::new(sagas, orders, engine.clone(), delivery, events);
        Self {
            engine,
            orchestrator,
        }
    }

    pub fn engine(&self) -> &ReservationEngine<S, P> {
        &self.engine
    }

    pub fn sagas(&self) -> &St {
        self.orchestrator.sagas()
    }

    pub fn orchestrator(&self) -> &OrderSagaOrchestrator<St, R, SharedEngine<S, P>, D, E> {
        &self.orchestrator
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self, command: &OperatorCommand) -> Result<Value> {
        match command {
            OperatorCommand::Inventory { command } => self.inventory(command).await,
            OperatorCommand::Ledger {
                product,
                reference,
                limit,
            } => {
                let mut query = MovementQuery::for_product(ProductId::new(*product)).limit(*limit);
                if let Some(reference) = reference {
                    query = query.reference_id(reference.clone());
                }
                let movements = self.engine.get_stock_movements(&query).await?;
                Ok(serde_json::to_value(movements)?)
            }
            OperatorCommand::Saga { command } => self.saga(command).await,
        }
    }

    async fn inventory(&self, command: &InventoryCommand) -> Result<Value> {
        let inventory = match command {
            InventoryCommand::Show { product } => {
                self.engine.get_inventory(ProductId::new(*product)).await?
            }
            InventoryCommand::Init {
                product,
                quantity,
                actor,
            } => {
                self.engine
                    .initialize_inventory(ProductId::new(*product), *quantity, actor)
                    .await?
            }
            InventoryCommand::Add {
                product,
                quantity,
                reason,
                actor,
            } => {
                self.engine
                    .add_stock(ProductId::new(*product), *quantity, reason, actor)
                    .await?
            }
        };
        Ok(serde_json::to_value(inventory)?)
    }

    async fn saga(&self, command: &SagaCommand) -> Result<Value> {
        match command {
            SagaCommand::Show { order_number } => {
                let saga = self
                    .sagas()
                    .find_by_order_number(order_number)
                    .await?
                    .ok_or_else(|| SagaError::NotFound(order_number.clone()))?;
                Ok(serde_json::to_value(saga)?)
            }
            SagaCommand::List { status } => {
                let sagas = self.orchestrator.find_sagas_by_status(*status).await?;
                Ok(json!({ "status": status, "count": sagas.len(), "sagas": sagas }))
            }
            SagaCommand::Resume { order_number } => {
                let outcome = self.orchestrator.resume_compensation(order_number).await?;
                tracing::info!(?outcome, "compensation resumed by operator");
                let saga = self.orchestrator.get_saga(order_number).await?;
                Ok(json!({ "outcome": format!("{outcome:?}"), "saga": saga }))
            }
        }
    }
}
