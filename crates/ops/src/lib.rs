//! Operator CLI for manual recovery: migrations, inventory inspection and
//! restock, stock ledger queries, saga state queries and resumed
//! compensation.

pub mod cli;
pub mod config;
pub mod error;
pub mod operator;

use inventory::{PgNotifyPublisher, PostgresInventoryStore, ReservationEngine};
use order::PostgresOrderRepository;
use saga::{InMemoryDeliveryService, InMemoryEventPublisher, PostgresSagaStateStore};
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use cli::{Cli, Command, InventoryCommand, OperatorCommand, SagaCommand};
pub use config::{Config, LogFormat};
pub use error::{OpsError, Result};
pub use operator::{Operator, SharedEngine};

/// Installs the tracing subscriber. Logs go to stderr so stdout stays JSON.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (text, json) = match config.log_format {
        LogFormat::Text => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    // A subscriber may already be installed, e.g. by a test harness.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init();
}

/// Connects to PostgreSQL and runs one command.
pub async fn execute(command: &Command, config: &Config) -> Result<Value> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| OpsError::Config("DATABASE_URL is not set".to_string()))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await?;
    let store = PostgresInventoryStore::new(pool.clone());

    match command {
        Command::Migrate => {
            store.run_migrations().await?;
            tracing::info!("migrations applied");
            Ok(json!({ "migrated": true }))
        }
        Command::Query(command) => {
            let engine = ReservationEngine::new(store, PgNotifyPublisher::new(pool.clone()));
            // No delivery provider is bound here, so cancelling a delivery
            // is a no-op. Events stay in process.
            let operator = Operator::new(
                engine,
                PostgresSagaStateStore::new(pool.clone()),
                PostgresOrderRepository::new(pool),
                InMemoryDeliveryService::new(),
                InMemoryEventPublisher::new(),
            );
            operator.run(command).await
        }
    }
}
