//! Command-line interface.

use clap::{Parser, Subcommand};
use saga::SagaStatus;

use crate::config::LogFormat;

/// Operator tooling for inventory and order sagas.
#[derive(Debug, Parser)]
#[command(name = "ops", version, about)]
pub struct Cli {
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Connection pool size.
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", global = true)]
    pub max_connections: Option<u32>,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", global = true, value_enum, ignore_case = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Apply SQL migrations.
    Migrate,

    #[command(flatten)]
    Query(OperatorCommand),
}

/// Commands that read or adjust inventory and saga records.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum OperatorCommand {
    /// Inspect or restock inventory.
    Inventory {
        #[command(subcommand)]
        command: InventoryCommand,
    },

    /// Show a product's stock ledger, newest first.
    Ledger {
        product: i64,

        /// Only entries for this reference, e.g. an order number.
        #[arg(long)]
        reference: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Inspect or resume sagas for manual recovery.
    Saga {
        #[command(subcommand)]
        command: SagaCommand,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum InventoryCommand {
    /// Show a product's counters.
    Show { product: i64 },

    /// Create the inventory row for a product.
    Init {
        product: i64,
        quantity: u32,
        #[arg(long, default_value = "SYSTEM")]
        actor: String,
    },

    /// Add received stock to a product.
    Add {
        product: i64,
        quantity: u32,
        #[arg(long)]
        reason: String,
        #[arg(long, default_value = "ADMIN")]
        actor: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum SagaCommand {
    /// Show the saga of an order.
    Show { order_number: String },

    /// List sagas in a status.
    List {
        #[arg(long)]
        status: SagaStatus,
    },

    /// Re-run compensation for a saga left COMPENSATING.
    Resume { order_number: String },
}
