//! Resuming compensation against PostgreSQL stores, as after a restart.
//!
//! Needs a Docker daemon. Run with:
//!
//! ```bash
//! cargo test -p ops --test postgres_resume -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use inventory::{PostgresInventoryStore, ProductId, ReservationEngine};
use ops::{OperatorCommand, Operator, SagaCommand};
use order::{Money, Order, OrderRepository, OrderStatus, PostgresOrderRepository};
use saga::{
    InMemoryDeliveryService, InMemoryEventPublisher, PostgresSagaStateStore, SagaState,
    SagaStateStore, SagaStatus,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresInventoryStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE stock_movements, inventory, saga_states, orders CASCADE")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

type PgOperator = Operator<
    PostgresInventoryStore,
    inventory::NoopInventoryPublisher,
    PostgresSagaStateStore,
    PostgresOrderRepository,
    InMemoryDeliveryService,
    InMemoryEventPublisher,
>;

fn operator(pool: &PgPool) -> PgOperator {
    Operator::new(
        ReservationEngine::without_publisher(PostgresInventoryStore::new(pool.clone())),
        PostgresSagaStateStore::new(pool.clone()),
        PostgresOrderRepository::new(pool.clone()),
        InMemoryDeliveryService::new(),
        InMemoryEventPublisher::new(),
    )
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_resume_after_restart_releases_reservation() {
    let pool = get_test_pool().await;
    let product = ProductId::new(11);

    let order_number = {
        let before_crash = operator(&pool);
        before_crash
            .engine()
            .initialize_inventory(product, 20, "SYSTEM")
            .await
            .unwrap();

        let mut order = Order::new("user-1");
        order
            .add_item(product, "Desk", Money::from_units(120), 4)
            .unwrap();
        order.confirm().unwrap();
        before_crash.orchestrator().orders().save(&order).await.unwrap();
        before_crash
            .engine()
            .reserve_stock(product, 4, "ORDER", order.order_number(), "user-1")
            .await
            .unwrap();

        let mut saga = SagaState::new(order.id(), order.order_number());
        saga.proceed_to_next_step();
        saga.start_compensation("payment declined");
        before_crash.sagas().save(&saga).await.unwrap();
        order.order_number().to_string()
    };

    let after_restart = operator(&pool);
    let resumed = after_restart
        .run(&OperatorCommand::Saga {
            command: SagaCommand::Resume {
                order_number: order_number.clone(),
            },
        })
        .await
        .unwrap();
    assert_eq!(resumed["outcome"], "Compensated { manual_intervention: false }");

    let saga = after_restart
        .sagas()
        .find_by_order_number(&order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert_eq!(saga.last_error_message(), Some("payment declined"));

    let order = after_restart
        .orchestrator()
        .orders()
        .find_by_order_number(&order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);

    let inventory = after_restart.engine().get_inventory(product).await.unwrap();
    assert_eq!((inventory.available, inventory.reserved), (20, 0));
}
