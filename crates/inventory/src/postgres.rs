use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{
    Inventory, InventoryError, InventoryUpdate, MovementQuery, MovementType, ProductId, Result,
    StockMovement,
    publisher::{InventoryPublisher, PublishError},
    store::{InventoryStore, InventoryTx},
};

/// PostgreSQL-backed inventory store.
///
/// Row locks are `SELECT ... FOR UPDATE` inside a database transaction.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Creates a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn counter(row: &PgRow, product_id: ProductId, column: &str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| InventoryError::CorruptRow {
        product_id,
        reason: format!("{column} out of range: {value}"),
    })
}

fn row_to_inventory(row: &PgRow) -> Result<Inventory> {
    let product_id = ProductId::new(row.try_get("product_id")?);
    Ok(Inventory {
        product_id,
        available: counter(row, product_id, "available")?,
        reserved: counter(row, product_id, "reserved")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_movement(row: &PgRow) -> Result<StockMovement> {
    let product_id = ProductId::new(row.try_get("product_id")?);
    let movement_type: String = row.try_get("movement_type")?;
    let movement_type =
        MovementType::parse(&movement_type).ok_or_else(|| InventoryError::CorruptRow {
            product_id,
            reason: format!("unknown movement type {movement_type}"),
        })?;

    Ok(StockMovement {
        id: row.try_get("id")?,
        product_id,
        movement_type,
        quantity: counter(row, product_id, "quantity")?,
        previous_available: counter(row, product_id, "previous_available")?,
        after_available: counter(row, product_id, "after_available")?,
        previous_reserved: counter(row, product_id, "previous_reserved")?,
        after_reserved: counter(row, product_id, "after_reserved")?,
        reference_type: row.try_get("reference_type")?,
        reference_id: row.try_get("reference_id")?,
        reason: row.try_get("reason")?,
        performed_by: row.try_get("performed_by")?,
        created_at: row.try_get("created_at")?,
    })
}

/// A database transaction against [`PostgresInventoryStore`].
///
/// Dropping it without calling `commit` rolls back.
pub struct PostgresInventoryTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InventoryTx for PostgresInventoryTx {
    async fn exists(&mut self, product_id: ProductId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM inventory WHERE product_id = $1)")
                .bind(product_id.as_i64())
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(exists)
    }

    async fn insert(&mut self, inventory: &Inventory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, available, reserved, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(inventory.product_id.as_i64())
        .bind(i64::from(inventory.available))
        .bind(i64::from(inventory.reserved))
        .bind(inventory.version)
        .bind(inventory.created_at)
        .bind(inventory.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return InventoryError::AlreadyExists(inventory.product_id);
            }
            InventoryError::Database(e)
        })?;
        Ok(())
    }

    async fn lock(&mut self, product_id: ProductId) -> Result<Option<Inventory>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT product_id, available, reserved, version, created_at, updated_at
            FROM inventory
            WHERE product_id = $1
            FOR UPDATE
            "#,
        )
        .bind(product_id.as_i64())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_inventory).transpose()
    }

    async fn update(&mut self, inventory: &Inventory) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE inventory
            SET available = $2, reserved = $3, version = $4, updated_at = $5
            WHERE product_id = $1
            "#,
        )
        .bind(inventory.product_id.as_i64())
        .bind(i64::from(inventory.available))
        .bind(i64::from(inventory.reserved))
        .bind(inventory.version)
        .bind(inventory.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InventoryError::NotFound(inventory.product_id));
        }
        Ok(())
    }

    async fn record_movement(&mut self, movement: &StockMovement) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, product_id, movement_type, quantity,
                previous_available, after_available, previous_reserved, after_reserved,
                reference_type, reference_id, reason, performed_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(movement.id)
        .bind(movement.product_id.as_i64())
        .bind(movement.movement_type.as_str())
        .bind(i64::from(movement.quantity))
        .bind(i64::from(movement.previous_available))
        .bind(i64::from(movement.after_available))
        .bind(i64::from(movement.previous_reserved))
        .bind(i64::from(movement.after_reserved))
        .bind(&movement.reference_type)
        .bind(&movement.reference_id)
        .bind(&movement.reason)
        .bind(&movement.performed_by)
        .bind(movement.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn reference_movements(
        &mut self,
        product_id: ProductId,
        reference_id: &str,
    ) -> Result<Vec<MovementType>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT movement_type FROM stock_movements WHERE product_id = $1 AND reference_id = $2",
        )
        .bind(product_id.as_i64())
        .bind(reference_id)
        .fetch_all(&mut *self.tx)
        .await?;

        names
            .iter()
            .map(|name| {
                MovementType::parse(name).ok_or_else(|| InventoryError::CorruptRow {
                    product_id,
                    reason: format!("unknown movement type {name}"),
                })
            })
            .collect()
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    type Tx = PostgresInventoryTx;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(PostgresInventoryTx {
            tx: self.pool.begin().await?,
        })
    }

    async fn get(&self, product_id: ProductId) -> Result<Option<Inventory>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT product_id, available, reserved, version, created_at, updated_at
            FROM inventory
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_inventory).transpose()
    }

    async fn movements(&self, query: &MovementQuery) -> Result<Vec<StockMovement>> {
        let mut sql = String::from(
            "SELECT id, product_id, movement_type, quantity, previous_available, after_available, \
             previous_reserved, after_reserved, reference_type, reference_id, reason, performed_by, \
             created_at FROM stock_movements WHERE 1=1",
        );
        let mut param_count = 0;

        if query.product_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND product_id = ${param_count}"));
        }
        if query.movement_types.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND movement_type = ANY(${param_count})"));
        }
        if query.reference_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND reference_id = ${param_count}"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC, seq DESC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.product_id {
            sqlx_query = sqlx_query.bind(id.as_i64());
        }
        if let Some(ref types) = query.movement_types {
            let names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
            sqlx_query = sqlx_query.bind(names);
        }
        if let Some(ref reference) = query.reference_id {
            sqlx_query = sqlx_query.bind(reference.clone());
        }
        if let Some(from_ts) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from_ts);
        }
        if let Some(to_ts) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to_ts);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_movement).collect()
    }
}

/// Publishes inventory updates with PostgreSQL `NOTIFY`.
///
/// Listeners subscribe with `LISTEN "inventory:<product_id>"`.
#[derive(Clone)]
pub struct PgNotifyPublisher {
    pool: PgPool,
}

impl PgNotifyPublisher {
    /// Creates a publisher on the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryPublisher for PgNotifyPublisher {
    async fn publish(&self, update: &InventoryUpdate) -> std::result::Result<(), PublishError> {
        let payload = serde_json::to_string(update)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(update.channel())
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(())
    }
}
