use async_trait::async_trait;
use common::{OrderId, ProductId};
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use uuid::Uuid;

use crate::{
    Money, Order, OrderError, OrderItem, OrderRepository, OrderStatus, Result, ShippingAddress,
};

/// PostgreSQL-backed order repository.
///
/// An order and its line items are written in one transaction.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Creates a new PostgreSQL order repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            "SELECT product_id, product_name, quantity, price FROM order_items \
             WHERE order_id = $1 ORDER BY line_no",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|row| row_to_item(row, order_id)).collect()
    }

    async fn load(&self, row: Option<PgRow>) -> Result<Option<Order>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let id: Uuid = row.try_get("id")?;
        let items = self.load_items(id).await?;
        row_to_order(&row, items).map(Some)
    }
}

const SELECT_COLUMNS: &str = "SELECT id, order_number, user_id, status, total_amount, \
     discount_amount, shipping_address, cancel_reason, cancelled_at, created_at, updated_at \
     FROM orders";

fn corrupt(order_id: Uuid, reason: String) -> OrderError {
    OrderError::Storage(format!("corrupt order row {order_id}: {reason}"))
}

fn row_to_item(row: &PgRow, order_id: Uuid) -> Result<OrderItem> {
    let quantity: i64 = row.try_get("quantity")?;
    let quantity = u32::try_from(quantity)
        .map_err(|_| corrupt(order_id, format!("quantity out of range: {quantity}")))?;
    Ok(OrderItem {
        product_id: ProductId::new(row.try_get("product_id")?),
        product_name: row.try_get("product_name")?,
        quantity,
        price: Money::from_cents(row.try_get("price")?),
    })
}

fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
    let id: Uuid = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = OrderStatus::parse(&status)
        .ok_or_else(|| corrupt(id, format!("unknown status {status}")))?;
    let shipping_address: Option<Json<ShippingAddress>> = row.try_get("shipping_address")?;

    Ok(Order {
        id: OrderId::from_uuid(id),
        order_number: row.try_get("order_number")?,
        user_id: row.try_get("user_id")?,
        status,
        items,
        total_amount: Money::from_cents(row.try_get("total_amount")?),
        discount_amount: Money::from_cents(row.try_get("discount_amount")?),
        shipping_address: shipping_address.map(|Json(address)| address),
        cancel_reason: row.try_get("cancel_reason")?,
        cancelled_at: row.try_get("cancelled_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn save(&self, order: &Order) -> Result<()> {
        let id = order.id.as_uuid();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, user_id, status, total_amount, discount_amount,
                                shipping_address, cancel_reason, cancelled_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                total_amount = EXCLUDED.total_amount,
                discount_amount = EXCLUDED.discount_amount,
                shipping_address = EXCLUDED.shipping_address,
                cancel_reason = EXCLUDED.cancel_reason,
                cancelled_at = EXCLUDED.cancelled_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(id)
        .bind(&order.order_number)
        .bind(&order.user_id)
        .bind(order.status.as_str())
        .bind(order.total_amount.cents())
        .bind(order.discount_amount.cents())
        .bind(order.shipping_address.as_ref().map(Json))
        .bind(&order.cancel_reason)
        .bind(order.cancelled_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for (line_no, item) in order.items.iter().enumerate() {
            let line_no = i32::try_from(line_no)
                .map_err(|_| corrupt(id, format!("too many lines: {line_no}")))?;
            sqlx::query(
                "INSERT INTO order_items (order_id, line_no, product_id, product_name, quantity, price) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(id)
            .bind(line_no)
            .bind(item.product_id.as_i64())
            .bind(&item.product_name)
            .bind(i64::from(item.quantity))
            .bind(item.price.cents())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE order_number = $1"))
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;
        self.load(row).await
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        self.load(row).await
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(order) = self.load(Some(row)).await? {
                orders.push(order);
            }
        }
        Ok(orders)
    }
}
