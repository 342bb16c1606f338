use async_trait::async_trait;
use common::OrderId;
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};

use crate::{Result, SagaError, SagaState, SagaStateStore, SagaStatus, SagaStep};

/// PostgreSQL-backed saga state store.
#[derive(Clone)]
pub struct PostgresSagaStateStore {
    pool: PgPool,
}

impl PostgresSagaStateStore {
    /// Creates a new PostgreSQL saga state store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const SELECT_COLUMNS: &str = "SELECT saga_id, order_id, order_number, current_step, status, \
     completed_steps, last_error_message, compensation_attempts, started_at, completed_at \
     FROM saga_states";

fn corrupt(saga_id: &str, reason: String) -> SagaError {
    SagaError::Storage(format!("corrupt saga row {saga_id}: {reason}"))
}

fn row_to_state(row: &PgRow) -> Result<SagaState> {
    let saga_id: String = row.try_get("saga_id")?;

    let current_step: String = row.try_get("current_step")?;
    let current_step = SagaStep::parse(&current_step)
        .ok_or_else(|| corrupt(&saga_id, format!("unknown step {current_step}")))?;

    let status: String = row.try_get("status")?;
    let status = SagaStatus::parse(&status)
        .ok_or_else(|| corrupt(&saga_id, format!("unknown status {status}")))?;

    let Json(completed_steps): Json<Vec<SagaStep>> = row.try_get("completed_steps")?;

    let attempts: i32 = row.try_get("compensation_attempts")?;
    let compensation_attempts = u32::try_from(attempts)
        .map_err(|_| corrupt(&saga_id, format!("negative attempts {attempts}")))?;

    Ok(SagaState {
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        order_number: row.try_get("order_number")?,
        current_step,
        status,
        completed_steps,
        last_error_message: row.try_get("last_error_message")?,
        compensation_attempts,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        saga_id,
    })
}

#[async_trait]
impl SagaStateStore for PostgresSagaStateStore {
    async fn save(&self, state: &SagaState) -> Result<()> {
        let attempts = i32::try_from(state.compensation_attempts)
            .map_err(|_| corrupt(&state.saga_id, "attempts out of range".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO saga_states (saga_id, order_id, order_number, current_step, status,
                                     completed_steps, last_error_message, compensation_attempts,
                                     started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (saga_id) DO UPDATE SET
                current_step = EXCLUDED.current_step,
                status = EXCLUDED.status,
                completed_steps = EXCLUDED.completed_steps,
                last_error_message = EXCLUDED.last_error_message,
                compensation_attempts = EXCLUDED.compensation_attempts,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(&state.saga_id)
        .bind(state.order_id.as_uuid())
        .bind(&state.order_number)
        .bind(state.current_step.as_str())
        .bind(state.status.as_str())
        .bind(Json(&state.completed_steps))
        .bind(&state.last_error_message)
        .bind(attempts)
        .bind(state.started_at)
        .bind(state.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<SagaState>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE order_number = $1"))
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_state).transpose()
    }

    async fn find_by_saga_id(&self, saga_id: &str) -> Result<Option<SagaState>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE saga_id = $1"))
            .bind(saga_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_state).transpose()
    }

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = $1 ORDER BY started_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_state).collect()
    }
}
