//! PostgreSQL-backed store implementation.

use std::time::Duration;

use async_trait::async_trait;
use common::{Money, OrderId, PaymentId, UserId};
use saga::{SagaError, SagaState, SagaStateStore, SagaStep};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::records::{
    AttemptOutcome, NewOrder, NewOutboxEvent, OrderLineItemRecord, OrderRecord, OrderStatus,
    OutboxRecord, PaymentAttemptRecord, PaymentRecord, PaymentStatus,
};
use crate::repo::{OrderStore, OutboxStore, PaymentStore};

/// PostgreSQL store backed by a connection pool.
///
/// All cross-instance coordination (lease claims, conditional updates)
/// happens in SQL, so any number of component instances can share one
/// database.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn parse<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T> {
        value.parse().map_err(StoreError::Decode)
    }

    fn row_to_order(row: PgRow) -> Result<OrderRecord> {
        let status: String = row.try_get("status")?;
        let method: String = row.try_get("payment_method")?;
        Ok(OrderRecord {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            status: Self::parse(&status)?,
            total: Money::from_minor_units(row.try_get("total")?),
            delivery_address: row.try_get("delivery_address")?,
            payment_method: Self::parse(&method)?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_line_item(row: PgRow) -> Result<OrderLineItemRecord> {
        Ok(OrderLineItemRecord {
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            item_id: row.try_get("item_id")?,
            item_name: row.try_get("item_name")?,
            unit_price: Money::from_minor_units(row.try_get("unit_price")?),
            quantity: row.try_get::<i32, _>("quantity")? as u32,
            subtotal: Money::from_minor_units(row.try_get("subtotal")?),
        })
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxRecord> {
        Ok(OutboxRecord {
            id: row.try_get("id")?,
            aggregate_id: OrderId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            processed: row.try_get("processed")?,
            claimed_at: row.try_get("claimed_at")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
        })
    }

    fn row_to_payment(row: PgRow) -> Result<PaymentRecord> {
        let status: String = row.try_get("status")?;
        let method: String = row.try_get("payment_method")?;
        Ok(PaymentRecord {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            amount: Money::from_minor_units(row.try_get("amount")?),
            status: Self::parse(&status)?,
            payment_method: Self::parse(&method)?,
            idempotency_key: row.try_get("idempotency_key")?,
            transaction_ref: row.try_get("transaction_ref")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_attempt(row: PgRow) -> Result<PaymentAttemptRecord> {
        let outcome: Option<String> = row.try_get("outcome")?;
        Ok(PaymentAttemptRecord {
            id: row.try_get("id")?,
            payment_id: PaymentId::from_uuid(row.try_get::<Uuid, _>("payment_id")?),
            attempt_number: row.try_get("attempt_number")?,
            outcome: outcome.as_deref().map(Self::parse).transpose()?,
            error_message: row.try_get("error_message")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn row_to_saga(row: PgRow) -> std::result::Result<SagaState, SagaError> {
        let step: String = row
            .try_get("current_step")
            .map_err(|e| SagaError::Storage(e.to_string()))?;
        let steps: Vec<String> = row
            .try_get("steps_completed")
            .map_err(|e| SagaError::Storage(e.to_string()))?;
        Ok(SagaState {
            order_id: OrderId::from_uuid(
                row.try_get::<Uuid, _>("order_id")
                    .map_err(|e| SagaError::Storage(e.to_string()))?,
            ),
            current_step: step.parse().map_err(SagaError::Storage)?,
            steps_completed: steps
                .iter()
                .map(|s| s.parse().map_err(SagaError::Storage))
                .collect::<std::result::Result<_, _>>()?,
            compensation_needed: row
                .try_get("compensation_needed")
                .map_err(|e| SagaError::Storage(e.to_string()))?,
            version: row
                .try_get("version")
                .map_err(|e| SagaError::Storage(e.to_string()))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| SagaError::Storage(e.to_string()))?,
        })
    }

    async fn insert_outbox_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event: &NewOutboxEvent,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (aggregate_id, event_type, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(event.aggregate_id.as_uuid())
        .bind(&event.event_type)
        .bind(&event.payload)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn create_order(&self, new_order: NewOrder) -> Result<()> {
        let order = &new_order.order;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, total, delivery_address, payment_method, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.total.minor_units())
        .bind(&order.delivery_address)
        .bind(order.payment_method.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("orders_pkey")
            {
                return StoreError::DuplicateOrder(order.id);
            }
            StoreError::Database(e)
        })?;

        for item in &new_order.line_items {
            sqlx::query(
                r#"
                INSERT INTO order_line_items (order_id, item_id, item_name, unit_price, quantity, subtotal)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.order_id.as_uuid())
            .bind(&item.item_id)
            .bind(&item.item_name)
            .bind(item.unit_price.minor_units())
            .bind(item.quantity as i32)
            .bind(item.subtotal.minor_units())
            .execute(&mut *tx)
            .await?;
        }

        Self::insert_outbox_tx(&mut tx, &new_order.outbox_event).await?;

        let saga = &new_order.saga_state;
        let steps: Vec<&str> = saga.steps_completed.iter().map(|s| s.as_str()).collect();
        sqlx::query(
            r#"
            INSERT INTO order_saga_state (order_id, current_step, steps_completed, compensation_needed, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(saga.order_id.as_uuid())
        .bind(saga.current_step.as_str())
        .bind(&steps)
        .bind(saga.compensation_needed)
        .bind(saga.version)
        .bind(saga.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, status, total, delivery_address, payment_method,
                   failure_reason, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_line_items(&self, order_id: OrderId) -> Result<Vec<OrderLineItemRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, item_id, item_name, unit_price, quantity, subtotal
            FROM order_line_items
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_line_item).collect()
    }

    async fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        failure_reason: Option<String>,
        outbox_event: NewOutboxEvent,
    ) -> Result<Option<OrderRecord>> {
        let mut tx = self.pool.begin().await?;

        // Conditional on the status actually changing, so a redelivered
        // outcome event writes nothing.
        let row = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, failure_reason = $3, updated_at = now()
            WHERE id = $1 AND status <> $2
            RETURNING id, user_id, status, total, delivery_address, payment_method,
                      failure_reason, created_at, updated_at
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(status.as_str())
        .bind(&failure_reason)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM orders WHERE id = $1")
                .bind(order_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
            return match exists {
                Some(_) => Ok(None),
                None => Err(StoreError::OrderNotFound(order_id)),
            };
        };

        Self::insert_outbox_tx(&mut tx, &outbox_event).await?;
        tx.commit().await?;
        Ok(Some(Self::row_to_order(row)?))
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn claim_outbox_batch(&self, limit: usize, lease: Duration) -> Result<Vec<OutboxRecord>> {
        // SKIP LOCKED keeps concurrent publisher instances from blocking on
        // each other's claims; the lease column keeps a crashed instance
        // from stranding rows.
        let rows = sqlx::query(
            r#"
            UPDATE outbox_events
            SET claimed_at = now()
            WHERE id IN (
                SELECT id FROM outbox_events
                WHERE processed = false
                  AND (claimed_at IS NULL OR claimed_at < now() - make_interval(secs => $2))
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, aggregate_id, event_type, payload, processed, claimed_at,
                      created_at, processed_at
            "#,
        )
        .bind(limit as i64)
        .bind(lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        let mut claimed: Vec<OutboxRecord> = rows
            .into_iter()
            .map(Self::row_to_outbox)
            .collect::<Result<_>>()?;
        claimed.sort_by_key(|e| e.created_at);
        Ok(claimed)
    }

    async fn mark_outbox_processed(&self, event_id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed = true, processed_at = now()
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OutboxEventNotFound(event_id));
        }
        Ok(())
    }

    async fn release_outbox_claims(&self, event_ids: &[i64]) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET claimed_at = NULL
            WHERE id = ANY($1) AND processed = false
            "#,
        )
        .bind(event_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unprocessed_outbox_count(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE processed = false")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl PaymentStore for PostgresStore {
    async fn insert_payment(&self, payment: PaymentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, amount, status, payment_method,
                                  idempotency_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.amount.minor_units())
        .bind(payment.status.as_str())
        .bind(payment.payment_method.as_str())
        .bind(&payment.idempotency_key)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_payment_order")
            {
                return StoreError::DuplicatePayment(payment.order_id);
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn get_payment_by_order(&self, order_id: OrderId) -> Result<Option<PaymentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, amount, status, payment_method, idempotency_key,
                   transaction_ref, failure_reason, created_at, updated_at
            FROM payments
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn mark_payment_completed(
        &self,
        payment_id: PaymentId,
        transaction_ref: &str,
        outbox_event: NewOutboxEvent,
    ) -> Result<PaymentRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'COMPLETED', transaction_ref = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, order_id, amount, status, payment_method, idempotency_key,
                      transaction_ref, failure_reason, created_at, updated_at
            "#,
        )
        .bind(payment_id.as_uuid())
        .bind(transaction_ref)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::PaymentNotFound(payment_id))?;

        Self::insert_outbox_tx(&mut tx, &outbox_event).await?;
        tx.commit().await?;
        Self::row_to_payment(row)
    }

    async fn mark_payment_failed(
        &self,
        payment_id: PaymentId,
        reason: &str,
        outbox_event: NewOutboxEvent,
    ) -> Result<PaymentRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'FAILED', failure_reason = $2, updated_at = now()
            WHERE id = $1
            RETURNING id, order_id, amount, status, payment_method, idempotency_key,
                      transaction_ref, failure_reason, created_at, updated_at
            "#,
        )
        .bind(payment_id.as_uuid())
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::PaymentNotFound(payment_id))?;

        Self::insert_outbox_tx(&mut tx, &outbox_event).await?;
        tx.commit().await?;
        Self::row_to_payment(row)
    }

    async fn begin_payment_attempt(&self, payment_id: PaymentId) -> Result<PaymentAttemptRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO payment_attempts (payment_id, attempt_number)
            VALUES (
                $1,
                (SELECT COALESCE(MAX(attempt_number), 0) + 1
                 FROM payment_attempts WHERE payment_id = $1)
            )
            RETURNING id, payment_id, attempt_number, outcome, error_message,
                      started_at, completed_at
            "#,
        )
        .bind(payment_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_foreign_key_violation()
            {
                return StoreError::PaymentNotFound(payment_id);
            }
            StoreError::Database(e)
        })?;

        Self::row_to_attempt(row)
    }

    async fn finish_payment_attempt(
        &self,
        attempt_id: i64,
        outcome: AttemptOutcome,
        error_message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payment_attempts
            SET outcome = $2, error_message = $3, completed_at = now()
            WHERE id = $1
            "#,
        )
        .bind(attempt_id)
        .bind(outcome.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AttemptNotFound(attempt_id));
        }
        Ok(())
    }

    async fn list_payment_attempts(
        &self,
        payment_id: PaymentId,
    ) -> Result<Vec<PaymentAttemptRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payment_id, attempt_number, outcome, error_message,
                   started_at, completed_at
            FROM payment_attempts
            WHERE payment_id = $1
            ORDER BY attempt_number ASC
            "#,
        )
        .bind(payment_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_attempt).collect()
    }
}

#[async_trait]
impl SagaStateStore for PostgresStore {
    async fn get_saga_state(
        &self,
        order_id: OrderId,
    ) -> std::result::Result<Option<SagaState>, SagaError> {
        let row = sqlx::query(
            r#"
            SELECT order_id, current_step, steps_completed, compensation_needed,
                   version, updated_at
            FROM order_saga_state
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SagaError::Storage(e.to_string()))?;

        row.map(Self::row_to_saga).transpose()
    }

    async fn insert_saga_state(&self, state: SagaState) -> std::result::Result<(), SagaError> {
        let steps: Vec<&str> = state.steps_completed.iter().map(|s| s.as_str()).collect();
        sqlx::query(
            r#"
            INSERT INTO order_saga_state (order_id, current_step, steps_completed,
                                          compensation_needed, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(state.order_id.as_uuid())
        .bind(state.current_step.as_str())
        .bind(&steps)
        .bind(state.compensation_needed)
        .bind(state.version)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("order_saga_state_pkey")
            {
                return SagaError::AlreadyExists(state.order_id);
            }
            SagaError::Storage(e.to_string())
        })?;
        Ok(())
    }

    async fn advance_saga_state(
        &self,
        order_id: OrderId,
        expected: SagaStep,
        next: SagaStep,
    ) -> std::result::Result<SagaState, SagaError> {
        let row = sqlx::query(
            r#"
            UPDATE order_saga_state
            SET current_step = $3,
                steps_completed = array_append(steps_completed, $3),
                compensation_needed = compensation_needed OR $4,
                version = version + 1,
                updated_at = now()
            WHERE order_id = $1 AND current_step = $2
            RETURNING order_id, current_step, steps_completed, compensation_needed,
                      version, updated_at
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(next == SagaStep::Failed)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SagaError::Storage(e.to_string()))?;

        match row {
            Some(row) => Self::row_to_saga(row),
            None => {
                // Distinguish a missing saga from a stale expectation.
                match self.get_saga_state(order_id).await? {
                    Some(actual) => Err(SagaError::ConcurrentModification {
                        order_id,
                        expected,
                        actual: actual.current_step,
                    }),
                    None => Err(SagaError::NotFound(order_id)),
                }
            }
        }
    }
}
