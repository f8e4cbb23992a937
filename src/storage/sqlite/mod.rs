//! SQLite SagaStore implementation.
//!
//! Query building through sea-query, execution through sqlx. Write
//! transactions use `BEGIN IMMEDIATE` to take the write lock upfront,
//! preventing deadlocks when concurrent DEFERRED transactions race to
//! upgrade from shared to exclusive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::pool::PoolConnection;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    ErrorInfo, ExecutionStatus, Order as DomainOrder, OrderEvent, OrderItem, OrderStatus,
    RetryAttempt, SagaExecution, StepExecution,
};
use crate::storage::schema::{
    OrderEvents, OrderItems, Orders, RetryAttempts, SagaExecutions, StepExecutions, ALL_TABLES,
};
use crate::storage::{Result, SagaStore, StorageError, TransitionChanges};

mod rows;

use rows::{map_event, map_execution, map_order, map_order_item, map_retry_attempt, map_step};

/// SQLite implementation of [`SagaStore`].
pub struct SqliteSagaStore {
    pool: SqlitePool,
}

impl SqliteSagaStore {
    /// Create a new SQLite saga store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply the schema.
    pub async fn init(&self) -> Result<()> {
        for ddl in ALL_TABLES {
            sqlx::raw_sql(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Acquire a connection and open a write transaction.
    async fn begin(&self) -> Result<PoolConnection<Sqlite>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }

    /// Commit on success, roll back on error.
    async fn finish<T>(mut conn: PoolConnection<Sqlite>, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(value)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn opt_ts(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(ts)
}

fn json_opt(value: &Option<serde_json::Value>) -> Result<Option<String>> {
    Ok(match value {
        Some(v) => Some(serde_json::to_string(v)?),
        None => None,
    })
}

fn error_opt(error: &Option<ErrorInfo>) -> Result<Option<String>> {
    Ok(match error {
        Some(e) => Some(serde_json::to_string(e)?),
        None => None,
    })
}

/// INSERT statement for one event row.
fn insert_event_sql(event: &OrderEvent) -> Result<String> {
    Ok(Query::insert()
        .into_table(OrderEvents::Table)
        .columns([
            OrderEvents::Id,
            OrderEvents::OrderId,
            OrderEvents::SagaExecutionId,
            OrderEvents::EventType,
            OrderEvents::StepName,
            OrderEvents::Outcome,
            OrderEvents::Details,
            OrderEvents::ErrorInfo,
            OrderEvents::RecordedAt,
        ])
        .values_panic([
            event.id.to_string().into(),
            event.order_id.to_string().into(),
            event.saga_execution_id.map(|id| id.to_string()).into(),
            event.event_type.as_str().into(),
            event.step_name.clone().into(),
            event.outcome.as_str().into(),
            json_opt(&event.details)?.into(),
            error_opt(&event.error)?.into(),
            ts(event.recorded_at).into(),
        ])
        .to_string(SqliteQueryBuilder))
}

async fn tx_append_event(conn: &mut SqliteConnection, event: &OrderEvent) -> Result<()> {
    let sql = insert_event_sql(event)?;
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

/// Fetch the owning order id of an execution, inside a transaction.
async fn tx_execution_order_id(conn: &mut SqliteConnection, execution_id: Uuid) -> Result<String> {
    let sql = Query::select()
        .column(SagaExecutions::OrderId)
        .from(SagaExecutions::Table)
        .and_where(Expr::col(SagaExecutions::Id).eq(execution_id.to_string()))
        .to_string(SqliteQueryBuilder);

    let row = sqlx::query(&sql)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StorageError::ExecutionNotFound(execution_id))?;
    Ok(row.get("order_id"))
}

/// Upsert a step record keyed by `(saga_execution_id, step_index)`.
async fn tx_upsert_step(conn: &mut SqliteConnection, step: &StepExecution) -> Result<()> {
    let order_id = tx_execution_order_id(conn, step.saga_execution_id).await?;

    let sql = Query::insert()
        .into_table(StepExecutions::Table)
        .columns([
            StepExecutions::Id,
            StepExecutions::SagaExecutionId,
            StepExecutions::OrderId,
            StepExecutions::StepName,
            StepExecutions::StepIndex,
            StepExecutions::Status,
            StepExecutions::StartedAt,
            StepExecutions::CompletedAt,
            StepExecutions::CompensatedAt,
            StepExecutions::ErrorInfo,
            StepExecutions::ResultPayload,
        ])
        .values_panic([
            step.id.to_string().into(),
            step.saga_execution_id.to_string().into(),
            order_id.into(),
            step.step_name.clone().into(),
            (step.step_index as i64).into(),
            step.status.as_str().into(),
            opt_ts(step.started_at).into(),
            opt_ts(step.completed_at).into(),
            opt_ts(step.compensated_at).into(),
            error_opt(&step.error)?.into(),
            json_opt(&step.result_payload)?.into(),
        ])
        .on_conflict(
            OnConflict::columns([StepExecutions::SagaExecutionId, StepExecutions::StepIndex])
                .update_columns([
                    StepExecutions::Status,
                    StepExecutions::StartedAt,
                    StepExecutions::CompletedAt,
                    StepExecutions::CompensatedAt,
                    StepExecutions::ErrorInfo,
                    StepExecutions::ResultPayload,
                ])
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder);

    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

/// Guarded `UPDATE ... WHERE id = ? AND status = ?`; zero rows updated means
/// the optimistic check lost.
async fn tx_guarded_execution_update(
    conn: &mut SqliteConnection,
    execution_id: Uuid,
    expected: ExecutionStatus,
    to: ExecutionStatus,
    changes: &TransitionChanges,
) -> Result<()> {
    let mut update = Query::update();
    update
        .table(SagaExecutions::Table)
        .value(SagaExecutions::Status, to.as_str())
        .and_where(Expr::col(SagaExecutions::Id).eq(execution_id.to_string()))
        .and_where(Expr::col(SagaExecutions::Status).eq(expected.as_str()));

    if let Some(index) = changes.failed_step_index {
        update.value(SagaExecutions::FailedStepIndex, index as i64);
    }
    if let Some(reason) = &changes.failure_reason {
        update.value(SagaExecutions::FailureReason, reason.clone());
    }
    if let Some(at) = changes.completed_at {
        update.value(SagaExecutions::CompletedAt, ts(at));
    }
    if let Some(at) = changes.compensation_started_at {
        update.value(SagaExecutions::CompensationStartedAt, ts(at));
    }
    if let Some(at) = changes.compensation_completed_at {
        update.value(SagaExecutions::CompensationCompletedAt, ts(at));
    }

    let sql = update.to_string(SqliteQueryBuilder);
    let result = sqlx::query(&sql).execute(&mut *conn).await?;
    if result.rows_affected() == 0 {
        return Err(StorageError::VersionConflict {
            execution_id,
            expected,
        });
    }
    Ok(())
}

async fn tx_insert_order(
    conn: &mut SqliteConnection,
    order: &DomainOrder,
    items: &[OrderItem],
    event: &OrderEvent,
) -> Result<()> {
    let sql = Query::insert()
        .into_table(Orders::Table)
        .columns([
            Orders::Id,
            Orders::CustomerId,
            Orders::TotalAmountMinor,
            Orders::Status,
            Orders::CreatedAt,
            Orders::UpdatedAt,
        ])
        .values_panic([
            order.id.to_string().into(),
            order.customer_id.clone().into(),
            order.total_amount_minor.into(),
            order.status.as_str().into(),
            ts(order.created_at).into(),
            ts(order.updated_at).into(),
        ])
        .to_string(SqliteQueryBuilder);
    sqlx::query(&sql).execute(&mut *conn).await?;

    for item in items {
        let sql = Query::insert()
            .into_table(OrderItems::Table)
            .columns([
                OrderItems::Id,
                OrderItems::OrderId,
                OrderItems::ProductId,
                OrderItems::ProductName,
                OrderItems::Quantity,
                OrderItems::UnitPriceMinor,
            ])
            .values_panic([
                item.id.to_string().into(),
                item.order_id.to_string().into(),
                item.product_id.clone().into(),
                item.product_name.clone().into(),
                item.quantity.into(),
                item.unit_price_minor.into(),
            ])
            .to_string(SqliteQueryBuilder);
        sqlx::query(&sql).execute(&mut *conn).await?;
    }

    tx_append_event(conn, event).await
}

async fn tx_insert_execution(
    conn: &mut SqliteConnection,
    execution: &SagaExecution,
) -> Result<()> {
    let sql = Query::select()
        .expr(Expr::col(SagaExecutions::Id).count())
        .from(SagaExecutions::Table)
        .and_where(Expr::col(SagaExecutions::OrderId).eq(execution.order_id.to_string()))
        .and_where(Expr::col(SagaExecutions::Status).is_in([
            ExecutionStatus::Pending.as_str(),
            ExecutionStatus::InProgress.as_str(),
            ExecutionStatus::Compensating.as_str(),
        ]))
        .to_string(SqliteQueryBuilder);
    let row = sqlx::query(&sql).fetch_one(&mut *conn).await?;
    let in_flight: i64 = row.get(0);
    if in_flight > 0 {
        return Err(StorageError::ExecutionInProgress(execution.order_id));
    }

    let sql = Query::insert()
        .into_table(SagaExecutions::Table)
        .columns([
            SagaExecutions::Id,
            SagaExecutions::OrderId,
            SagaExecutions::CurrentStepIndex,
            SagaExecutions::Status,
            SagaExecutions::FailedStepIndex,
            SagaExecutions::FailureReason,
            SagaExecutions::TraceId,
            SagaExecutions::IsRetry,
            SagaExecutions::ContextSeed,
            SagaExecutions::StartedAt,
            SagaExecutions::CompletedAt,
            SagaExecutions::CompensationStartedAt,
            SagaExecutions::CompensationCompletedAt,
        ])
        .values_panic([
            execution.id.to_string().into(),
            execution.order_id.to_string().into(),
            (execution.current_step_index as i64).into(),
            execution.status.as_str().into(),
            execution.failed_step_index.map(|i| i as i64).into(),
            execution.failure_reason.clone().into(),
            execution.trace_id.clone().into(),
            (execution.is_retry as i64).into(),
            json_opt(&execution.context_seed)?.into(),
            ts(execution.started_at).into(),
            opt_ts(execution.completed_at).into(),
            opt_ts(execution.compensation_started_at).into(),
            opt_ts(execution.compensation_completed_at).into(),
        ])
        .to_string(SqliteQueryBuilder);
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

async fn tx_insert_retry_attempt(
    conn: &mut SqliteConnection,
    attempt: &RetryAttempt,
) -> Result<()> {
    let sql = Query::select()
        .expr(Expr::col(RetryAttempts::Id).count())
        .from(RetryAttempts::Table)
        .and_where(Expr::col(RetryAttempts::OrderId).eq(attempt.order_id.to_string()))
        .and_where(Expr::col(RetryAttempts::AttemptNumber).eq(attempt.attempt_number as i64))
        .to_string(SqliteQueryBuilder);
    let row = sqlx::query(&sql).fetch_one(&mut *conn).await?;
    let existing: i64 = row.get(0);
    if existing > 0 {
        return Err(StorageError::DuplicateRetryAttempt {
            order_id: attempt.order_id,
            attempt_number: attempt.attempt_number,
        });
    }

    let sql = Query::insert()
        .into_table(RetryAttempts::Table)
        .columns([
            RetryAttempts::Id,
            RetryAttempts::OrderId,
            RetryAttempts::OriginalExecutionId,
            RetryAttempts::RetryExecutionId,
            RetryAttempts::AttemptNumber,
            RetryAttempts::ResumedFromStepName,
            RetryAttempts::SkippedStepNames,
            RetryAttempts::Outcome,
            RetryAttempts::FailureReason,
            RetryAttempts::InitiatedAt,
            RetryAttempts::CompletedAt,
        ])
        .values_panic([
            attempt.id.to_string().into(),
            attempt.order_id.to_string().into(),
            attempt.original_execution_id.to_string().into(),
            attempt.retry_execution_id.map(|id| id.to_string()).into(),
            (attempt.attempt_number as i64).into(),
            attempt.resumed_from_step_name.clone().into(),
            serde_json::to_string(&attempt.skipped_step_names)?.into(),
            attempt.outcome.map(|o| o.as_str().to_string()).into(),
            attempt.failure_reason.clone().into(),
            ts(attempt.initiated_at).into(),
            opt_ts(attempt.completed_at).into(),
        ])
        .to_string(SqliteQueryBuilder);
    sqlx::query(&sql).execute(&mut *conn).await?;
    Ok(())
}

#[async_trait]
impl SagaStore for SqliteSagaStore {
    async fn insert_order(
        &self,
        order: &DomainOrder,
        items: &[OrderItem],
        event: OrderEvent,
    ) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = tx_insert_order(&mut conn, order, items, &event).await;
        Self::finish(conn, result).await
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<DomainOrder>> {
        let sql = Query::select()
            .columns([
                Orders::Id,
                Orders::CustomerId,
                Orders::TotalAmountMinor,
                Orders::Status,
                Orders::CreatedAt,
                Orders::UpdatedAt,
            ])
            .from(Orders::Table)
            .and_where(Expr::col(Orders::Id).eq(order_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.map(|r| map_order(&r)).transpose()
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        let sql = Query::select()
            .columns([
                OrderItems::Id,
                OrderItems::OrderId,
                OrderItems::ProductId,
                OrderItems::ProductName,
                OrderItems::Quantity,
                OrderItems::UnitPriceMinor,
            ])
            .from(OrderItems::Table)
            .and_where(Expr::col(OrderItems::OrderId).eq(order_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(map_order_item).collect()
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
        event: Option<OrderEvent>,
    ) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = async {
            let sql = Query::update()
                .table(Orders::Table)
                .value(Orders::Status, status.as_str())
                .value(Orders::UpdatedAt, ts(updated_at))
                .and_where(Expr::col(Orders::Id).eq(order_id.to_string()))
                .to_string(SqliteQueryBuilder);
            let outcome = sqlx::query(&sql).execute(&mut *conn).await?;
            if outcome.rows_affected() == 0 {
                return Err(StorageError::OrderNotFound(order_id));
            }
            if let Some(event) = &event {
                tx_append_event(&mut conn, event).await?;
            }
            Ok(())
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn insert_execution(&self, execution: &SagaExecution) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = tx_insert_execution(&mut conn, execution).await;
        Self::finish(conn, result).await
    }

    async fn get_execution(&self, execution_id: Uuid) -> Result<Option<SagaExecution>> {
        let sql = select_executions()
            .and_where(Expr::col(SagaExecutions::Id).eq(execution_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.map(|r| map_execution(&r)).transpose()
    }

    async fn transition_execution(
        &self,
        execution_id: Uuid,
        from: ExecutionStatus,
        to: ExecutionStatus,
        changes: TransitionChanges,
        event: Option<OrderEvent>,
    ) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = async {
            tx_guarded_execution_update(&mut conn, execution_id, from, to, &changes).await?;
            if let Some(event) = &event {
                tx_append_event(&mut conn, event).await?;
            }
            Ok(())
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn load_execution_for_resume(
        &self,
        order_id: Uuid,
    ) -> Result<Option<(SagaExecution, Vec<StepExecution>)>> {
        let sql = select_executions()
            .and_where(Expr::col(SagaExecutions::OrderId).eq(order_id.to_string()))
            .order_by(SagaExecutions::StartedAt, Order::Desc)
            .limit(1)
            .to_string(SqliteQueryBuilder);

        let Some(row) = sqlx::query(&sql).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let execution = map_execution(&row)?;
        let steps = self.step_executions(execution.id).await?;
        Ok(Some((execution, steps)))
    }

    async fn load_executions(&self, order_id: Uuid) -> Result<Vec<SagaExecution>> {
        let sql = select_executions()
            .and_where(Expr::col(SagaExecutions::OrderId).eq(order_id.to_string()))
            .order_by(SagaExecutions::StartedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(map_execution).collect()
    }

    async fn list_unfinished_executions(&self) -> Result<Vec<SagaExecution>> {
        let sql = select_executions()
            .and_where(Expr::col(SagaExecutions::Status).is_in([
                ExecutionStatus::Pending.as_str(),
                ExecutionStatus::InProgress.as_str(),
                ExecutionStatus::Compensating.as_str(),
            ]))
            .order_by(SagaExecutions::StartedAt, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(map_execution).collect()
    }

    async fn record_step_start(&self, step: &StepExecution, event: OrderEvent) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = async {
            tx_upsert_step(&mut conn, step).await?;
            tx_append_event(&mut conn, &event).await
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn record_step_completion(
        &self,
        step: &StepExecution,
        new_current_index: u32,
        event: OrderEvent,
    ) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = async {
            let sql = Query::update()
                .table(SagaExecutions::Table)
                .value(SagaExecutions::CurrentStepIndex, new_current_index as i64)
                .and_where(Expr::col(SagaExecutions::Id).eq(step.saga_execution_id.to_string()))
                .and_where(
                    Expr::col(SagaExecutions::Status).eq(ExecutionStatus::InProgress.as_str()),
                )
                .to_string(SqliteQueryBuilder);
            let outcome = sqlx::query(&sql).execute(&mut *conn).await?;
            if outcome.rows_affected() == 0 {
                return Err(StorageError::VersionConflict {
                    execution_id: step.saga_execution_id,
                    expected: ExecutionStatus::InProgress,
                });
            }

            tx_upsert_step(&mut conn, step).await?;
            tx_append_event(&mut conn, &event).await
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn record_step_failure(
        &self,
        step: &StepExecution,
        failed_step_index: u32,
        failure_reason: &str,
        event: OrderEvent,
    ) -> Result<()> {
        let changes = TransitionChanges {
            failed_step_index: Some(failed_step_index),
            failure_reason: Some(failure_reason.to_string()),
            ..Default::default()
        };
        let mut conn = self.begin().await?;
        let result = async {
            tx_guarded_execution_update(
                &mut conn,
                step.saga_execution_id,
                ExecutionStatus::InProgress,
                ExecutionStatus::Failed,
                &changes,
            )
            .await?;
            tx_upsert_step(&mut conn, step).await?;
            tx_append_event(&mut conn, &event).await
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn record_step_compensating(&self, step: &StepExecution) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = tx_upsert_step(&mut conn, step).await;
        Self::finish(conn, result).await
    }

    async fn record_step_compensated(&self, step: &StepExecution, event: OrderEvent) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = async {
            tx_upsert_step(&mut conn, step).await?;
            tx_append_event(&mut conn, &event).await
        }
        .await;
        Self::finish(conn, result).await
    }

    async fn record_step_compensation_failed(
        &self,
        step: &StepExecution,
        event: OrderEvent,
    ) -> Result<()> {
        self.record_step_compensated(step, event).await
    }

    async fn record_step_skipped(&self, step: &StepExecution) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = tx_upsert_step(&mut conn, step).await;
        Self::finish(conn, result).await
    }

    async fn step_executions(&self, execution_id: Uuid) -> Result<Vec<StepExecution>> {
        let sql = Query::select()
            .columns([
                StepExecutions::Id,
                StepExecutions::SagaExecutionId,
                StepExecutions::StepName,
                StepExecutions::StepIndex,
                StepExecutions::Status,
                StepExecutions::StartedAt,
                StepExecutions::CompletedAt,
                StepExecutions::CompensatedAt,
                StepExecutions::ErrorInfo,
                StepExecutions::ResultPayload,
            ])
            .from(StepExecutions::Table)
            .and_where(Expr::col(StepExecutions::SagaExecutionId).eq(execution_id.to_string()))
            .order_by(StepExecutions::StepIndex, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(map_step).collect()
    }

    async fn append_event(&self, event: OrderEvent) -> Result<()> {
        let sql = insert_event_sql(&event)?;
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn events_for_order(&self, order_id: Uuid) -> Result<Vec<OrderEvent>> {
        let sql = Query::select()
            .columns([
                OrderEvents::Id,
                OrderEvents::OrderId,
                OrderEvents::SagaExecutionId,
                OrderEvents::EventType,
                OrderEvents::StepName,
                OrderEvents::Outcome,
                OrderEvents::Details,
                OrderEvents::ErrorInfo,
                OrderEvents::RecordedAt,
            ])
            .from(OrderEvents::Table)
            .and_where(Expr::col(OrderEvents::OrderId).eq(order_id.to_string()))
            .order_by(OrderEvents::RecordedAt, Order::Asc)
            .order_by(OrderEvents::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(map_event).collect()
    }

    async fn insert_retry_attempt(&self, attempt: &RetryAttempt) -> Result<()> {
        let mut conn = self.begin().await?;
        let result = tx_insert_retry_attempt(&mut conn, attempt).await;
        Self::finish(conn, result).await
    }

    async fn update_retry_attempt(&self, attempt: &RetryAttempt) -> Result<()> {
        let sql = Query::update()
            .table(RetryAttempts::Table)
            .value(
                RetryAttempts::RetryExecutionId,
                attempt.retry_execution_id.map(|id| id.to_string()),
            )
            .value(
                RetryAttempts::ResumedFromStepName,
                attempt.resumed_from_step_name.clone(),
            )
            .value(
                RetryAttempts::SkippedStepNames,
                serde_json::to_string(&attempt.skipped_step_names)?,
            )
            .value(
                RetryAttempts::Outcome,
                attempt.outcome.map(|o| o.as_str().to_string()),
            )
            .value(RetryAttempts::FailureReason, attempt.failure_reason.clone())
            .value(RetryAttempts::CompletedAt, opt_ts(attempt.completed_at))
            .and_where(Expr::col(RetryAttempts::Id).eq(attempt.id.to_string()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&sql).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::OrderNotFound(attempt.order_id));
        }
        Ok(())
    }

    async fn list_retry_attempts(&self, order_id: Uuid) -> Result<Vec<RetryAttempt>> {
        let sql = Query::select()
            .columns([
                RetryAttempts::Id,
                RetryAttempts::OrderId,
                RetryAttempts::OriginalExecutionId,
                RetryAttempts::RetryExecutionId,
                RetryAttempts::AttemptNumber,
                RetryAttempts::ResumedFromStepName,
                RetryAttempts::SkippedStepNames,
                RetryAttempts::Outcome,
                RetryAttempts::FailureReason,
                RetryAttempts::InitiatedAt,
                RetryAttempts::CompletedAt,
            ])
            .from(RetryAttempts::Table)
            .and_where(Expr::col(RetryAttempts::OrderId).eq(order_id.to_string()))
            .order_by(RetryAttempts::AttemptNumber, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(map_retry_attempt).collect()
    }
}

/// Shared SELECT column list for executions.
fn select_executions() -> sea_query::SelectStatement {
    Query::select()
        .columns([
            SagaExecutions::Id,
            SagaExecutions::OrderId,
            SagaExecutions::CurrentStepIndex,
            SagaExecutions::Status,
            SagaExecutions::FailedStepIndex,
            SagaExecutions::FailureReason,
            SagaExecutions::TraceId,
            SagaExecutions::IsRetry,
            SagaExecutions::ContextSeed,
            SagaExecutions::StartedAt,
            SagaExecutions::CompletedAt,
            SagaExecutions::CompensationStartedAt,
            SagaExecutions::CompensationCompletedAt,
        ])
        .from(SagaExecutions::Table)
        .to_owned()
}
