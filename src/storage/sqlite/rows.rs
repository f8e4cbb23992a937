//! Row-to-entity mapping for the SQLite store.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::{
    ErrorInfo, Order, OrderEvent, OrderItem, RetryAttempt, SagaExecution, StepExecution,
};
use crate::storage::{Result, StorageError};

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| StorageError::InvalidRow(format!("bad uuid '{value}': {e}")))
}

fn parse_uuid_opt(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidRow(format!("bad timestamp '{value}': {e}")))
}

fn parse_ts_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_enum<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(StorageError::InvalidRow)
}

fn parse_json_opt(value: Option<String>) -> Result<Option<serde_json::Value>> {
    Ok(match value {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    })
}

fn parse_error_opt(value: Option<String>) -> Result<Option<ErrorInfo>> {
    Ok(match value {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    })
}

pub(super) fn map_order(row: &SqliteRow) -> Result<Order> {
    Ok(Order::hydrate(
        parse_uuid(&row.get::<String, _>("id"))?,
        row.get("customer_id"),
        row.get("total_amount_minor"),
        parse_enum(&row.get::<String, _>("status"))?,
        parse_ts(&row.get::<String, _>("created_at"))?,
        parse_ts(&row.get::<String, _>("updated_at"))?,
    ))
}

pub(super) fn map_order_item(row: &SqliteRow) -> Result<OrderItem> {
    Ok(OrderItem {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        order_id: parse_uuid(&row.get::<String, _>("order_id"))?,
        product_id: row.get("product_id"),
        product_name: row.get("product_name"),
        quantity: row.get("quantity"),
        unit_price_minor: row.get("unit_price_minor"),
    })
}

pub(super) fn map_execution(row: &SqliteRow) -> Result<SagaExecution> {
    Ok(SagaExecution::hydrate(
        parse_uuid(&row.get::<String, _>("id"))?,
        parse_uuid(&row.get::<String, _>("order_id"))?,
        row.get::<i64, _>("current_step_index") as u32,
        parse_enum(&row.get::<String, _>("status"))?,
        row.get::<Option<i64>, _>("failed_step_index")
            .map(|i| i as u32),
        row.get("failure_reason"),
        row.get("trace_id"),
        row.get::<i64, _>("is_retry") != 0,
        parse_json_opt(row.get("context_seed"))?,
        parse_ts(&row.get::<String, _>("started_at"))?,
        parse_ts_opt(row.get("completed_at"))?,
        parse_ts_opt(row.get("compensation_started_at"))?,
        parse_ts_opt(row.get("compensation_completed_at"))?,
    ))
}

pub(super) fn map_step(row: &SqliteRow) -> Result<StepExecution> {
    Ok(StepExecution::hydrate(
        parse_uuid(&row.get::<String, _>("id"))?,
        parse_uuid(&row.get::<String, _>("saga_execution_id"))?,
        row.get("step_name"),
        row.get::<i64, _>("step_index") as u32,
        parse_enum(&row.get::<String, _>("status"))?,
        parse_ts_opt(row.get("started_at"))?,
        parse_ts_opt(row.get("completed_at"))?,
        parse_ts_opt(row.get("compensated_at"))?,
        parse_error_opt(row.get("error_info"))?,
        parse_json_opt(row.get("result_payload"))?,
    ))
}

pub(super) fn map_event(row: &SqliteRow) -> Result<OrderEvent> {
    Ok(OrderEvent {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        order_id: parse_uuid(&row.get::<String, _>("order_id"))?,
        saga_execution_id: parse_uuid_opt(row.get("saga_execution_id"))?,
        event_type: parse_enum(&row.get::<String, _>("event_type"))?,
        step_name: row.get("step_name"),
        outcome: parse_enum(&row.get::<String, _>("outcome"))?,
        details: parse_json_opt(row.get("details"))?,
        error: parse_error_opt(row.get("error_info"))?,
        recorded_at: parse_ts(&row.get::<String, _>("recorded_at"))?,
    })
}

pub(super) fn map_retry_attempt(row: &SqliteRow) -> Result<RetryAttempt> {
    let skipped: Vec<String> = match row.get::<Option<String>, _>("skipped_step_names") {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Vec::new(),
    };
    let outcome = row
        .get::<Option<String>, _>("outcome")
        .as_deref()
        .map(parse_enum)
        .transpose()?;

    Ok(RetryAttempt::hydrate(
        parse_uuid(&row.get::<String, _>("id"))?,
        parse_uuid(&row.get::<String, _>("order_id"))?,
        parse_uuid(&row.get::<String, _>("original_execution_id"))?,
        parse_uuid_opt(row.get("retry_execution_id"))?,
        row.get::<i64, _>("attempt_number") as u32,
        row.get("resumed_from_step_name"),
        skipped,
        outcome,
        row.get("failure_reason"),
        parse_ts(&row.get::<String, _>("initiated_at"))?,
        parse_ts_opt(row.get("completed_at"))?,
    ))
}
