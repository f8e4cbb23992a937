//! Order history aggregate.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{ExecutionStatus, OrderStatus, SagaExecution};
use crate::storage::{SagaStore, StorageError};

use super::timeline::{project_timeline, OrderTimeline};

/// Result type for history projection.
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Errors from history projection.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Human-facing order number: `ORD-YYYY-XXXXXXXX`, where `YYYY` is the
/// 4-digit UTC year of `created_at` and `XXXXXXXX` the first 8 hex
/// characters of the order id.
pub fn order_number(order_id: Uuid, created_at: DateTime<Utc>) -> String {
    let hex = order_id.simple().to_string();
    format!("ORD-{:04}-{}", created_at.year(), &hex[..8])
}

/// Condensed view of one execution for the history aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct SagaExecutionSummary {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub is_retry: bool,
    pub failed_step_index: Option<u32>,
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&SagaExecution> for SagaExecutionSummary {
    fn from(execution: &SagaExecution) -> Self {
        Self {
            execution_id: execution.id,
            status: execution.status,
            is_retry: execution.is_retry,
            failed_step_index: execution.failed_step_index,
            failure_reason: execution.failure_reason.clone(),
            started_at: execution.started_at,
            completed_at: execution.completed_at,
        }
    }
}

/// Structured history of one order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderHistory {
    pub order_id: Uuid,
    pub order_number: String,
    pub created_at: DateTime<Utc>,
    pub final_status: OrderStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeline: OrderTimeline,
    pub executions: Vec<SagaExecutionSummary>,
}

impl OrderHistory {
    /// Number of executions, including the first.
    pub fn total_attempts(&self) -> usize {
        self.executions.len()
    }

    /// Number of retry executions.
    pub fn retry_count(&self) -> usize {
        self.executions.iter().filter(|e| e.is_retry).count()
    }

    /// Whether the order reached terminal success.
    pub fn was_successful(&self) -> bool {
        self.final_status == OrderStatus::Completed
    }

    /// Whether any execution ended in compensation.
    pub fn had_compensations(&self) -> bool {
        self.executions
            .iter()
            .any(|e| e.status == ExecutionStatus::Compensated)
    }
}

/// Assembles [`OrderHistory`] aggregates from the persistence gateway.
pub struct HistoryProjector {
    store: Arc<dyn SagaStore>,
}

impl HistoryProjector {
    /// Create a projector over the store.
    pub fn new(store: Arc<dyn SagaStore>) -> Self {
        Self { store }
    }

    /// Build the history aggregate for an order.
    pub async fn history(&self, order_id: Uuid) -> Result<OrderHistory> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(HistoryError::OrderNotFound(order_id))?;

        let events = self.store.events_for_order(order_id).await?;
        let executions = self.store.load_executions(order_id).await?;

        let completed_at = if order.status.is_terminal() {
            executions.iter().filter_map(|e| e.completed_at).max()
        } else {
            None
        };

        Ok(OrderHistory {
            order_id,
            order_number: order_number(order_id, order.created_at),
            created_at: order.created_at,
            final_status: order.status,
            completed_at,
            timeline: project_timeline(order_id, &events),
            executions: executions.iter().map(SagaExecutionSummary::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_order_number_format() {
        let order_id = Uuid::parse_str("a1b2c3d4-0000-4000-8000-000000000000").unwrap();
        let created_at = Utc.with_ymd_and_hms(2024, 7, 15, 10, 30, 0).unwrap();

        assert_eq!(order_number(order_id, created_at), "ORD-2024-a1b2c3d4");
    }

    #[test]
    fn test_order_number_uses_utc_year() {
        let order_id = Uuid::from_u128(0xdeadbeef_u128 << 96);
        // Late on New Year's Eve in any western timezone is already the new
        // year in UTC.
        let created_at = Utc.with_ymd_and_hms(2025, 1, 1, 2, 0, 0).unwrap();

        assert!(order_number(order_id, created_at).starts_with("ORD-2025-"));
    }

    #[test]
    fn test_derived_properties() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let order_id = Uuid::from_u128(1);

        let mut first = SagaExecution::new(Uuid::from_u128(2), order_id, None, now);
        first.status = ExecutionStatus::Compensated;
        first.completed_at = Some(now);
        let mut retry = SagaExecution::new_retry(Uuid::from_u128(3), order_id, None, now);
        retry.status = ExecutionStatus::Completed;
        retry.completed_at = Some(now + chrono::Duration::minutes(5));

        let history = OrderHistory {
            order_id,
            order_number: order_number(order_id, now),
            created_at: now,
            final_status: OrderStatus::Completed,
            completed_at: retry.completed_at,
            timeline: project_timeline(order_id, &[]),
            executions: vec![(&first).into(), (&retry).into()],
        };

        assert_eq!(history.total_attempts(), 2);
        assert_eq!(history.retry_count(), 1);
        assert!(history.was_successful());
        assert!(history.had_compensations());
    }
}
