//! Saga persistence.
//!
//! This module contains:
//! - `SagaStore` trait: the transactional persistence gateway
//! - Storage configuration types
//! - Implementations: PostgreSQL, SQLite, in-memory mock
//!
//! Composite operations (step transitions, execution transitions) append the
//! corresponding lifecycle event in the same transaction, so any state a
//! reader can observe is also observable in the event log. `SagaExecution`
//! rows are guarded by optimistic concurrency on `(id, status)`: of two
//! workers racing to move the same execution, exactly one wins and the other
//! sees `VersionConflict`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    ExecutionStatus, Order, OrderEvent, OrderItem, OrderStatus, RetryAttempt, SagaExecution,
    StepExecution,
};

// Implementation modules
pub mod mock;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-exports
pub use mock::MockSagaStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresSagaStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSagaStore;

// ============================================================================
// Traits
// ============================================================================

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("Step record not found: execution={execution_id}, index={step_index}")]
    StepNotFound {
        execution_id: Uuid,
        step_index: u32,
    },

    #[error("Order {0} already has an execution in flight")]
    ExecutionInProgress(Uuid),

    #[error("Version conflict: execution {execution_id} is no longer {expected}")]
    VersionConflict {
        execution_id: Uuid,
        expected: ExecutionStatus,
    },

    #[error("Retry attempt {attempt_number} already exists for order {order_id}")]
    DuplicateRetryAttempt {
        order_id: Uuid,
        attempt_number: u32,
    },

    #[cfg(any(feature = "postgres", feature = "sqlite"))]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid row: {0}")]
    InvalidRow(String),
}

/// Field updates carried by an execution transition.
///
/// Only the fields relevant to the target status are set; unset fields are
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct TransitionChanges {
    pub failed_step_index: Option<u32>,
    pub failure_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub compensation_started_at: Option<DateTime<Utc>>,
    pub compensation_completed_at: Option<DateTime<Utc>>,
}

/// Transactional read/write of saga state.
///
/// Mutating operations that take an `OrderEvent` append it atomically with
/// the state change.
#[async_trait]
pub trait SagaStore: Send + Sync {
    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    /// Persist an order with its items and the `ORDER_CREATED` event.
    /// Atomic.
    async fn insert_order(
        &self,
        order: &Order,
        items: &[OrderItem],
        event: OrderEvent,
    ) -> Result<()>;

    /// Load an order.
    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>>;

    /// Load an order's items.
    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>>;

    /// Move an order to a new status, optionally appending an event in the
    /// same transaction.
    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
        event: Option<OrderEvent>,
    ) -> Result<()>;

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    /// Insert a fresh execution. Fails with `ExecutionInProgress` if the
    /// order already has an in-flight execution.
    async fn insert_execution(&self, execution: &SagaExecution) -> Result<()>;

    /// Load one execution.
    async fn get_execution(&self, execution_id: Uuid) -> Result<Option<SagaExecution>>;

    /// Optimistic-concurrency-guarded status transition: the update runs
    /// `WHERE status = from`; if the row no longer matches,
    /// `VersionConflict` is returned and nothing is written (the event is
    /// not appended either).
    async fn transition_execution(
        &self,
        execution_id: Uuid,
        from: ExecutionStatus,
        to: ExecutionStatus,
        changes: TransitionChanges,
        event: Option<OrderEvent>,
    ) -> Result<()>;

    /// Latest execution for an order with its step records in index order.
    async fn load_execution_for_resume(
        &self,
        order_id: Uuid,
    ) -> Result<Option<(SagaExecution, Vec<StepExecution>)>>;

    /// All executions for an order, oldest first.
    async fn load_executions(&self, order_id: Uuid) -> Result<Vec<SagaExecution>>;

    /// Executions left in `PENDING`, `IN_PROGRESS` or `COMPENSATING`, for
    /// the crash-recovery sweep.
    async fn list_unfinished_executions(&self) -> Result<Vec<SagaExecution>>;

    // ------------------------------------------------------------------
    // Step records
    // ------------------------------------------------------------------

    /// Insert a step record entering `IN_PROGRESS` and append
    /// `STEP_STARTED`. One transaction.
    async fn record_step_start(&self, step: &StepExecution, event: OrderEvent) -> Result<()>;

    /// Persist a completed step, bump the execution's `current_step_index`,
    /// and append `STEP_COMPLETED`. One transaction, guarded on the
    /// execution still being `IN_PROGRESS`.
    async fn record_step_completion(
        &self,
        step: &StepExecution,
        new_current_index: u32,
        event: OrderEvent,
    ) -> Result<()>;

    /// Persist a failed step, set the execution's `failed_step_index` and
    /// `failure_reason`, move it `IN_PROGRESS → FAILED`, and append
    /// `STEP_FAILED`. One transaction, optimistically guarded.
    async fn record_step_failure(
        &self,
        step: &StepExecution,
        failed_step_index: u32,
        failure_reason: &str,
        event: OrderEvent,
    ) -> Result<()>;

    /// Mark a step `COMPENSATING`.
    async fn record_step_compensating(&self, step: &StepExecution) -> Result<()>;

    /// Persist a compensated step and append `STEP_COMPENSATED`. One
    /// transaction.
    async fn record_step_compensated(&self, step: &StepExecution, event: OrderEvent) -> Result<()>;

    /// Persist a step whose compensation failed (anomaly) and append the
    /// failure event. One transaction.
    async fn record_step_compensation_failed(
        &self,
        step: &StepExecution,
        event: OrderEvent,
    ) -> Result<()>;

    /// Insert a `SKIPPED` step record (retry coordinator only).
    async fn record_step_skipped(&self, step: &StepExecution) -> Result<()>;

    /// Step records of an execution in index order.
    async fn step_executions(&self, execution_id: Uuid) -> Result<Vec<StepExecution>>;

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Append a lifecycle event outside any other transaction.
    async fn append_event(&self, event: OrderEvent) -> Result<()>;

    /// Events for an order, totally ordered by `(recorded_at, id)`.
    async fn events_for_order(&self, order_id: Uuid) -> Result<Vec<OrderEvent>>;

    // ------------------------------------------------------------------
    // Retry attempts
    // ------------------------------------------------------------------

    /// Insert a retry attempt. `(order_id, attempt_number)` must be unique.
    async fn insert_retry_attempt(&self, attempt: &RetryAttempt) -> Result<()>;

    /// Persist updated fields of an existing retry attempt (retry execution
    /// id, resumption metadata, outcome, completion time).
    async fn update_retry_attempt(&self, attempt: &RetryAttempt) -> Result<()>;

    /// Retry attempts for an order in attempt order.
    async fn list_retry_attempts(&self, order_id: Uuid) -> Result<Vec<RetryAttempt>>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Storage type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Sqlite,
    Postgres,
    Memory,
}

/// Storage configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// PostgreSQL-specific configuration.
    pub postgres: PostgresConfig,
    /// SQLite-specific configuration.
    pub sqlite: SqliteConfig,
}

/// PostgreSQL-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// PostgreSQL connection URI.
    pub uri: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            uri: "postgres://localhost:5432/edda".to_string(),
        }
    }
}

/// SQLite-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// SQLite connection URI.
    pub uri: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            uri: "sqlite://edda.db?mode=rwc".to_string(),
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize storage based on configuration.
///
/// Requires the corresponding feature to be enabled:
/// - SQLite: `--features sqlite` (included in default)
/// - PostgreSQL: `--features postgres`
///
/// The in-memory store needs no feature and no external service.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn SagaStore>, Box<dyn std::error::Error>> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: in-memory");
            Ok(Arc::new(MockSagaStore::new()))
        }
        StorageType::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                info!("Storage: sqlite at {}", config.sqlite.uri);

                let pool = sqlx::SqlitePool::connect(&config.sqlite.uri).await?;
                let store = SqliteSagaStore::new(pool);
                store.init().await?;

                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "sqlite"))]
            {
                Err("SQLite support requires the 'sqlite' feature. Rebuild with --features sqlite"
                    .into())
            }
        }
        StorageType::Postgres => {
            #[cfg(feature = "postgres")]
            {
                info!("Storage: postgres at {}", config.postgres.uri);

                let pool = sqlx::PgPool::connect(&config.postgres.uri).await?;
                let store = PostgresSagaStore::new(pool);
                store.init().await?;

                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "postgres"))]
            {
                Err("PostgreSQL support requires the 'postgres' feature. Rebuild with --features postgres".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_default() {
        let config = StorageConfig::default();
        assert_eq!(config.storage_type, StorageType::Sqlite);
        assert_eq!(config.sqlite.uri, "sqlite://edda.db?mode=rwc");
        assert_eq!(config.postgres.uri, "postgres://localhost:5432/edda");
    }

    #[tokio::test]
    async fn test_init_storage_memory() {
        let config = StorageConfig {
            storage_type: StorageType::Memory,
            ..Default::default()
        };

        let store = init_storage(&config).await.unwrap();
        assert!(store.list_unfinished_executions().await.unwrap().is_empty());
    }
}
