//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query
//! building, plus the DDL each SQL store applies in `init()`. Uuids and
//! timestamps are stored as TEXT (RFC 3339 for timestamps) so the same DDL
//! and bindings work on PostgreSQL and SQLite; JSON payloads are TEXT.

use sea_query::Iden;

/// Orders table schema.
#[derive(Iden)]
pub enum Orders {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "total_amount_minor"]
    TotalAmountMinor,
    #[iden = "status"]
    Status,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Order items table schema.
#[derive(Iden)]
pub enum OrderItems {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "order_id"]
    OrderId,
    #[iden = "product_id"]
    ProductId,
    #[iden = "product_name"]
    ProductName,
    #[iden = "quantity"]
    Quantity,
    #[iden = "unit_price_minor"]
    UnitPriceMinor,
}

/// Saga executions table schema.
#[derive(Iden)]
pub enum SagaExecutions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "order_id"]
    OrderId,
    #[iden = "current_step_index"]
    CurrentStepIndex,
    #[iden = "status"]
    Status,
    #[iden = "failed_step_index"]
    FailedStepIndex,
    #[iden = "failure_reason"]
    FailureReason,
    #[iden = "trace_id"]
    TraceId,
    #[iden = "is_retry"]
    IsRetry,
    #[iden = "context_seed"]
    ContextSeed,
    #[iden = "started_at"]
    StartedAt,
    #[iden = "completed_at"]
    CompletedAt,
    #[iden = "compensation_started_at"]
    CompensationStartedAt,
    #[iden = "compensation_completed_at"]
    CompensationCompletedAt,
}

/// Step executions table schema.
#[derive(Iden)]
pub enum StepExecutions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "saga_execution_id"]
    SagaExecutionId,
    #[iden = "order_id"]
    OrderId,
    #[iden = "step_name"]
    StepName,
    #[iden = "step_index"]
    StepIndex,
    #[iden = "status"]
    Status,
    #[iden = "started_at"]
    StartedAt,
    #[iden = "completed_at"]
    CompletedAt,
    #[iden = "compensated_at"]
    CompensatedAt,
    #[iden = "error_info"]
    ErrorInfo,
    #[iden = "result_payload"]
    ResultPayload,
}

/// Order events table schema.
#[derive(Iden)]
pub enum OrderEvents {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "order_id"]
    OrderId,
    #[iden = "saga_execution_id"]
    SagaExecutionId,
    #[iden = "event_type"]
    EventType,
    #[iden = "step_name"]
    StepName,
    #[iden = "outcome"]
    Outcome,
    #[iden = "details"]
    Details,
    #[iden = "error_info"]
    ErrorInfo,
    #[iden = "recorded_at"]
    RecordedAt,
}

/// Retry attempts table schema.
#[derive(Iden)]
pub enum RetryAttempts {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "order_id"]
    OrderId,
    #[iden = "original_execution_id"]
    OriginalExecutionId,
    #[iden = "retry_execution_id"]
    RetryExecutionId,
    #[iden = "attempt_number"]
    AttemptNumber,
    #[iden = "resumed_from_step_name"]
    ResumedFromStepName,
    #[iden = "skipped_step_names"]
    SkippedStepNames,
    #[iden = "outcome"]
    Outcome,
    #[iden = "failure_reason"]
    FailureReason,
    #[iden = "initiated_at"]
    InitiatedAt,
    #[iden = "completed_at"]
    CompletedAt,
}

/// SQL for creating the orders table.
pub const CREATE_ORDERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id TEXT NOT NULL PRIMARY KEY,
    customer_id TEXT NOT NULL,
    total_amount_minor BIGINT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// SQL for creating the order_items table.
pub const CREATE_ORDER_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS order_items (
    id TEXT NOT NULL PRIMARY KEY,
    order_id TEXT NOT NULL,
    product_id TEXT NOT NULL,
    product_name TEXT NOT NULL,
    quantity BIGINT NOT NULL,
    unit_price_minor BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);
"#;

/// SQL for creating the saga_executions table.
pub const CREATE_SAGA_EXECUTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS saga_executions (
    id TEXT NOT NULL PRIMARY KEY,
    order_id TEXT NOT NULL,
    current_step_index INTEGER NOT NULL,
    status TEXT NOT NULL,
    failed_step_index INTEGER,
    failure_reason TEXT,
    trace_id TEXT,
    is_retry INTEGER NOT NULL DEFAULT 0,
    context_seed TEXT,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    compensation_started_at TEXT,
    compensation_completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_saga_executions_order ON saga_executions(order_id);
CREATE INDEX IF NOT EXISTS idx_saga_executions_status ON saga_executions(status);
"#;

/// SQL for creating the step_executions table.
pub const CREATE_STEP_EXECUTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS step_executions (
    id TEXT NOT NULL PRIMARY KEY,
    saga_execution_id TEXT NOT NULL,
    order_id TEXT NOT NULL,
    step_name TEXT NOT NULL,
    step_index INTEGER NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    compensated_at TEXT,
    error_info TEXT,
    result_payload TEXT,
    UNIQUE (saga_execution_id, step_index)
);

CREATE INDEX IF NOT EXISTS idx_step_executions_order ON step_executions(order_id);
CREATE INDEX IF NOT EXISTS idx_step_executions_execution ON step_executions(saga_execution_id);
"#;

/// SQL for creating the order_events table.
pub const CREATE_ORDER_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS order_events (
    id TEXT NOT NULL PRIMARY KEY,
    order_id TEXT NOT NULL,
    saga_execution_id TEXT,
    event_type TEXT NOT NULL,
    step_name TEXT,
    outcome TEXT NOT NULL,
    details TEXT,
    error_info TEXT,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_order_events_order_time ON order_events(order_id, recorded_at, id);
"#;

/// SQL for creating the retry_attempts table.
pub const CREATE_RETRY_ATTEMPTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS retry_attempts (
    id TEXT NOT NULL PRIMARY KEY,
    order_id TEXT NOT NULL,
    original_execution_id TEXT NOT NULL,
    retry_execution_id TEXT,
    attempt_number INTEGER NOT NULL,
    resumed_from_step_name TEXT,
    skipped_step_names TEXT,
    outcome TEXT,
    failure_reason TEXT,
    initiated_at TEXT NOT NULL,
    completed_at TEXT,
    UNIQUE (order_id, attempt_number)
);

CREATE INDEX IF NOT EXISTS idx_retry_attempts_order ON retry_attempts(order_id);
"#;

/// All DDL statements in creation order.
pub const ALL_TABLES: &[&str] = &[
    CREATE_ORDERS_TABLE,
    CREATE_ORDER_ITEMS_TABLE,
    CREATE_SAGA_EXECUTIONS_TABLE,
    CREATE_STEP_EXECUTIONS_TABLE,
    CREATE_ORDER_EVENTS_TABLE,
    CREATE_RETRY_ATTEMPTS_TABLE,
];
