//! Domain entities.
//!
//! This module contains:
//! - `Order` / `OrderItem`: the business aggregate the saga settles
//! - `SagaExecution` / `StepExecution`: one saga attempt and its step records
//! - `OrderEvent`: the append-only lifecycle log entry
//! - `RetryAttempt`: one caller-initiated retry of a failed order
//! - `ErrorInfo`: the structured failure value surfaced to callers
//!
//! All monetary values are integer minor units (cents). All timestamps are
//! UTC. Entities that persist carry an explicit `is_new` flag so the storage
//! layer decides INSERT vs UPDATE without inspecting id nullability.

pub mod error_info;
pub mod event;
pub mod execution;
pub mod order;
pub mod retry;

pub use error_info::{codes, ErrorInfo};
pub use event::{EventOutcome, EventType, OrderEvent};
pub use execution::{ExecutionStatus, SagaExecution, StepExecution, StepStatus};
pub use order::{NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, ValidationError};
pub use retry::{RetryAttempt, RetryOutcome};
