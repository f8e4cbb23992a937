//! Append-only order lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ErrorInfo;

/// Lifecycle event catalogue. These names are contract; they appear verbatim
/// in the persisted log and in timeline projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    OrderCreated,
    SagaStarted,
    StepStarted,
    StepCompleted,
    StepFailed,
    CompensationStarted,
    StepCompensated,
    SagaCompleted,
    SagaFailed,
    SagaCompensated,
    RetryInitiated,
    OrderCompleted,
    OrderCancelled,
}

impl EventType {
    /// Database string form.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::OrderCreated => "ORDER_CREATED",
            EventType::SagaStarted => "SAGA_STARTED",
            EventType::StepStarted => "STEP_STARTED",
            EventType::StepCompleted => "STEP_COMPLETED",
            EventType::StepFailed => "STEP_FAILED",
            EventType::CompensationStarted => "COMPENSATION_STARTED",
            EventType::StepCompensated => "STEP_COMPENSATED",
            EventType::SagaCompleted => "SAGA_COMPLETED",
            EventType::SagaFailed => "SAGA_FAILED",
            EventType::SagaCompensated => "SAGA_COMPENSATED",
            EventType::RetryInitiated => "RETRY_INITIATED",
            EventType::OrderCompleted => "ORDER_COMPLETED",
            EventType::OrderCancelled => "ORDER_CANCELLED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORDER_CREATED" => Ok(EventType::OrderCreated),
            "SAGA_STARTED" => Ok(EventType::SagaStarted),
            "STEP_STARTED" => Ok(EventType::StepStarted),
            "STEP_COMPLETED" => Ok(EventType::StepCompleted),
            "STEP_FAILED" => Ok(EventType::StepFailed),
            "COMPENSATION_STARTED" => Ok(EventType::CompensationStarted),
            "STEP_COMPENSATED" => Ok(EventType::StepCompensated),
            "SAGA_COMPLETED" => Ok(EventType::SagaCompleted),
            "SAGA_FAILED" => Ok(EventType::SagaFailed),
            "SAGA_COMPENSATED" => Ok(EventType::SagaCompensated),
            "RETRY_INITIATED" => Ok(EventType::RetryInitiated),
            "ORDER_COMPLETED" => Ok(EventType::OrderCompleted),
            "ORDER_CANCELLED" => Ok(EventType::OrderCancelled),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// How the subject of an event turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventOutcome {
    Success,
    Failed,
    Compensated,
    Neutral,
}

impl EventOutcome {
    /// Database string form.
    pub fn as_str(self) -> &'static str {
        match self {
            EventOutcome::Success => "SUCCESS",
            EventOutcome::Failed => "FAILED",
            EventOutcome::Compensated => "COMPENSATED",
            EventOutcome::Neutral => "NEUTRAL",
        }
    }
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(EventOutcome::Success),
            "FAILED" => Ok(EventOutcome::Failed),
            "COMPENSATED" => Ok(EventOutcome::Compensated),
            "NEUTRAL" => Ok(EventOutcome::Neutral),
            other => Err(format!("unknown event outcome: {other}")),
        }
    }
}

/// One appended lifecycle event.
///
/// Totally ordered per order by `(recorded_at, id)`. Never updated or
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: Uuid,
    pub order_id: Uuid,
    pub saga_execution_id: Option<Uuid>,
    pub event_type: EventType,
    pub step_name: Option<String>,
    pub outcome: EventOutcome,
    pub details: Option<serde_json::Value>,
    pub error: Option<ErrorInfo>,
    pub recorded_at: DateTime<Utc>,
}

impl OrderEvent {
    /// Sort key implementing the per-order total order.
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.recorded_at, self.id)
    }
}
