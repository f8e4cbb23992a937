//! Saga execution and per-step records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ErrorInfo;

/// Lifecycle of one saga execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl ExecutionStatus {
    /// Whether the execution state machine permits moving to `next`.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, Compensating)
                | (Compensating, Compensated)
        )
    }

    /// Whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Compensated)
    }

    /// Whether an execution in this status holds the order exclusively.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Pending | ExecutionStatus::InProgress | ExecutionStatus::Compensating
        )
    }

    /// Database string form.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::InProgress => "IN_PROGRESS",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Compensating => "COMPENSATING",
            ExecutionStatus::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "IN_PROGRESS" => Ok(ExecutionStatus::InProgress),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "COMPENSATING" => Ok(ExecutionStatus::Compensating),
            "COMPENSATED" => Ok(ExecutionStatus::Compensated),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One attempt to run a saga end-to-end.
///
/// A retry creates a new execution for the same order; executions are never
/// deleted.
#[derive(Debug, Clone)]
pub struct SagaExecution {
    pub id: Uuid,
    pub order_id: Uuid,
    pub current_step_index: u32,
    pub status: ExecutionStatus,
    pub failed_step_index: Option<u32>,
    pub failure_reason: Option<String>,
    pub trace_id: Option<String>,
    pub is_retry: bool,
    /// Initial context values (an object keyed by context-key name). The
    /// context of a crashed execution is rebuilt from this seed plus the
    /// persisted step result payloads.
    pub context_seed: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub compensation_started_at: Option<DateTime<Utc>>,
    pub compensation_completed_at: Option<DateTime<Utc>>,
    is_new: bool,
}

impl SagaExecution {
    /// Create a fresh execution in `Pending`.
    pub fn new(id: Uuid, order_id: Uuid, trace_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            order_id,
            current_step_index: 0,
            status: ExecutionStatus::Pending,
            failed_step_index: None,
            failure_reason: None,
            trace_id,
            is_retry: false,
            context_seed: None,
            started_at: now,
            completed_at: None,
            compensation_started_at: None,
            compensation_completed_at: None,
            is_new: true,
        }
    }

    /// Attach the initial context values.
    pub fn with_seed(mut self, seed: serde_json::Value) -> Self {
        self.context_seed = Some(seed);
        self
    }

    /// Create a fresh retry execution in `Pending`.
    pub fn new_retry(id: Uuid, order_id: Uuid, trace_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            is_retry: true,
            ..Self::new(id, order_id, trace_id, now)
        }
    }

    /// Reconstruct a persisted execution from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn hydrate(
        id: Uuid,
        order_id: Uuid,
        current_step_index: u32,
        status: ExecutionStatus,
        failed_step_index: Option<u32>,
        failure_reason: Option<String>,
        trace_id: Option<String>,
        is_retry: bool,
        context_seed: Option<serde_json::Value>,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        compensation_started_at: Option<DateTime<Utc>>,
        compensation_completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            order_id,
            current_step_index,
            status,
            failed_step_index,
            failure_reason,
            trace_id,
            is_retry,
            context_seed,
            started_at,
            completed_at,
            compensation_started_at,
            compensation_completed_at,
            is_new: false,
        }
    }

    /// Whether this entity has not been persisted yet.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Flip the persistence flag after a successful insert.
    pub fn mark_persisted(&mut self) {
        self.is_new = false;
    }
}

/// Lifecycle of one step record inside an execution.
///
/// `Skipped` is only assignable by the retry coordinator, for steps whose
/// previous effect is still valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Compensating,
    Compensated,
    Skipped,
}

impl StepStatus {
    /// Database string form.
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::InProgress => "IN_PROGRESS",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Compensating => "COMPENSATING",
            StepStatus::Compensated => "COMPENSATED",
            StepStatus::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(StepStatus::Pending),
            "IN_PROGRESS" => Ok(StepStatus::InProgress),
            "COMPLETED" => Ok(StepStatus::Completed),
            "FAILED" => Ok(StepStatus::Failed),
            "COMPENSATING" => Ok(StepStatus::Compensating),
            "COMPENSATED" => Ok(StepStatus::Compensated),
            "SKIPPED" => Ok(StepStatus::Skipped),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

/// One step's record inside an execution. `(saga_execution_id, step_index)`
/// is unique.
#[derive(Debug, Clone)]
pub struct StepExecution {
    pub id: Uuid,
    pub saga_execution_id: Uuid,
    pub step_name: String,
    pub step_index: u32,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub compensated_at: Option<DateTime<Utc>>,
    pub error: Option<ErrorInfo>,
    pub result_payload: Option<serde_json::Value>,
    is_new: bool,
}

impl StepExecution {
    /// Create a step record entering `InProgress`.
    pub fn starting(
        id: Uuid,
        saga_execution_id: Uuid,
        step_name: impl Into<String>,
        step_index: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            saga_execution_id,
            step_name: step_name.into(),
            step_index,
            status: StepStatus::InProgress,
            started_at: Some(now),
            completed_at: None,
            compensated_at: None,
            error: None,
            result_payload: None,
            is_new: true,
        }
    }

    /// Create a `Skipped` record for a still-valid step during retry.
    pub fn skipped(
        id: Uuid,
        saga_execution_id: Uuid,
        step_name: impl Into<String>,
        step_index: u32,
        carried_payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id,
            saga_execution_id,
            step_name: step_name.into(),
            step_index,
            status: StepStatus::Skipped,
            started_at: None,
            completed_at: None,
            compensated_at: None,
            error: None,
            result_payload: carried_payload,
            is_new: true,
        }
    }

    /// Reconstruct a persisted step record from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn hydrate(
        id: Uuid,
        saga_execution_id: Uuid,
        step_name: String,
        step_index: u32,
        status: StepStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        compensated_at: Option<DateTime<Utc>>,
        error: Option<ErrorInfo>,
        result_payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id,
            saga_execution_id,
            step_name,
            step_index,
            status,
            started_at,
            completed_at,
            compensated_at,
            error,
            result_payload,
            is_new: false,
        }
    }

    /// Whether this entity has not been persisted yet.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Flip the persistence flag after a successful insert.
    pub fn mark_persisted(&mut self) {
        self.is_new = false;
    }
}
