//! Retry attempt records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal outcome of a retry attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryOutcome {
    Success,
    Failed,
    Cancelled,
}

impl RetryOutcome {
    /// Database string form.
    pub fn as_str(self) -> &'static str {
        match self {
            RetryOutcome::Success => "SUCCESS",
            RetryOutcome::Failed => "FAILED",
            RetryOutcome::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for RetryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RetryOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(RetryOutcome::Success),
            "FAILED" => Ok(RetryOutcome::Failed),
            "CANCELLED" => Ok(RetryOutcome::Cancelled),
            other => Err(format!("unknown retry outcome: {other}")),
        }
    }
}

/// One caller-initiated retry of a failed order.
///
/// `(order_id, attempt_number)` is unique and attempt numbers are
/// consecutive, 1-based.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub id: Uuid,
    pub order_id: Uuid,
    pub original_execution_id: Uuid,
    pub retry_execution_id: Option<Uuid>,
    pub attempt_number: u32,
    pub resumed_from_step_name: Option<String>,
    pub skipped_step_names: Vec<String>,
    pub outcome: Option<RetryOutcome>,
    pub failure_reason: Option<String>,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    is_new: bool,
}

impl RetryAttempt {
    /// Open a new retry attempt; outcome is recorded when the retry
    /// execution terminates.
    pub fn initiated(
        id: Uuid,
        order_id: Uuid,
        original_execution_id: Uuid,
        attempt_number: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            order_id,
            original_execution_id,
            retry_execution_id: None,
            attempt_number,
            resumed_from_step_name: None,
            skipped_step_names: Vec::new(),
            outcome: None,
            failure_reason: None,
            initiated_at: now,
            completed_at: None,
            is_new: true,
        }
    }

    /// Reconstruct a persisted attempt from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn hydrate(
        id: Uuid,
        order_id: Uuid,
        original_execution_id: Uuid,
        retry_execution_id: Option<Uuid>,
        attempt_number: u32,
        resumed_from_step_name: Option<String>,
        skipped_step_names: Vec<String>,
        outcome: Option<RetryOutcome>,
        failure_reason: Option<String>,
        initiated_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            order_id,
            original_execution_id,
            retry_execution_id,
            attempt_number,
            resumed_from_step_name,
            skipped_step_names,
            outcome,
            failure_reason,
            initiated_at,
            completed_at,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiated_attempt_is_open() {
        let attempt =
            RetryAttempt::initiated(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 1, Utc::now());
        assert_eq!(attempt.attempt_number, 1);
        assert!(attempt.outcome.is_none());
        assert!(attempt.completed_at.is_none());
        assert!(attempt.is_new());
    }

    #[test]
    fn test_outcome_round_trips_through_strings() {
        for outcome in [
            RetryOutcome::Success,
            RetryOutcome::Failed,
            RetryOutcome::Cancelled,
        ] {
            let parsed: RetryOutcome = outcome.as_str().parse().unwrap();
            assert_eq!(parsed, outcome);
        }
    }
}
