//! Lifecycle event construction.
//!
//! `EventRecorder` builds the `OrderEvent` rows the engine hands to the
//! persistence gateway. Ids and timestamps come from the injected generators
//! so event construction is deterministic under test. The gateway appends
//! each row in the same transaction as the state change it describes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::domain::{ErrorInfo, EventOutcome, EventType, OrderEvent};
use crate::utils::{Clock, IdGenerator};

/// Builds lifecycle events, one constructor per catalogue entry.
#[derive(Clone)]
pub struct EventRecorder {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl EventRecorder {
    /// Create a recorder over a clock and id source.
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { clock, ids }
    }

    fn event(
        &self,
        order_id: Uuid,
        execution_id: Option<Uuid>,
        event_type: EventType,
        step_name: Option<&str>,
        outcome: EventOutcome,
        details: Option<Value>,
        error: Option<ErrorInfo>,
    ) -> OrderEvent {
        OrderEvent {
            id: self.ids.next_id(),
            order_id,
            saga_execution_id: execution_id,
            event_type,
            step_name: step_name.map(str::to_string),
            outcome,
            details,
            error,
            recorded_at: self.clock.now(),
        }
    }

    /// `ORDER_CREATED` — appended with the order insert.
    pub fn order_created(&self, order_id: Uuid, total_amount_minor: i64) -> OrderEvent {
        let mut details = BTreeMap::new();
        details.insert("totalAmount".to_string(), Value::from(total_amount_minor));
        self.event(
            order_id,
            None,
            EventType::OrderCreated,
            None,
            EventOutcome::Neutral,
            Some(to_object(details)),
            None,
        )
    }

    /// `SAGA_STARTED` — the execution moved `PENDING → IN_PROGRESS`.
    pub fn saga_started(&self, order_id: Uuid, execution_id: Uuid) -> OrderEvent {
        self.event(
            order_id,
            Some(execution_id),
            EventType::SagaStarted,
            None,
            EventOutcome::Neutral,
            None,
            None,
        )
    }

    /// `STEP_STARTED`.
    pub fn step_started(&self, order_id: Uuid, execution_id: Uuid, step_name: &str) -> OrderEvent {
        self.event(
            order_id,
            Some(execution_id),
            EventType::StepStarted,
            Some(step_name),
            EventOutcome::Neutral,
            None,
            None,
        )
    }

    /// `STEP_COMPLETED` — carries the step's result data as details.
    pub fn step_completed(
        &self,
        order_id: Uuid,
        execution_id: Uuid,
        step_name: &str,
        data: &BTreeMap<String, Value>,
    ) -> OrderEvent {
        let details = if data.is_empty() {
            None
        } else {
            Some(to_object(data.clone()))
        };
        self.event(
            order_id,
            Some(execution_id),
            EventType::StepCompleted,
            Some(step_name),
            EventOutcome::Success,
            details,
            None,
        )
    }

    /// `STEP_FAILED`.
    pub fn step_failed(
        &self,
        order_id: Uuid,
        execution_id: Uuid,
        step_name: &str,
        error: ErrorInfo,
    ) -> OrderEvent {
        self.event(
            order_id,
            Some(execution_id),
            EventType::StepFailed,
            Some(step_name),
            EventOutcome::Failed,
            None,
            Some(error),
        )
    }

    /// `COMPENSATION_STARTED`.
    pub fn compensation_started(&self, order_id: Uuid, execution_id: Uuid) -> OrderEvent {
        self.event(
            order_id,
            Some(execution_id),
            EventType::CompensationStarted,
            None,
            EventOutcome::Neutral,
            None,
            None,
        )
    }

    /// `STEP_COMPENSATED`.
    pub fn step_compensated(
        &self,
        order_id: Uuid,
        execution_id: Uuid,
        step_name: &str,
    ) -> OrderEvent {
        self.event(
            order_id,
            Some(execution_id),
            EventType::StepCompensated,
            Some(step_name),
            EventOutcome::Compensated,
            None,
            None,
        )
    }

    /// `STEP_COMPENSATED`-slot anomaly: the compensation itself failed.
    pub fn step_compensation_failed(
        &self,
        order_id: Uuid,
        execution_id: Uuid,
        step_name: &str,
        message: &str,
    ) -> OrderEvent {
        self.event(
            order_id,
            Some(execution_id),
            EventType::StepCompensated,
            Some(step_name),
            EventOutcome::Failed,
            None,
            Some(ErrorInfo::compensation_failed(message)),
        )
    }

    /// `SAGA_COMPLETED`.
    pub fn saga_completed(&self, order_id: Uuid, execution_id: Uuid) -> OrderEvent {
        self.event(
            order_id,
            Some(execution_id),
            EventType::SagaCompleted,
            None,
            EventOutcome::Success,
            None,
            None,
        )
    }

    /// `SAGA_FAILED`.
    pub fn saga_failed(
        &self,
        order_id: Uuid,
        execution_id: Uuid,
        failed_step: &str,
        reason: &str,
    ) -> OrderEvent {
        let mut details = BTreeMap::new();
        details.insert("failedStep".to_string(), Value::from(failed_step));
        details.insert("reason".to_string(), Value::from(reason));
        self.event(
            order_id,
            Some(execution_id),
            EventType::SagaFailed,
            Some(failed_step),
            EventOutcome::Failed,
            Some(to_object(details)),
            None,
        )
    }

    /// `SAGA_COMPENSATED`.
    pub fn saga_compensated(&self, order_id: Uuid, execution_id: Uuid) -> OrderEvent {
        self.event(
            order_id,
            Some(execution_id),
            EventType::SagaCompensated,
            None,
            EventOutcome::Compensated,
            None,
            None,
        )
    }

    /// `RETRY_INITIATED` — details carry attempt number, skipped steps, and
    /// the resumption point.
    pub fn retry_initiated(
        &self,
        order_id: Uuid,
        execution_id: Uuid,
        attempt_number: u32,
        skipped_step_names: &[String],
        resumed_from_step_name: Option<&str>,
    ) -> OrderEvent {
        let mut details = BTreeMap::new();
        details.insert("attemptNumber".to_string(), Value::from(attempt_number));
        details.insert(
            "skippedSteps".to_string(),
            Value::from(skipped_step_names.to_vec()),
        );
        if let Some(step) = resumed_from_step_name {
            details.insert("resumedFrom".to_string(), Value::from(step));
        }
        self.event(
            order_id,
            Some(execution_id),
            EventType::RetryInitiated,
            None,
            EventOutcome::Neutral,
            Some(to_object(details)),
            None,
        )
    }

    /// `ORDER_COMPLETED`.
    pub fn order_completed(&self, order_id: Uuid, execution_id: Uuid) -> OrderEvent {
        self.event(
            order_id,
            Some(execution_id),
            EventType::OrderCompleted,
            None,
            EventOutcome::Success,
            None,
            None,
        )
    }

    /// `ORDER_CANCELLED`.
    pub fn order_cancelled(&self, order_id: Uuid, execution_id: Uuid) -> OrderEvent {
        self.event(
            order_id,
            Some(execution_id),
            EventType::OrderCancelled,
            None,
            EventOutcome::Compensated,
            None,
            None,
        )
    }
}

fn to_object(map: BTreeMap<String, Value>) -> Value {
    Value::Object(map.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{ManualClock, SequencedIds};
    use chrono::{TimeZone, Utc};

    fn make_recorder() -> EventRecorder {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        EventRecorder::new(
            Arc::new(ManualClock::starting_at(start)),
            Arc::new(SequencedIds::new()),
        )
    }

    #[test]
    fn test_step_completed_carries_data_as_details() {
        let recorder = make_recorder();
        let mut data = BTreeMap::new();
        data.insert("RESERVATION_ID".to_string(), Value::from("R-1"));

        let event = recorder.step_completed(Uuid::new_v4(), Uuid::new_v4(), "Inventory Reservation", &data);

        assert_eq!(event.event_type, EventType::StepCompleted);
        assert_eq!(event.outcome, EventOutcome::Success);
        assert_eq!(event.step_name.as_deref(), Some("Inventory Reservation"));
        assert_eq!(event.details.unwrap()["RESERVATION_ID"], "R-1");
    }

    #[test]
    fn test_step_completed_empty_data_has_no_details() {
        let recorder = make_recorder();
        let event =
            recorder.step_completed(Uuid::new_v4(), Uuid::new_v4(), "x", &BTreeMap::new());
        assert!(event.details.is_none());
    }

    #[test]
    fn test_compensation_failure_event_flags_anomaly() {
        let recorder = make_recorder();
        let event = recorder.step_compensation_failed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Payment Processing",
            "void rejected",
        );

        assert_eq!(event.event_type, EventType::StepCompensated);
        assert_eq!(event.outcome, EventOutcome::Failed);
        let error = event.error.unwrap();
        assert_eq!(error.code, crate::domain::codes::COMPENSATION_FAILED);
        assert!(error.message.contains("void rejected"));
    }

    #[test]
    fn test_retry_initiated_details() {
        let recorder = make_recorder();
        let skipped = vec!["Inventory Reservation".to_string()];

        let event = recorder.retry_initiated(
            Uuid::new_v4(),
            Uuid::new_v4(),
            2,
            &skipped,
            Some("Payment Processing"),
        );

        let details = event.details.unwrap();
        assert_eq!(details["attemptNumber"], 2);
        assert_eq!(details["skippedSteps"][0], "Inventory Reservation");
        assert_eq!(details["resumedFrom"], "Payment Processing");
    }

    #[test]
    fn test_recorder_is_deterministic_under_test_inputs() {
        let a = make_recorder().saga_started(Uuid::from_u128(1), Uuid::from_u128(2));
        let b = make_recorder().saga_started(Uuid::from_u128(1), Uuid::from_u128(2));

        assert_eq!(a.id, b.id);
        assert_eq!(a.recorded_at, b.recorded_at);
    }
}
