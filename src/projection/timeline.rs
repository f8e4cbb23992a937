//! Timeline projection.
//!
//! Reconstructs a human-readable timeline from an order's event log. The
//! projection is pure: the same event sequence always produces the same
//! timeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{ErrorInfo, EventOutcome, EventType, OrderEvent};
use crate::steps::names;

/// One rendered timeline entry.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub status: EventOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Ordered, rendered view of an order's lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct OrderTimeline {
    pub order_id: Uuid,
    pub entries: Vec<TimelineEntry>,
}

/// Render minor units as a dollar amount.
fn format_minor(amount: i64) -> String {
    format!("${}.{:02}", amount / 100, (amount % 100).abs())
}

fn detail_str<'a>(details: Option<&'a Value>, key: &str) -> Option<&'a str> {
    details.and_then(|d| d.get(key)).and_then(Value::as_str)
}

fn detail_i64(details: Option<&Value>, key: &str) -> Option<i64> {
    details.and_then(|d| d.get(key)).and_then(Value::as_i64)
}

/// Title and description for one event, per `(event_type, step_name)`.
fn render(event: &OrderEvent) -> (String, String) {
    let step = event.step_name.as_deref();
    let details = event.details.as_ref();

    match event.event_type {
        EventType::OrderCreated => {
            let description = match detail_i64(details, "totalAmount") {
                Some(total) => format!("Order received for a total of {}", format_minor(total)),
                None => "Order received and queued for processing".to_string(),
            };
            ("Order Placed".to_string(), description)
        }
        EventType::SagaStarted => (
            "Processing Started".to_string(),
            "The order workflow has begun".to_string(),
        ),
        EventType::StepStarted => match step {
            Some(names::INVENTORY) => (
                "Reserving Inventory".to_string(),
                "Holding stock for the ordered items".to_string(),
            ),
            Some(names::PAYMENT) => (
                "Processing Payment".to_string(),
                "Authorizing the charge with the payment provider".to_string(),
            ),
            Some(names::SHIPPING) => (
                "Arranging Shipping".to_string(),
                "Booking a carrier for delivery".to_string(),
            ),
            Some(other) => (format!("{other} Started"), String::new()),
            None => ("Step Started".to_string(), String::new()),
        },
        EventType::StepCompleted => match step {
            Some(names::INVENTORY) => {
                let description = match detail_str(details, "RESERVATION_ID") {
                    Some(id) => format!("Stock held under reservation {id}"),
                    None => "Stock held for the ordered items".to_string(),
                };
                ("Inventory Reserved".to_string(), description)
            }
            Some(names::PAYMENT) => {
                let description = match detail_i64(details, "totalCharged") {
                    Some(total) => format!("Charged {}", format_minor(total)),
                    None => "The charge was authorized".to_string(),
                };
                ("Payment Processed".to_string(), description)
            }
            Some(names::SHIPPING) => {
                let description = match detail_str(details, "TRACKING_NUMBER") {
                    Some(tracking) => format!("Shipment booked, tracking number {tracking}"),
                    None => "Shipment booked".to_string(),
                };
                ("Shipping Arranged".to_string(), description)
            }
            Some(other) => (format!("{other} Completed"), String::new()),
            None => ("Step Completed".to_string(), String::new()),
        },
        EventType::StepFailed => {
            let title = match step {
                Some(names::INVENTORY) => "Inventory Reservation Failed".to_string(),
                Some(names::PAYMENT) => "Payment Failed".to_string(),
                Some(names::SHIPPING) => "Shipping Arrangement Failed".to_string(),
                Some(other) => format!("{other} Failed"),
                None => "Step Failed".to_string(),
            };
            let description = event
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "The step did not complete".to_string());
            (title, description)
        }
        EventType::CompensationStarted => (
            "Rolling Back".to_string(),
            "Reversing the completed steps of this order".to_string(),
        ),
        EventType::StepCompensated => {
            if event.outcome == EventOutcome::Failed {
                let title = match step {
                    Some(names::INVENTORY) => "Inventory Release Failed".to_string(),
                    Some(names::PAYMENT) => "Payment Reversal Failed".to_string(),
                    Some(names::SHIPPING) => "Shipment Cancellation Failed".to_string(),
                    Some(other) => format!("{other} Reversal Failed"),
                    None => "Reversal Failed".to_string(),
                };
                let description = event
                    .error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "The reversal did not complete".to_string());
                (title, description)
            } else {
                match step {
                    Some(names::INVENTORY) => (
                        "Inventory Released".to_string(),
                        "The stock hold was released".to_string(),
                    ),
                    Some(names::PAYMENT) => (
                        "Payment Refunded".to_string(),
                        "The charge was voided".to_string(),
                    ),
                    Some(names::SHIPPING) => (
                        "Shipment Cancelled".to_string(),
                        "The carrier booking was cancelled".to_string(),
                    ),
                    Some(other) => (format!("{other} Reversed"), String::new()),
                    None => ("Step Reversed".to_string(), String::new()),
                }
            }
        }
        EventType::SagaCompleted => (
            "Processing Finished".to_string(),
            "All steps completed successfully".to_string(),
        ),
        EventType::SagaFailed => {
            let description = detail_str(details, "reason")
                .map(str::to_string)
                .unwrap_or_else(|| "A step failed and the order cannot proceed".to_string());
            ("Processing Failed".to_string(), description)
        }
        EventType::SagaCompensated => (
            "Rollback Complete".to_string(),
            "All reversible steps have been undone".to_string(),
        ),
        EventType::RetryInitiated => {
            let description = match detail_i64(details, "attemptNumber") {
                Some(n) => format!("Retry attempt {n} started"),
                None => "A retry was started".to_string(),
            };
            ("Retry Started".to_string(), description)
        }
        EventType::OrderCompleted => (
            "Order Completed".to_string(),
            "The order was fulfilled".to_string(),
        ),
        EventType::OrderCancelled => (
            "Order Cancelled".to_string(),
            "The order was rolled back and cancelled".to_string(),
        ),
    }
}

/// Project an order's events into a timeline.
///
/// Events are re-sorted under the canonical `(recorded_at, id)` key, so
/// callers may pass the log in any order.
pub fn project_timeline(order_id: Uuid, events: &[OrderEvent]) -> OrderTimeline {
    let mut ordered: Vec<&OrderEvent> = events.iter().collect();
    ordered.sort_by_key(|e| e.sort_key());

    let entries = ordered
        .into_iter()
        .map(|event| {
            let (title, description) = render(event);
            TimelineEntry {
                timestamp: event.recorded_at,
                title,
                description,
                status: event.outcome,
                step_name: event.step_name.clone(),
                details: event.details.clone(),
                error: event.error.clone(),
            }
        })
        .collect();

    OrderTimeline { order_id, entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_event(
        seq: u128,
        event_type: EventType,
        step_name: Option<&str>,
        outcome: EventOutcome,
        details: Option<Value>,
        error: Option<ErrorInfo>,
    ) -> OrderEvent {
        OrderEvent {
            id: Uuid::from_u128(seq),
            order_id: Uuid::from_u128(1000),
            saga_execution_id: None,
            event_type,
            step_name: step_name.map(str::to_string),
            outcome,
            details,
            error,
            recorded_at: chrono::DateTime::from_timestamp(1_700_000_000 + seq as i64, 0).unwrap(),
        }
    }

    #[test]
    fn test_payment_completed_embeds_total_charged() {
        let event = make_event(
            1,
            EventType::StepCompleted,
            Some(names::PAYMENT),
            EventOutcome::Success,
            Some(json!({"totalCharged": 5500})),
            None,
        );

        let timeline = project_timeline(event.order_id, &[event]);

        assert_eq!(timeline.entries[0].title, "Payment Processed");
        assert_eq!(timeline.entries[0].description, "Charged $55.00");
    }

    #[test]
    fn test_failure_entry_uses_error_message() {
        let event = make_event(
            1,
            EventType::StepFailed,
            Some(names::PAYMENT),
            EventOutcome::Failed,
            None,
            Some(ErrorInfo::new(
                crate::domain::codes::PAYMENT_DECLINED,
                "card declined",
                true,
            )),
        );

        let timeline = project_timeline(event.order_id, &[event]);

        assert_eq!(timeline.entries[0].title, "Payment Failed");
        assert_eq!(timeline.entries[0].description, "card declined");
        assert_eq!(timeline.entries[0].status, EventOutcome::Failed);
    }

    #[test]
    fn test_compensated_steps_have_step_specific_titles() {
        let events = vec![
            make_event(
                1,
                EventType::StepCompensated,
                Some(names::INVENTORY),
                EventOutcome::Compensated,
                None,
                None,
            ),
            make_event(
                2,
                EventType::StepCompensated,
                Some(names::PAYMENT),
                EventOutcome::Compensated,
                None,
                None,
            ),
            make_event(
                3,
                EventType::StepCompensated,
                Some(names::SHIPPING),
                EventOutcome::Compensated,
                None,
                None,
            ),
        ];

        let timeline = project_timeline(events[0].order_id, &events);

        let titles: Vec<&str> = timeline.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Inventory Released", "Payment Refunded", "Shipment Cancelled"]
        );
    }

    #[test]
    fn test_anomalous_compensation_renders_as_reversal_failure() {
        let event = make_event(
            1,
            EventType::StepCompensated,
            Some(names::PAYMENT),
            EventOutcome::Failed,
            None,
            Some(ErrorInfo::compensation_failed("void rejected")),
        );

        let timeline = project_timeline(event.order_id, &[event]);

        assert_eq!(timeline.entries[0].title, "Payment Reversal Failed");
        assert_eq!(timeline.entries[0].description, "void rejected");
    }

    #[test]
    fn test_projection_is_deterministic_and_order_insensitive() {
        let events = vec![
            make_event(1, EventType::OrderCreated, None, EventOutcome::Neutral, Some(json!({"totalAmount": 5000})), None),
            make_event(2, EventType::SagaStarted, None, EventOutcome::Neutral, None, None),
            make_event(
                3,
                EventType::StepStarted,
                Some(names::INVENTORY),
                EventOutcome::Neutral,
                None,
                None,
            ),
        ];
        let mut shuffled = events.clone();
        shuffled.reverse();

        let a = project_timeline(events[0].order_id, &events);
        let b = project_timeline(events[0].order_id, &shuffled);

        let render = |t: &OrderTimeline| {
            t.entries
                .iter()
                .map(|e| (e.timestamp, e.title.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(render(&a), render(&b));
        assert_eq!(a.entries[0].title, "Order Placed");
        assert_eq!(
            a.entries[0].description,
            "Order received for a total of $50.00"
        );
    }
}
