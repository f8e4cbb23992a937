//! Shipping arrangement step.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::context::SagaContext;
use crate::domain::NewOrderItem;
use crate::step::{CompensationResult, SagaStep, StepResult, StepValidity};

use super::{keys, missing_context, names, CollaboratorError};

/// Current state of a shipment, as reported by the carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipmentState {
    /// Booked and not yet collected.
    Scheduled,
    /// The booking window lapsed; rebooking is routine.
    Expired,
    /// The booking was cancelled.
    Cancelled,
}

/// A successful shipping arrangement.
#[derive(Debug, Clone)]
pub struct Shipment {
    pub shipment_id: String,
    pub tracking_number: String,
    pub estimated_delivery: DateTime<Utc>,
}

/// Shipping collaborator contract.
///
/// `arrange` is keyed by order id: repeated calls for the same order must
/// return the existing booking. `cancel` must tolerate already-cancelled
/// shipments.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Book a shipment for the order's items to the given address.
    async fn arrange(
        &self,
        order_id: Uuid,
        items: &[NewOrderItem],
        shipping_address: &str,
    ) -> Result<Shipment, CollaboratorError>;

    /// Cancel a booked shipment.
    async fn cancel(&self, shipment_id: &str) -> Result<(), CollaboratorError>;

    /// Report the current state of a shipment.
    async fn shipment_state(&self, shipment_id: &str) -> Result<ShipmentState, CollaboratorError>;
}

/// Books the shipment; compensation cancels the booking.
pub struct ShippingArrangementStep<S> {
    service: S,
}

impl<S: ShippingService> ShippingArrangementStep<S> {
    /// Create the step over a shipping collaborator.
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: ShippingService> SagaStep for ShippingArrangementStep<S> {
    fn name(&self) -> &str {
        names::SHIPPING
    }

    async fn execute(&self, context: &SagaContext) -> StepResult {
        let order_id = match context.get(keys::ORDER_ID) {
            Ok(Some(id)) => id,
            _ => return StepResult::fail(missing_context(keys::ORDER_ID.name())),
        };
        let items = match context.get(keys::ORDER_ITEMS) {
            Ok(Some(items)) => items,
            _ => return StepResult::fail(missing_context(keys::ORDER_ITEMS.name())),
        };
        let address = match context.get(keys::SHIPPING_ADDRESS) {
            Ok(Some(address)) => address,
            _ => return StepResult::fail(missing_context(keys::SHIPPING_ADDRESS.name())),
        };

        match self.service.arrange(order_id, &items, &address).await {
            Ok(shipment) => {
                let mut data = BTreeMap::new();
                data.insert(
                    keys::SHIPMENT_ID.name().to_string(),
                    Value::String(shipment.shipment_id),
                );
                data.insert(
                    keys::TRACKING_NUMBER.name().to_string(),
                    Value::String(shipment.tracking_number),
                );
                data.insert(
                    keys::ESTIMATED_DELIVERY.name().to_string(),
                    serde_json::to_value(shipment.estimated_delivery)
                        .unwrap_or(Value::Null),
                );
                StepResult::ok(data)
            }
            Err(e) => StepResult::fail(e.into_error_info()),
        }
    }

    async fn compensate(&self, context: &SagaContext) -> CompensationResult {
        let shipment_id = match context.get(keys::SHIPMENT_ID) {
            Ok(Some(id)) => id,
            _ => {
                return CompensationResult::ok_with_message(
                    "no shipment recorded; nothing to cancel",
                )
            }
        };

        match self.service.cancel(&shipment_id).await {
            Ok(()) => CompensationResult::ok(),
            Err(e) => CompensationResult::fail(e.to_string()),
        }
    }

    async fn check_validity(&self, context: &SagaContext) -> StepValidity {
        let shipment_id = match context.get(keys::SHIPMENT_ID) {
            Ok(Some(id)) => id,
            _ => return StepValidity::RequiresReExecution("no shipment recorded".to_string()),
        };

        match self.service.shipment_state(&shipment_id).await {
            Ok(ShipmentState::Scheduled) => StepValidity::Valid,
            Ok(ShipmentState::Expired) => {
                StepValidity::ExpiredButRefreshable(format!("shipment {shipment_id} expired"))
            }
            Ok(ShipmentState::Cancelled) => StepValidity::RequiresReExecution(format!(
                "shipment {shipment_id} was cancelled"
            )),
            Err(e) => StepValidity::RequiresReExecution(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{codes, ErrorInfo};
    use std::sync::Mutex;

    struct FakeShipping {
        unavailable: bool,
        cancelled: Mutex<Vec<String>>,
    }

    impl FakeShipping {
        fn booking() -> Self {
            Self {
                unavailable: false,
                cancelled: Mutex::new(Vec::new()),
            }
        }

        fn unavailable() -> Self {
            Self {
                unavailable: true,
                cancelled: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ShippingService for &FakeShipping {
        async fn arrange(
            &self,
            _order_id: Uuid,
            _items: &[NewOrderItem],
            _shipping_address: &str,
        ) -> Result<Shipment, CollaboratorError> {
            if self.unavailable {
                Err(CollaboratorError::Rejected(ErrorInfo::new(
                    codes::SHIPPING_UNAVAILABLE,
                    "no carrier serves this address",
                    false,
                )))
            } else {
                Ok(Shipment {
                    shipment_id: "S-1".to_string(),
                    tracking_number: "TRK-0001".to_string(),
                    estimated_delivery: Utc::now() + chrono::Duration::days(3),
                })
            }
        }

        async fn cancel(&self, shipment_id: &str) -> Result<(), CollaboratorError> {
            self.cancelled.lock().unwrap().push(shipment_id.to_string());
            Ok(())
        }

        async fn shipment_state(
            &self,
            _shipment_id: &str,
        ) -> Result<ShipmentState, CollaboratorError> {
            Ok(ShipmentState::Scheduled)
        }
    }

    fn seeded_context(order_id: Uuid) -> SagaContext {
        let mut ctx = SagaContext::new();
        ctx.put(keys::ORDER_ID, &order_id).unwrap();
        ctx.put(keys::SHIPPING_ADDRESS, &"1 Main St".to_string())
            .unwrap();
        ctx.put(
            keys::ORDER_ITEMS,
            &vec![NewOrderItem {
                product_id: "P1".to_string(),
                product_name: "Widget".to_string(),
                quantity: 1,
                unit_price_minor: 100,
            }],
        )
        .unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_execute_records_shipment_fields() {
        let service = FakeShipping::booking();
        let step = ShippingArrangementStep::new(&service);

        let result = step.execute(&seeded_context(Uuid::new_v4())).await;

        assert!(result.success);
        assert_eq!(
            result.data.get(keys::SHIPMENT_ID.name()),
            Some(&Value::String("S-1".to_string()))
        );
        assert_eq!(
            result.data.get(keys::TRACKING_NUMBER.name()),
            Some(&Value::String("TRK-0001".to_string()))
        );
        assert!(result.data.contains_key(keys::ESTIMATED_DELIVERY.name()));
    }

    #[tokio::test]
    async fn test_execute_surfaces_unavailability() {
        let service = FakeShipping::unavailable();
        let step = ShippingArrangementStep::new(&service);

        let result = step.execute(&seeded_context(Uuid::new_v4())).await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, codes::SHIPPING_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_compensate_cancels_shipment() {
        let service = FakeShipping::booking();
        let step = ShippingArrangementStep::new(&service);
        let mut ctx = seeded_context(Uuid::new_v4());
        ctx.put(keys::SHIPMENT_ID, &"S-1".to_string()).unwrap();

        let result = step.compensate(&ctx).await;

        assert!(result.success);
        assert_eq!(*service.cancelled.lock().unwrap(), vec!["S-1".to_string()]);
    }
}
