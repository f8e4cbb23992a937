//! Inventory reservation step.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::context::SagaContext;
use crate::domain::NewOrderItem;
use crate::step::{CompensationResult, SagaStep, StepResult, StepValidity};

use super::{keys, missing_context, names, CollaboratorError};

/// Current state of a reservation, as reported by the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    /// Stock is still held.
    Active,
    /// The hold lapsed but the items can be re-reserved.
    Expired,
    /// The hold was released or never existed.
    Released,
}

/// A successful reservation.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub reservation_id: String,
}

/// Inventory collaborator contract.
///
/// `reserve` is keyed by order id: repeated calls for the same order must
/// return the same reservation rather than holding stock twice. `release`
/// must tolerate already-released reservations.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Place a hold on stock for the order's items.
    async fn reserve(
        &self,
        order_id: Uuid,
        items: &[NewOrderItem],
    ) -> Result<Reservation, CollaboratorError>;

    /// Release a previously placed hold.
    async fn release(&self, reservation_id: &str) -> Result<(), CollaboratorError>;

    /// Report the current state of a hold.
    async fn reservation_state(
        &self,
        reservation_id: &str,
    ) -> Result<ReservationState, CollaboratorError>;
}

/// Reserves stock for the order; compensation releases the hold.
pub struct InventoryReservationStep<S> {
    service: S,
}

impl<S: InventoryService> InventoryReservationStep<S> {
    /// Create the step over an inventory collaborator.
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: InventoryService> SagaStep for InventoryReservationStep<S> {
    fn name(&self) -> &str {
        names::INVENTORY
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

        match self.service.reserve(order_id, &items).await {
            Ok(reservation) => {
                let mut data = BTreeMap::new();
                data.insert(
                    keys::RESERVATION_ID.name().to_string(),
                    Value::String(reservation.reservation_id),
                );
                StepResult::ok(data)
            }
            Err(e) => StepResult::fail(e.into_error_info()),
        }
    }

    async fn compensate(&self, context: &SagaContext) -> CompensationResult {
        let reservation_id = match context.get(keys::RESERVATION_ID) {
            Ok(Some(id)) => id,
            _ => {
                return CompensationResult::ok_with_message(
                    "no reservation recorded; nothing to release",
                )
            }
        };

        match self.service.release(&reservation_id).await {
            Ok(()) => CompensationResult::ok(),
            Err(e) => CompensationResult::fail(e.to_string()),
        }
    }

    async fn check_validity(&self, context: &SagaContext) -> StepValidity {
        let reservation_id = match context.get(keys::RESERVATION_ID) {
            Ok(Some(id)) => id,
            _ => return StepValidity::RequiresReExecution("no reservation recorded".to_string()),
        };

        match self.service.reservation_state(&reservation_id).await {
            Ok(ReservationState::Active) => StepValidity::Valid,
            Ok(ReservationState::Expired) => StepValidity::ExpiredButRefreshable(format!(
                "reservation {reservation_id} expired"
            )),
            Ok(ReservationState::Released) => StepValidity::RequiresReExecution(format!(
                "reservation {reservation_id} was released"
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

    struct FakeInventory {
        reserve_result: Result<Reservation, CollaboratorError>,
        state: Result<ReservationState, CollaboratorError>,
        released: Mutex<Vec<String>>,
    }

    impl FakeInventory {
        fn reserving(id: &str) -> Self {
            Self {
                reserve_result: Ok(Reservation {
                    reservation_id: id.to_string(),
                }),
                state: Ok(ReservationState::Active),
                released: Mutex::new(Vec::new()),
            }
        }

        fn out_of_stock() -> Self {
            Self {
                reserve_result: Err(CollaboratorError::Rejected(ErrorInfo::new(
                    codes::OUT_OF_STOCK,
                    "no stock",
                    true,
                ))),
                state: Ok(ReservationState::Released),
                released: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InventoryService for &FakeInventory {
        async fn reserve(
            &self,
            _order_id: Uuid,
            _items: &[NewOrderItem],
        ) -> Result<Reservation, CollaboratorError> {
            match &self.reserve_result {
                Ok(r) => Ok(r.clone()),
                Err(CollaboratorError::Rejected(info)) => {
                    Err(CollaboratorError::Rejected(info.clone()))
                }
                Err(CollaboratorError::Unavailable(m)) => {
                    Err(CollaboratorError::Unavailable(m.clone()))
                }
            }
        }

        async fn release(&self, reservation_id: &str) -> Result<(), CollaboratorError> {
            self.released
                .lock()
                .unwrap()
                .push(reservation_id.to_string());
            Ok(())
        }

        async fn reservation_state(
            &self,
            _reservation_id: &str,
        ) -> Result<ReservationState, CollaboratorError> {
            match &self.state {
                Ok(s) => Ok(*s),
                Err(CollaboratorError::Unavailable(m)) => {
                    Err(CollaboratorError::Unavailable(m.clone()))
                }
                Err(CollaboratorError::Rejected(info)) => {
                    Err(CollaboratorError::Rejected(info.clone()))
                }
            }
        }
    }

    fn seeded_context(order_id: Uuid) -> SagaContext {
        let mut ctx = SagaContext::new();
        ctx.put(keys::ORDER_ID, &order_id).unwrap();
        ctx.put(
            keys::ORDER_ITEMS,
            &vec![NewOrderItem {
                product_id: "P1".to_string(),
                product_name: "Widget".to_string(),
                quantity: 2,
                unit_price_minor: 2500,
            }],
        )
        .unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_execute_records_reservation_id() {
        let service = FakeInventory::reserving("R-1");
        let step = InventoryReservationStep::new(&service);
        let ctx = seeded_context(Uuid::new_v4());

        let result = step.execute(&ctx).await;

        assert!(result.success);
        assert_eq!(
            result.data.get(keys::RESERVATION_ID.name()),
            Some(&Value::String("R-1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_execute_surfaces_out_of_stock() {
        let service = FakeInventory::out_of_stock();
        let step = InventoryReservationStep::new(&service);
        let ctx = seeded_context(Uuid::new_v4());

        let result = step.execute(&ctx).await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, codes::OUT_OF_STOCK);
    }

    #[tokio::test]
    async fn test_execute_fails_on_unseeded_context() {
        let service = FakeInventory::reserving("R-1");
        let step = InventoryReservationStep::new(&service);

        let result = step.execute(&SagaContext::new()).await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, codes::UNEXPECTED_ERROR);
    }

    #[tokio::test]
    async fn test_compensate_releases_by_reservation_id() {
        let service = FakeInventory::reserving("R-1");
        let step = InventoryReservationStep::new(&service);
        let mut ctx = seeded_context(Uuid::new_v4());
        ctx.put(keys::RESERVATION_ID, &"R-1".to_string()).unwrap();

        let result = step.compensate(&ctx).await;

        assert!(result.success);
        assert_eq!(*service.released.lock().unwrap(), vec!["R-1".to_string()]);
    }

    #[tokio::test]
    async fn test_compensate_without_reservation_is_a_noop() {
        let service = FakeInventory::reserving("R-1");
        let step = InventoryReservationStep::new(&service);

        let result = step.compensate(&SagaContext::new()).await;

        assert!(result.success);
        assert!(service.released.lock().unwrap().is_empty());
    }

    async fn validity_for(state: ReservationState) -> StepValidity {
        let mut service = FakeInventory::reserving("R-1");
        service.state = Ok(state);
        let step = InventoryReservationStep::new(&service);

        let mut ctx = seeded_context(Uuid::new_v4());
        ctx.put(keys::RESERVATION_ID, &"R-1".to_string()).unwrap();

        step.check_validity(&ctx).await
    }

    #[tokio::test]
    async fn test_validity_maps_reservation_states() {
        assert_eq!(
            validity_for(ReservationState::Active).await,
            StepValidity::Valid
        );
        assert!(matches!(
            validity_for(ReservationState::Expired).await,
            StepValidity::ExpiredButRefreshable(_)
        ));
        assert!(matches!(
            validity_for(ReservationState::Released).await,
            StepValidity::RequiresReExecution(_)
        ));
    }
}
