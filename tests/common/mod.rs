//! Shared harness for the end-to-end scenarios: the real step adapters wired
//! over scripted collaborator services, the engine, and the retry
//! coordinator, all against the in-memory store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::TimeZone;
use uuid::Uuid;

use edda::config::{EngineConfig, RetryPolicyConfig};
use edda::domain::{codes, ErrorInfo, NewOrder, NewOrderItem};
use edda::engine::SagaEngine;
use edda::projection::HistoryProjector;
use edda::retry::{NoopAdvisor, RetryCoordinator};
use edda::step::StepRegistry;
use edda::steps::{
    inventory::{InventoryService, Reservation, ReservationState},
    payment::{Authorization, AuthorizationState, PaymentGateway},
    shipping::{Shipment, ShipmentState, ShippingService},
    CollaboratorError, InventoryReservationStep, PaymentProcessingStep, ShippingArrangementStep,
};
use edda::storage::MockSagaStore;
use edda::stream::StatusStreamHub;
use edda::utils::{ManualClock, SequencedIds};

/// Inventory collaborator with scripted failures and idempotent reserves.
#[derive(Default)]
pub struct FakeInventoryService {
    pub fail_with: Mutex<Option<ErrorInfo>>,
    pub state: Mutex<Option<ReservationState>>,
    reservations: Mutex<HashMap<Uuid, String>>,
    counter: std::sync::atomic::AtomicUsize,
    pub released: Mutex<Vec<String>>,
}

impl FakeInventoryService {
    pub fn fail_out_of_stock(&self) {
        *self.fail_with.lock().unwrap() =
            Some(ErrorInfo::new(codes::OUT_OF_STOCK, "insufficient stock", true));
    }

    pub fn set_state(&self, state: ReservationState) {
        *self.state.lock().unwrap() = Some(state);
    }
}

/// Local wrapper so `InventoryService` can be implemented for a shared
/// handle without running into the orphan rule (`Arc` and the trait both
/// live outside this test crate).
#[derive(Clone)]
pub struct InventoryHandle(pub Arc<FakeInventoryService>);

impl std::ops::Deref for InventoryHandle {
    type Target = FakeInventoryService;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl InventoryService for InventoryHandle {
    async fn reserve(
        &self,
        order_id: Uuid,
        _items: &[NewOrderItem],
    ) -> Result<Reservation, CollaboratorError> {
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(CollaboratorError::Rejected(error));
        }
        let mut reservations = self.reservations.lock().unwrap();
        // Idempotent per order while the hold is live; a released hold gets
        // a fresh reservation on re-request.
        let live = reservations
            .get(&order_id)
            .filter(|id| !self.released.lock().unwrap().contains(*id))
            .cloned();
        let id = match live {
            Some(id) => id,
            None => {
                let n = self
                    .counter
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                    + 1;
                let id = format!("R-{n}");
                reservations.insert(order_id, id.clone());
                id
            }
        };
        Ok(Reservation { reservation_id: id })
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
        reservation_id: &str,
    ) -> Result<ReservationState, CollaboratorError> {
        if let Some(state) = *self.state.lock().unwrap() {
            return Ok(state);
        }
        // Default to what actually happened: released holds are gone.
        let released = self
            .released
            .lock()
            .unwrap()
            .iter()
            .any(|r| r == reservation_id);
        Ok(if released {
            ReservationState::Released
        } else {
            ReservationState::Active
        })
    }
}

/// Payment collaborator with scripted declines and idempotent authorizations.
#[derive(Default)]
pub struct FakePaymentGateway {
    pub fail_with: Mutex<Option<ErrorInfo>>,
    pub state: Mutex<Option<AuthorizationState>>,
    authorizations: Mutex<HashMap<Uuid, String>>,
    pub voided: Mutex<Vec<String>>,
}

impl FakePaymentGateway {
    pub fn decline(&self) {
        *self.fail_with.lock().unwrap() = Some(
            ErrorInfo::new(codes::PAYMENT_DECLINED, "card declined", true)
                .with_suggested_action("update payment method"),
        );
    }

    pub fn approve(&self) {
        *self.fail_with.lock().unwrap() = None;
    }
}

/// Local wrapper so `PaymentGateway` can be implemented for a shared handle
/// without running into the orphan rule.
#[derive(Clone)]
pub struct PaymentHandle(pub Arc<FakePaymentGateway>);

impl std::ops::Deref for PaymentHandle {
    type Target = FakePaymentGateway;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl PaymentGateway for PaymentHandle {
    async fn authorize(
        &self,
        order_id: Uuid,
        _customer_id: &str,
        _payment_method_id: &str,
        _amount_minor: i64,
    ) -> Result<Authorization, CollaboratorError> {
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(CollaboratorError::Rejected(error));
        }
        let mut authorizations = self.authorizations.lock().unwrap();
        let next = authorizations.len() + 1;
        let id = authorizations
            .entry(order_id)
            .or_insert_with(|| format!("A-{next}"))
            .clone();
        Ok(Authorization {
            authorization_id: id,
        })
    }

    async fn void(&self, authorization_id: &str) -> Result<(), CollaboratorError> {
        self.voided
            .lock()
            .unwrap()
            .push(authorization_id.to_string());
        Ok(())
    }

    async fn authorization_state(
        &self,
        authorization_id: &str,
    ) -> Result<AuthorizationState, CollaboratorError> {
        if let Some(state) = *self.state.lock().unwrap() {
            return Ok(state);
        }
        let voided = self
            .voided
            .lock()
            .unwrap()
            .iter()
            .any(|v| v == authorization_id);
        Ok(if voided {
            AuthorizationState::Voided
        } else {
            AuthorizationState::Active
        })
    }
}

/// Shipping collaborator with scripted unavailability.
#[derive(Default)]
pub struct FakeShippingService {
    pub fail_with: Mutex<Option<ErrorInfo>>,
    shipments: Mutex<HashMap<Uuid, Shipment>>,
    pub cancelled: Mutex<Vec<String>>,
}

impl FakeShippingService {
    pub fn fail_unavailable(&self) {
        *self.fail_with.lock().unwrap() = Some(ErrorInfo::new(
            codes::SHIPPING_UNAVAILABLE,
            "no carrier serves this address",
            false,
        ));
    }

    pub fn recover(&self) {
        *self.fail_with.lock().unwrap() = None;
    }
}

/// Local wrapper so `ShippingService` can be implemented for a shared handle
/// without running into the orphan rule.
#[derive(Clone)]
pub struct ShippingHandle(pub Arc<FakeShippingService>);

impl std::ops::Deref for ShippingHandle {
    type Target = FakeShippingService;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl ShippingService for ShippingHandle {
    async fn arrange(
        &self,
        order_id: Uuid,
        _items: &[NewOrderItem],
        _shipping_address: &str,
    ) -> Result<Shipment, CollaboratorError> {
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(CollaboratorError::Rejected(error));
        }
        let mut shipments = self.shipments.lock().unwrap();
        let next = shipments.len() + 1;
        let shipment = shipments.entry(order_id).or_insert_with(|| Shipment {
            shipment_id: format!("S-{next}"),
            tracking_number: format!("TRK-{next:04}"),
            estimated_delivery: chrono::Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap(),
        });
        Ok(shipment.clone())
    }

    async fn cancel(&self, shipment_id: &str) -> Result<(), CollaboratorError> {
        self.cancelled.lock().unwrap().push(shipment_id.to_string());
        Ok(())
    }

    async fn shipment_state(&self, shipment_id: &str) -> Result<ShipmentState, CollaboratorError> {
        let cancelled = self
            .cancelled
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == shipment_id);
        Ok(if cancelled {
            ShipmentState::Cancelled
        } else {
            ShipmentState::Scheduled
        })
    }
}

/// Everything a scenario needs.
pub struct SagaWorld {
    pub store: Arc<MockSagaStore>,
    pub engine: Arc<SagaEngine>,
    pub coordinator: RetryCoordinator,
    pub history: HistoryProjector,
    pub hub: Arc<StatusStreamHub>,
    pub clock: Arc<ManualClock>,
    pub inventory: Arc<FakeInventoryService>,
    pub payment: Arc<FakePaymentGateway>,
    pub shipping: Arc<FakeShippingService>,
}

impl SagaWorld {
    /// Jump past the retry cooldown.
    pub fn past_cooldown(&self) {
        self.clock.advance(chrono::Duration::seconds(31));
    }
}

/// Build a world with the three canonical steps over fresh fakes.
pub fn saga_world() -> SagaWorld {
    let inventory = Arc::new(FakeInventoryService::default());
    let payment = Arc::new(FakePaymentGateway::default());
    let shipping = Arc::new(FakeShippingService::default());

    let registry = Arc::new(
        StepRegistry::builder()
            .register(Arc::new(InventoryReservationStep::new(InventoryHandle(
                inventory.clone(),
            ))))
            .register(Arc::new(PaymentProcessingStep::new(PaymentHandle(
                payment.clone(),
            ))))
            .register(Arc::new(ShippingArrangementStep::new(ShippingHandle(
                shipping.clone(),
            ))))
            .build()
            .expect("registry"),
    );

    let store = Arc::new(MockSagaStore::new());
    let hub = Arc::new(StatusStreamHub::new());
    let clock = Arc::new(ManualClock::starting_at(
        chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    ));
    let ids = Arc::new(SequencedIds::new());

    let engine = Arc::new(SagaEngine::new(
        store.clone(),
        registry,
        hub.clone(),
        EngineConfig::default(),
        clock.clone(),
        ids.clone(),
    ));

    let coordinator = RetryCoordinator::new(
        store.clone(),
        engine.clone(),
        Arc::new(NoopAdvisor),
        RetryPolicyConfig::default(),
        clock.clone(),
        ids,
    );

    SagaWorld {
        history: HistoryProjector::new(store.clone()),
        store,
        engine,
        coordinator,
        hub,
        clock,
        inventory,
        payment,
        shipping,
    }
}

/// The canonical test order: 2 x $25.00.
pub fn submission() -> NewOrder {
    NewOrder {
        customer_id: "C1".to_string(),
        payment_method_id: "PM1".to_string(),
        shipping_address: "1 Main St, Springfield".to_string(),
        items: vec![NewOrderItem {
            product_id: "P1".to_string(),
            product_name: "Widget".to_string(),
            quantity: 2,
            unit_price_minor: 2500,
        }],
    }
}
