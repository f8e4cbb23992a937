//! Canonical domain steps.
//!
//! The three steps of the order saga, written as adapters over injectable
//! service traits. The concrete transports behind those traits (HTTP
//! clients, stubs) live outside this crate; what is fixed here is the
//! published contract: inputs read from the context, outputs merged into it,
//! and the idempotency key each collaborator must honor (the order id).

pub mod inventory;
pub mod payment;
pub mod shipping;

pub use inventory::{InventoryReservationStep, InventoryService, Reservation, ReservationState};
pub use payment::{Authorization, AuthorizationState, PaymentGateway, PaymentProcessingStep};
pub use shipping::{Shipment, ShipmentState, ShippingArrangementStep, ShippingService};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::ContextKey;
use crate::domain::{ErrorInfo, NewOrderItem};

/// Typed context keys shared across the saga.
pub mod keys {
    use super::*;

    /// Seeded at submission.
    pub const ORDER_ID: ContextKey<Uuid> = ContextKey::new("ORDER_ID");
    pub const CUSTOMER_ID: ContextKey<String> = ContextKey::new("CUSTOMER_ID");
    pub const PAYMENT_METHOD_ID: ContextKey<String> = ContextKey::new("PAYMENT_METHOD_ID");
    pub const SHIPPING_ADDRESS: ContextKey<String> = ContextKey::new("SHIPPING_ADDRESS");
    pub const ORDER_ITEMS: ContextKey<Vec<NewOrderItem>> = ContextKey::new("ORDER_ITEMS");
    pub const TOTAL_AMOUNT_MINOR: ContextKey<i64> = ContextKey::new("TOTAL_AMOUNT_MINOR");

    /// Produced by steps.
    pub const RESERVATION_ID: ContextKey<String> = ContextKey::new("RESERVATION_ID");
    pub const AUTHORIZATION_ID: ContextKey<String> = ContextKey::new("AUTHORIZATION_ID");
    pub const SHIPMENT_ID: ContextKey<String> = ContextKey::new("SHIPMENT_ID");
    pub const TRACKING_NUMBER: ContextKey<String> = ContextKey::new("TRACKING_NUMBER");
    pub const ESTIMATED_DELIVERY: ContextKey<DateTime<Utc>> =
        ContextKey::new("ESTIMATED_DELIVERY");
}

/// Canonical step names, as they appear in step records and timelines.
pub mod names {
    pub const INVENTORY: &str = "Inventory Reservation";
    pub const PAYMENT: &str = "Payment Processing";
    pub const SHIPPING: &str = "Shipping Arrangement";
}

/// Failure surface of a collaborator call.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    /// The collaborator understood the request and said no.
    #[error("{0}")]
    Rejected(ErrorInfo),

    /// The collaborator could not be reached or answered abnormally.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl CollaboratorError {
    /// Normalize into the structured error carried on step records.
    pub fn into_error_info(self) -> ErrorInfo {
        match self {
            CollaboratorError::Rejected(info) => info,
            CollaboratorError::Unavailable(message) => ErrorInfo::service_unavailable(message),
        }
    }
}

/// Failure used when a step finds its context incomplete. Indicates an
/// orchestration bug rather than a collaborator problem.
pub(crate) fn missing_context(key: &str) -> ErrorInfo {
    ErrorInfo::unexpected(format!("context is missing required key '{key}'"))
}
