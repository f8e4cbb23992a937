//! Payment processing step.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::context::SagaContext;
use crate::step::{CompensationResult, SagaStep, StepResult, StepValidity};

use super::{keys, missing_context, names, CollaboratorError};

/// Current state of an authorization, as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    /// The hold on funds is still in place.
    Active,
    /// The hold lapsed; a fresh authorization is required but routine.
    Expired,
    /// The authorization was voided or refunded.
    Voided,
}

/// A successful authorization.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub authorization_id: String,
}

/// Payment collaborator contract.
///
/// `authorize` is keyed by order id: repeated calls for the same order must
/// return the existing authorization rather than charging twice. `void` must
/// tolerate already-voided authorizations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Authorize the order total against the customer's payment method.
    async fn authorize(
        &self,
        order_id: Uuid,
        customer_id: &str,
        payment_method_id: &str,
        amount_minor: i64,
    ) -> Result<Authorization, CollaboratorError>;

    /// Void (or refund, if settled) an authorization.
    async fn void(&self, authorization_id: &str) -> Result<(), CollaboratorError>;

    /// Report the current state of an authorization.
    async fn authorization_state(
        &self,
        authorization_id: &str,
    ) -> Result<AuthorizationState, CollaboratorError>;
}

/// Charges the customer; compensation voids the charge.
pub struct PaymentProcessingStep<G> {
    gateway: G,
}

impl<G: PaymentGateway> PaymentProcessingStep<G> {
    /// Create the step over a payment gateway.
    pub fn new(gateway: G) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl<G: PaymentGateway> SagaStep for PaymentProcessingStep<G> {
    fn name(&self) -> &str {
        names::PAYMENT
    }

    async fn execute(&self, context: &SagaContext) -> StepResult {
        let order_id = match context.get(keys::ORDER_ID) {
            Ok(Some(id)) => id,
            _ => return StepResult::fail(missing_context(keys::ORDER_ID.name())),
        };
        let customer_id = match context.get(keys::CUSTOMER_ID) {
            Ok(Some(id)) => id,
            _ => return StepResult::fail(missing_context(keys::CUSTOMER_ID.name())),
        };
        let payment_method_id = match context.get(keys::PAYMENT_METHOD_ID) {
            Ok(Some(id)) => id,
            _ => return StepResult::fail(missing_context(keys::PAYMENT_METHOD_ID.name())),
        };
        let amount_minor = match context.get(keys::TOTAL_AMOUNT_MINOR) {
            Ok(Some(amount)) => amount,
            _ => return StepResult::fail(missing_context(keys::TOTAL_AMOUNT_MINOR.name())),
        };

        match self
            .gateway
            .authorize(order_id, &customer_id, &payment_method_id, amount_minor)
            .await
        {
            Ok(authorization) => {
                let mut data = BTreeMap::new();
                data.insert(
                    keys::AUTHORIZATION_ID.name().to_string(),
                    Value::String(authorization.authorization_id),
                );
                data.insert(
                    "totalCharged".to_string(),
                    Value::Number(amount_minor.into()),
                );
                StepResult::ok(data)
            }
            Err(e) => StepResult::fail(e.into_error_info()),
        }
    }

    async fn compensate(&self, context: &SagaContext) -> CompensationResult {
        let authorization_id = match context.get(keys::AUTHORIZATION_ID) {
            Ok(Some(id)) => id,
            _ => {
                return CompensationResult::ok_with_message(
                    "no authorization recorded; nothing to void",
                )
            }
        };

        match self.gateway.void(&authorization_id).await {
            Ok(()) => CompensationResult::ok(),
            Err(e) => CompensationResult::fail(e.to_string()),
        }
    }

    async fn check_validity(&self, context: &SagaContext) -> StepValidity {
        let authorization_id = match context.get(keys::AUTHORIZATION_ID) {
            Ok(Some(id)) => id,
            _ => return StepValidity::RequiresReExecution("no authorization recorded".to_string()),
        };

        match self.gateway.authorization_state(&authorization_id).await {
            Ok(AuthorizationState::Active) => StepValidity::Valid,
            Ok(AuthorizationState::Expired) => StepValidity::ExpiredButRefreshable(format!(
                "authorization {authorization_id} expired"
            )),
            Ok(AuthorizationState::Voided) => StepValidity::RequiresReExecution(format!(
                "authorization {authorization_id} was voided"
            )),
            Err(e) => StepValidity::RequiresReExecution(e.to_string()),
        }
    }
}
