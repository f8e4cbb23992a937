//! Order aggregate: the business object a saga settles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an order.
///
/// `Pending → Processing → {Completed | Failed | Compensating → Compensated}`.
/// `Completed` is terminal-success; `Failed` and `Compensated` are
/// terminal-failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Compensating,
    Compensated,
}

impl OrderStatus {
    /// Whether the diagram permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Compensating)
                | (Compensating, Compensated)
        )
    }

    /// Whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Compensated
        )
    }

    /// Database string form.
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Compensating => "COMPENSATING",
            OrderStatus::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "FAILED" => Ok(OrderStatus::Failed),
            "COMPENSATING" => Ok(OrderStatus::Compensating),
            "COMPENSATED" => Ok(OrderStatus::Compensated),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Errors from order construction.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Order total must be positive, got {0}")]
    NonPositiveTotal(i64),

    #[error("Order must contain at least one item")]
    NoItems,

    #[error("Item quantity must be positive, got {0} for product {1}")]
    NonPositiveQuantity(i64, String),

    #[error("Item unit price must not be negative, got {0} for product {1}")]
    NegativeUnitPrice(i64, String),

    #[error("Item totals ({items_total}) do not sum to the order total ({order_total})")]
    TotalMismatch { items_total: i64, order_total: i64 },

    #[error("Customer id must not be empty")]
    MissingCustomer,
}

/// Caller-supplied order submission, before any state is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: String,
    pub payment_method_id: String,
    pub shipping_address: String,
    pub items: Vec<NewOrderItem>,
}

/// One line of a caller-supplied order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_minor: i64,
}

/// A persisted order.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: String,
    pub total_amount_minor: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    is_new: bool,
}

impl Order {
    /// Validate a submission and construct the order with its items.
    ///
    /// Runs before any saga state is persisted; a rejection here is surfaced
    /// synchronously to the caller and leaves no trace in storage.
    pub fn from_submission(
        id: Uuid,
        item_id_seed: impl FnMut() -> Uuid,
        submission: &NewOrder,
        now: DateTime<Utc>,
    ) -> Result<(Order, Vec<OrderItem>), ValidationError> {
        if submission.customer_id.trim().is_empty() {
            return Err(ValidationError::MissingCustomer);
        }
        if submission.items.is_empty() {
            return Err(ValidationError::NoItems);
        }

        let mut next_item_id = item_id_seed;
        let mut total: i64 = 0;
        let mut items = Vec::with_capacity(submission.items.len());
        for line in &submission.items {
            if line.quantity <= 0 {
                return Err(ValidationError::NonPositiveQuantity(
                    line.quantity,
                    line.product_id.clone(),
                ));
            }
            if line.unit_price_minor < 0 {
                return Err(ValidationError::NegativeUnitPrice(
                    line.unit_price_minor,
                    line.product_id.clone(),
                ));
            }
            total += line.quantity * line.unit_price_minor;
            items.push(OrderItem {
                id: next_item_id(),
                order_id: id,
                product_id: line.product_id.clone(),
                product_name: line.product_name.clone(),
                quantity: line.quantity,
                unit_price_minor: line.unit_price_minor,
            });
        }

        if total <= 0 {
            return Err(ValidationError::NonPositiveTotal(total));
        }

        let order = Order {
            id,
            customer_id: submission.customer_id.clone(),
            total_amount_minor: total,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            is_new: true,
        };

        Ok((order, items))
    }

    /// Reconstruct a persisted order from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn hydrate(
        id: Uuid,
        customer_id: String,
        total_amount_minor: i64,
        status: OrderStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer_id,
            total_amount_minor,
            status,
            created_at,
            updated_at,
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

/// A persisted order line. Created with the order, immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_minor: i64,
}

impl OrderItem {
    /// Line total in minor units.
    pub fn line_total_minor(&self) -> i64 {
        self.quantity * self.unit_price_minor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_submission() -> NewOrder {
        NewOrder {
            customer_id: "C1".to_string(),
            payment_method_id: "PM1".to_string(),
            shipping_address: "1 Main St".to_string(),
            items: vec![NewOrderItem {
                product_id: "P1".to_string(),
                product_name: "Widget".to_string(),
                quantity: 2,
                unit_price_minor: 2500,
            }],
        }
    }

    fn build(submission: &NewOrder) -> Result<(Order, Vec<OrderItem>), ValidationError> {
        Order::from_submission(Uuid::new_v4(), Uuid::new_v4, submission, Utc::now())
    }

    #[test]
    fn test_from_submission_computes_total() {
        let (order, items) = build(&make_submission()).unwrap();

        assert_eq!(order.total_amount_minor, 5000);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.is_new());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].line_total_minor(), 5000);
    }

    #[test]
    fn test_from_submission_rejects_empty_items() {
        let mut submission = make_submission();
        submission.items.clear();

        assert!(matches!(build(&submission), Err(ValidationError::NoItems)));
    }

    #[test]
    fn test_from_submission_rejects_zero_quantity() {
        let mut submission = make_submission();
        submission.items[0].quantity = 0;

        assert!(matches!(
            build(&submission),
            Err(ValidationError::NonPositiveQuantity(0, _))
        ));
    }

    #[test]
    fn test_from_submission_rejects_zero_total() {
        let mut submission = make_submission();
        submission.items[0].unit_price_minor = 0;

        assert!(matches!(
            build(&submission),
            Err(ValidationError::NonPositiveTotal(0))
        ));
    }

    #[test]
    fn test_from_submission_rejects_blank_customer() {
        let mut submission = make_submission();
        submission.customer_id = "  ".to_string();

        assert!(matches!(
            build(&submission),
            Err(ValidationError::MissingCustomer)
        ));
    }

    #[test]
    fn test_status_transitions_follow_diagram() {
        use OrderStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Compensating));
        assert!(Compensating.can_transition_to(Compensated));

        assert!(!Completed.can_transition_to(Processing));
        assert!(!Compensated.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Processing));
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Completed,
            OrderStatus::Failed,
            OrderStatus::Compensating,
            OrderStatus::Compensated,
        ] {
            let parsed: OrderStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
