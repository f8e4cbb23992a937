//! Structured failure value carried on step records and events.

use serde::{Deserialize, Serialize};

/// Canonical error codes surfaced by the engine.
pub mod codes {
    /// Payment collaborator declined the charge.
    pub const PAYMENT_DECLINED: &str = "PAYMENT_DECLINED";
    /// Inventory collaborator had insufficient stock.
    pub const OUT_OF_STOCK: &str = "OUT_OF_STOCK";
    /// No shipping option could be arranged.
    pub const SHIPPING_UNAVAILABLE: &str = "SHIPPING_UNAVAILABLE";
    /// Step panicked or failed in an unforeseen way.
    pub const UNEXPECTED_ERROR: &str = "UNEXPECTED_ERROR";
    /// Step timed out or was cancelled before an outcome was known.
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    /// Compensation for a completed step did not succeed.
    pub const COMPENSATION_FAILED: &str = "COMPENSATION_FAILED";
}

/// User-visible failure description.
///
/// Every failure the engine surfaces carries a code, a message, and whether
/// the condition is expected to clear on a later retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine-readable code (see [`codes`]).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether a retry may succeed.
    pub recoverable: bool,
    /// Optional hint for the caller (e.g. "update payment method").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorInfo {
    /// Create a new error value.
    pub fn new(code: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recoverable,
            suggested_action: None,
        }
    }

    /// Attach a suggested action.
    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }

    /// Failure from a panic or other abnormal step termination.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(codes::UNEXPECTED_ERROR, message, false)
    }

    /// Failure from a timeout or cancellation; the collaborator may be fine.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(codes::SERVICE_UNAVAILABLE, message, true)
    }

    /// Anomaly recorded when a compensation does not succeed.
    pub fn compensation_failed(message: impl Into<String>) -> Self {
        Self::new(codes::COMPENSATION_FAILED, message, false)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_display() {
        let err = ErrorInfo::new(codes::PAYMENT_DECLINED, "card declined", true);
        assert_eq!(err.to_string(), "PAYMENT_DECLINED: card declined");
    }

    #[test]
    fn test_unexpected_not_recoverable() {
        let err = ErrorInfo::unexpected("step panicked");
        assert_eq!(err.code, codes::UNEXPECTED_ERROR);
        assert!(!err.recoverable);
    }

    #[test]
    fn test_service_unavailable_recoverable() {
        let err = ErrorInfo::service_unavailable("deadline exceeded");
        assert_eq!(err.code, codes::SERVICE_UNAVAILABLE);
        assert!(err.recoverable);
    }

    #[test]
    fn test_suggested_action_serializes_only_when_present() {
        let bare = ErrorInfo::unexpected("boom");
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("suggested_action").is_none());

        let hinted = bare.with_suggested_action("contact support");
        let json = serde_json::to_value(&hinted).unwrap();
        assert_eq!(json["suggested_action"], "contact support");
    }
}
