//! The step/compensation contract.
//!
//! Every domain step implements [`SagaStep`]: a forward action, a
//! compensating action, and a validity check used during retry. The registry
//! fixes the order steps run in; the runtime normalizes whatever a step does
//! into a structured result.

pub mod registry;
pub mod runtime;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::SagaContext;
use crate::domain::ErrorInfo;

pub use registry::{StepRegistry, StepRegistryBuilder};
pub use runtime::StepRuntime;

/// Outcome of a forward step invocation.
///
/// On success `data` is merged into the saga context under predeclared keys.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub success: bool,
    pub data: BTreeMap<String, Value>,
    pub error: Option<ErrorInfo>,
}

impl StepResult {
    /// Successful invocation with data to merge into the context.
    pub fn ok(data: BTreeMap<String, Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    /// Successful invocation with nothing to record.
    pub fn ok_empty() -> Self {
        Self::ok(BTreeMap::new())
    }

    /// Failed invocation.
    pub fn fail(error: ErrorInfo) -> Self {
        Self {
            success: false,
            data: BTreeMap::new(),
            error: Some(error),
        }
    }
}

/// Outcome of a compensation invocation.
#[derive(Debug, Clone)]
pub struct CompensationResult {
    pub success: bool,
    pub message: Option<String>,
}

impl CompensationResult {
    /// Compensation succeeded.
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    /// Compensation succeeded, with a note.
    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    /// Compensation failed.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Whether a previously-completed step's external effect is still usable.
///
/// Consulted during retry to decide between skipping and re-execution.
/// Skipping is only permitted on `Valid`; the engine never silently assumes
/// a previous result is still good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepValidity {
    /// The effect holds; the step may be skipped and its data carried over.
    Valid,
    /// The effect lapsed but re-running the step will refresh it.
    ExpiredButRefreshable(String),
    /// The effect is unusable; the step must re-execute.
    RequiresReExecution(String),
}

impl StepValidity {
    /// Whether the retry coordinator may skip the step.
    pub fn is_valid(&self) -> bool {
        matches!(self, StepValidity::Valid)
    }
}

/// A named unit of saga work.
///
/// `compensate` must be safe to invoke whenever the forward action previously
/// reported success, and must be idempotent at the collaborator boundary;
/// the engine invokes both forward and compensating actions with
/// at-least-once semantics.
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Name of this step. Stable; appears in step records and events.
    fn name(&self) -> &str;

    /// Perform the forward action.
    async fn execute(&self, context: &SagaContext) -> StepResult;

    /// Undo the forward action using data it placed in the context.
    async fn compensate(&self, context: &SagaContext) -> CompensationResult;

    /// Whether the previously-completed effect is still usable.
    async fn check_validity(&self, context: &SagaContext) -> StepValidity;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codes;

    #[test]
    fn test_step_result_constructors() {
        let mut data = BTreeMap::new();
        data.insert("K".to_string(), Value::from("v"));

        let ok = StepResult::ok(data);
        assert!(ok.success);
        assert!(ok.error.is_none());

        let fail = StepResult::fail(ErrorInfo::new(codes::OUT_OF_STOCK, "none left", true));
        assert!(!fail.success);
        assert!(fail.data.is_empty());
        assert_eq!(fail.error.unwrap().code, codes::OUT_OF_STOCK);
    }

    #[test]
    fn test_validity_is_valid() {
        assert!(StepValidity::Valid.is_valid());
        assert!(!StepValidity::ExpiredButRefreshable("lapsed".into()).is_valid());
        assert!(!StepValidity::RequiresReExecution("gone".into()).is_valid());
    }
}
