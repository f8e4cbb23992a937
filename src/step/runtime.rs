//! Step invoker.
//!
//! A thin layer between the engine and a step implementation: it times the
//! call, enforces the per-step deadline, honors cancellation, and translates
//! any abnormal termination (panic, timeout, cancellation) into a structured
//! failure result. It never mutates persistence.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::SagaContext;
use crate::domain::ErrorInfo;

use super::{CompensationResult, SagaStep, StepResult};

/// Render a panic payload as a message.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "step panicked".to_string()
    }
}

/// Invokes one forward step or one compensation against a context.
#[derive(Debug, Clone, Default)]
pub struct StepRuntime;

impl StepRuntime {
    /// Create a new runtime.
    pub fn new() -> Self {
        Self
    }

    /// Invoke a step's forward action.
    ///
    /// The returned result is always structured: a panic becomes
    /// `UNEXPECTED_ERROR`, a deadline or cancellation becomes
    /// `SERVICE_UNAVAILABLE`. On cancellation the in-flight future is
    /// dropped before the failure is reported, so the caller can no longer
    /// be racing the step's completion.
    pub async fn execute_forward(
        &self,
        step: &dyn SagaStep,
        context: &SagaContext,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> StepResult {
        let started = Instant::now();
        let invocation = AssertUnwindSafe(step.execute(context)).catch_unwind();

        let result = tokio::select! {
            outcome = tokio::time::timeout(deadline, invocation) => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(payload)) => {
                    let message = panic_message(payload);
                    warn!(step = %step.name(), message = %message, "Step panicked");
                    StepResult::fail(ErrorInfo::unexpected(message))
                }
                Err(_) => {
                    warn!(step = %step.name(), deadline_ms = deadline.as_millis() as u64, "Step deadline exceeded");
                    StepResult::fail(ErrorInfo::service_unavailable(format!(
                        "step '{}' exceeded its {}ms deadline",
                        step.name(),
                        deadline.as_millis()
                    )))
                }
            },
            _ = cancel.cancelled() => {
                warn!(step = %step.name(), "Step cancelled; outcome unknown");
                StepResult::fail(ErrorInfo::service_unavailable(format!(
                    "step '{}' was cancelled before an outcome was observed",
                    step.name()
                )))
            }
        };

        debug!(
            step = %step.name(),
            success = result.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Forward step invoked"
        );

        result
    }

    /// Invoke a step's compensating action.
    ///
    /// Same normalization rules as the forward path; failures here are
    /// reported to the caller, which continues compensating earlier steps.
    pub async fn execute_compensation(
        &self,
        step: &dyn SagaStep,
        context: &SagaContext,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> CompensationResult {
        let started = Instant::now();
        let invocation = AssertUnwindSafe(step.compensate(context)).catch_unwind();

        let result = tokio::select! {
            outcome = tokio::time::timeout(deadline, invocation) => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(payload)) => {
                    let message = panic_message(payload);
                    warn!(step = %step.name(), message = %message, "Compensation panicked");
                    CompensationResult::fail(message)
                }
                Err(_) => {
                    warn!(step = %step.name(), deadline_ms = deadline.as_millis() as u64, "Compensation deadline exceeded");
                    CompensationResult::fail(format!(
                        "compensation for '{}' exceeded its {}ms deadline",
                        step.name(),
                        deadline.as_millis()
                    ))
                }
            },
            _ = cancel.cancelled() => {
                warn!(step = %step.name(), "Compensation cancelled; outcome unknown");
                CompensationResult::fail(format!(
                    "compensation for '{}' was cancelled before an outcome was observed",
                    step.name()
                ))
            }
        };

        debug!(
            step = %step.name(),
            success = result.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Compensation invoked"
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codes;
    use crate::step::StepValidity;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    enum Behavior {
        Succeed,
        Fail,
        Panic,
        Hang,
    }

    struct ScriptedStep {
        behavior: Behavior,
    }

    #[async_trait]
    impl SagaStep for ScriptedStep {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn execute(&self, _context: &SagaContext) -> StepResult {
            match self.behavior {
                Behavior::Succeed => {
                    let mut data = BTreeMap::new();
                    data.insert("K".to_string(), serde_json::Value::from("v"));
                    StepResult::ok(data)
                }
                Behavior::Fail => StepResult::fail(ErrorInfo::new(
                    codes::PAYMENT_DECLINED,
                    "declined",
                    true,
                )),
                Behavior::Panic => panic!("boom"),
                Behavior::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn compensate(&self, _context: &SagaContext) -> CompensationResult {
            match self.behavior {
                Behavior::Succeed => CompensationResult::ok(),
                Behavior::Fail => CompensationResult::fail("undo failed"),
                Behavior::Panic => panic!("undo boom"),
                Behavior::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn check_validity(&self, _context: &SagaContext) -> StepValidity {
            StepValidity::Valid
        }
    }

    fn deadline() -> Duration {
        Duration::from_millis(50)
    }

    #[tokio::test]
    async fn test_forward_success_passes_through() {
        let runtime = StepRuntime::new();
        let step = ScriptedStep {
            behavior: Behavior::Succeed,
        };

        let result = runtime
            .execute_forward(&step, &SagaContext::new(), deadline(), &CancellationToken::new())
            .await;

        assert!(result.success);
        assert_eq!(result.data.get("K"), Some(&serde_json::Value::from("v")));
    }

    #[tokio::test]
    async fn test_forward_failure_passes_through() {
        let runtime = StepRuntime::new();
        let step = ScriptedStep {
            behavior: Behavior::Fail,
        };

        let result = runtime
            .execute_forward(&step, &SagaContext::new(), deadline(), &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, codes::PAYMENT_DECLINED);
    }

    #[tokio::test]
    async fn test_forward_panic_becomes_unexpected_error() {
        let runtime = StepRuntime::new();
        let step = ScriptedStep {
            behavior: Behavior::Panic,
        };

        let result = runtime
            .execute_forward(&step, &SagaContext::new(), deadline(), &CancellationToken::new())
            .await;

        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.code, codes::UNEXPECTED_ERROR);
        assert!(error.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_forward_timeout_becomes_service_unavailable() {
        let runtime = StepRuntime::new();
        let step = ScriptedStep {
            behavior: Behavior::Hang,
        };

        let result = runtime
            .execute_forward(&step, &SagaContext::new(), deadline(), &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, codes::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_forward_cancellation_becomes_service_unavailable() {
        let runtime = StepRuntime::new();
        let step = ScriptedStep {
            behavior: Behavior::Hang,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = runtime
            .execute_forward(&step, &SagaContext::new(), Duration::from_secs(10), &cancel)
            .await;

        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, codes::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_compensation_panic_is_contained() {
        let runtime = StepRuntime::new();
        let step = ScriptedStep {
            behavior: Behavior::Panic,
        };

        let result = runtime
            .execute_compensation(&step, &SagaContext::new(), deadline(), &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert!(result.message.unwrap().contains("undo boom"));
    }

    #[tokio::test]
    async fn test_compensation_timeout_fails() {
        let runtime = StepRuntime::new();
        let step = ScriptedStep {
            behavior: Behavior::Hang,
        };

        let result = runtime
            .execute_compensation(&step, &SagaContext::new(), deadline(), &CancellationToken::new())
            .await;

        assert!(!result.success);
    }
}
