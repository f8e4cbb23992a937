//! Retry coordination.
//!
//! Evaluates whether a failed order may be retried and, when it may,
//! constructs a retry execution that resumes from the failed step: steps
//! whose external effect is still valid are carried over as `SKIPPED`
//! records, everything else re-executes. The new execution is then handed to
//! the engine like any other. Retry is caller-initiated only; the engine
//! never retries on its own.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RetryPolicyConfig;
use crate::domain::{
    ExecutionStatus, RetryAttempt, RetryOutcome, SagaExecution, StepExecution, StepStatus,
};
use crate::engine::{rebuild_context, step_map, EngineError, SagaEngine};
use crate::step::StepValidity;
use crate::storage::{SagaStore, StorageError};
use crate::utils::{Clock, IdGenerator};


/// Result type for retry operations.
pub type Result<T> = std::result::Result<T, RetryError>;

/// Errors from retry coordination.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Order {0} has no saga execution to retry")]
    NothingToRetry(Uuid),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Category of a retry blocker. These names are contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockerKind {
    MaxRetriesExceeded,
    InCooldown,
    RetryInProgress,
    FraudDetected,
    ItemUnavailable,
    Other,
}

/// Something standing between the caller and a retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryBlocker {
    pub kind: BlockerKind,
    pub description: String,
    /// Whether the caller can clear this blocker themselves.
    pub resolvable: bool,
}

impl RetryBlocker {
    /// Create a blocker.
    pub fn new(kind: BlockerKind, description: impl Into<String>, resolvable: bool) -> Self {
        Self {
            kind,
            description: description.into(),
            resolvable,
        }
    }
}

/// Action the caller must complete before a retry is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequiredActionKind {
    UpdatePaymentMethod,
    VerifyAddress,
}

/// A required action with its completion state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredAction {
    pub kind: RequiredActionKind,
    pub description: String,
    pub completed: bool,
}

/// A pending price change that must be acknowledged before retrying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChange {
    pub previous_total_minor: i64,
    pub new_total_minor: i64,
}

/// External knowledge about an order's retryability: blockers raised by
/// fraud/catalog systems, outstanding caller actions, pending price changes.
/// The production implementation lives with the out-of-scope collaborators;
/// [`NoopAdvisor`] reports nothing.
#[async_trait]
pub trait RetryAdvisor: Send + Sync {
    /// Unresolved external blockers for the order.
    async fn blockers(&self, order_id: Uuid) -> Vec<RetryBlocker>;

    /// Actions required of the caller, with their recorded completion state.
    async fn required_actions(&self, order_id: Uuid) -> Vec<RequiredAction>;

    /// A price change awaiting acknowledgement, if any.
    async fn pending_price_change(&self, order_id: Uuid) -> Option<PriceChange>;
}

/// Advisor that reports no blockers, no actions, no price changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAdvisor;

#[async_trait]
impl RetryAdvisor for NoopAdvisor {
    async fn blockers(&self, _order_id: Uuid) -> Vec<RetryBlocker> {
        Vec::new()
    }

    async fn required_actions(&self, _order_id: Uuid) -> Vec<RequiredAction> {
        Vec::new()
    }

    async fn pending_price_change(&self, _order_id: Uuid) -> Option<PriceChange> {
        None
    }
}

/// Caller-supplied retry request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RetryRequest {
    /// The caller has seen and accepted any pending price change.
    pub acknowledged_price_changes: bool,
    /// Actions the caller reports as completed with this request.
    pub completed_actions: Vec<RequiredActionKind>,
}

/// Closed retry eligibility enumeration.
#[derive(Debug, Clone, Serialize)]
pub enum RetryEligibility {
    /// Retry may proceed. `attempts_remaining` counts retries left after
    /// the one being granted.
    Eligible {
        attempts_remaining: u32,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Retry is blocked by the listed conditions.
    Ineligible {
        reason: String,
        blockers: Vec<RetryBlocker>,
    },
    /// Too soon after the last failure.
    InCooldown {
        next_available_at: DateTime<Utc>,
        attempts_remaining: u32,
    },
    /// The attempt budget is spent.
    MaxRetriesExceeded,
    /// Another execution for this order is still running.
    RetryInProgress,
}

impl RetryEligibility {
    /// Whether a retry may proceed.
    pub fn is_eligible(&self) -> bool {
        matches!(self, RetryEligibility::Eligible { .. })
    }
}

/// Outcome of a retry request.
#[derive(Debug)]
pub enum RetryResponse {
    /// A retry execution ran; its terminal outcome is included.
    Accepted {
        attempt_number: u32,
        execution_id: Uuid,
        outcome: RetryOutcome,
        resumed_from_step_name: Option<String>,
        skipped_step_names: Vec<String>,
    },
    /// No retry execution was created.
    Rejected(RetryEligibility),
}

/// Evaluates eligibility and constructs retry executions.
pub struct RetryCoordinator {
    store: Arc<dyn SagaStore>,
    engine: Arc<SagaEngine>,
    advisor: Arc<dyn RetryAdvisor>,
    config: RetryPolicyConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl RetryCoordinator {
    /// Create a coordinator over the store, engine and advisor.
    pub fn new(
        store: Arc<dyn SagaStore>,
        engine: Arc<SagaEngine>,
        advisor: Arc<dyn RetryAdvisor>,
        config: RetryPolicyConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            engine,
            advisor,
            config,
            clock,
            ids,
        }
    }

    /// Evaluate whether the order may be retried right now.
    pub async fn evaluate(&self, order_id: Uuid, request: &RetryRequest) -> Result<RetryEligibility> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(RetryError::OrderNotFound(order_id))?;

        let executions = self.store.load_executions(order_id).await?;
        let latest = executions
            .last()
            .ok_or(RetryError::NothingToRetry(order_id))?;

        if executions.iter().any(|e| e.status.is_in_flight()) {
            return Ok(RetryEligibility::RetryInProgress);
        }

        if !matches!(
            latest.status,
            ExecutionStatus::Failed | ExecutionStatus::Compensated
        ) {
            return Ok(RetryEligibility::Ineligible {
                reason: format!("latest execution is {}, not retryable", latest.status),
                blockers: vec![RetryBlocker::new(
                    BlockerKind::Other,
                    format!("execution in state {}", latest.status),
                    false,
                )],
            });
        }

        let attempts = self.store.list_retry_attempts(order_id).await?;
        let attempts_used = attempts
            .iter()
            .filter(|a| a.outcome != Some(RetryOutcome::Cancelled))
            .count() as u32;
        if attempts_used >= self.config.max_attempts {
            return Ok(RetryEligibility::MaxRetriesExceeded);
        }
        // Retries left once the requested one is granted.
        let attempts_remaining = self.config.max_attempts - attempts_used - 1;

        // Cooldown runs from the last settlement: the most recent completed
        // attempt, or the failed execution itself for the first retry.
        let last_settled = attempts
            .iter()
            .filter_map(|a| a.completed_at)
            .max()
            .or(latest.completed_at)
            .unwrap_or(latest.started_at);
        let next_available_at = last_settled + self.config.cooldown();
        let now = self.clock.now();
        if now < next_available_at {
            return Ok(RetryEligibility::InCooldown {
                next_available_at,
                attempts_remaining,
            });
        }

        let blockers = self.advisor.blockers(order_id).await;
        if !blockers.is_empty() {
            return Ok(RetryEligibility::Ineligible {
                reason: "unresolved blockers".to_string(),
                blockers,
            });
        }

        let outstanding: Vec<RequiredAction> = self
            .advisor
            .required_actions(order_id)
            .await
            .into_iter()
            .filter(|a| !a.completed && !request.completed_actions.contains(&a.kind))
            .collect();
        if !outstanding.is_empty() {
            let blockers = outstanding
                .iter()
                .map(|a| RetryBlocker::new(BlockerKind::Other, a.description.clone(), true))
                .collect();
            return Ok(RetryEligibility::Ineligible {
                reason: "required actions outstanding".to_string(),
                blockers,
            });
        }

        if let Some(change) = self.advisor.pending_price_change(order_id).await {
            if !request.acknowledged_price_changes {
                return Ok(RetryEligibility::Ineligible {
                    reason: "pending price change must be acknowledged".to_string(),
                    blockers: vec![RetryBlocker::new(
                        BlockerKind::Other,
                        format!(
                            "total changed from {} to {} minor units",
                            change.previous_total_minor, change.new_total_minor
                        ),
                        true,
                    )],
                });
            }
        }

        Ok(RetryEligibility::Eligible {
            attempts_remaining,
            expires_at: None,
        })
    }

    /// Evaluate and, if eligible, construct and run a retry execution.
    pub async fn initiate(&self, order_id: Uuid, request: &RetryRequest) -> Result<RetryResponse> {
        let eligibility = self.evaluate(order_id, request).await?;
        if !eligibility.is_eligible() {
            info!(order_id = %order_id, ?eligibility, "Retry rejected");
            return Ok(RetryResponse::Rejected(eligibility));
        }

        let (original, original_steps) = self
            .store
            .load_execution_for_resume(order_id)
            .await?
            .ok_or(RetryError::NothingToRetry(order_id))?;

        let attempts = self.store.list_retry_attempts(order_id).await?;
        let attempt_number = attempts.iter().map(|a| a.attempt_number).max().unwrap_or(0) + 1;

        let now = self.clock.now();
        let mut attempt =
            RetryAttempt::initiated(self.ids.next_id(), order_id, original.id, attempt_number, now);
        self.store.insert_retry_attempt(&attempt).await?;

        let trace_id = self.ids.next_id().simple().to_string();
        let mut retry_execution =
            SagaExecution::new_retry(self.ids.next_id(), order_id, Some(trace_id), now);
        retry_execution.context_seed = original.context_seed.clone();
        self.store.insert_execution(&retry_execution).await?;

        let plan = self
            .plan_steps(&original, &original_steps, &retry_execution)
            .await?;

        attempt.retry_execution_id = Some(retry_execution.id);
        attempt.resumed_from_step_name = plan.resumed_from.clone();
        attempt.skipped_step_names = plan.skipped.clone();
        self.store.update_retry_attempt(&attempt).await?;

        let event = self.engine.recorder().retry_initiated(
            order_id,
            retry_execution.id,
            attempt_number,
            &plan.skipped,
            plan.resumed_from.as_deref(),
        );
        self.store.append_event(event).await?;

        info!(
            order_id = %order_id,
            attempt = attempt_number,
            resumed_from = ?plan.resumed_from,
            skipped = plan.skipped.len(),
            "Retry initiated"
        );

        let finished = match self.engine.run_execution(retry_execution.id).await {
            Ok(execution) => execution,
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Retry execution aborted");
                attempt.outcome = Some(RetryOutcome::Cancelled);
                attempt.failure_reason = Some(e.to_string());
                attempt.completed_at = Some(self.clock.now());
                self.store.update_retry_attempt(&attempt).await?;
                return Err(e.into());
            }
        };

        let outcome = if finished.status == ExecutionStatus::Completed {
            RetryOutcome::Success
        } else {
            RetryOutcome::Failed
        };
        attempt.outcome = Some(outcome);
        attempt.failure_reason = finished.failure_reason.clone();
        attempt.completed_at = Some(self.clock.now());
        self.store.update_retry_attempt(&attempt).await?;

        Ok(RetryResponse::Accepted {
            attempt_number,
            execution_id: finished.id,
            outcome,
            resumed_from_step_name: plan.resumed_from,
            skipped_step_names: plan.skipped,
        })
    }

    /// Walk the original execution's step records in index order, carrying
    /// still-valid effects over as `SKIPPED` records and picking the
    /// resumption point. Skipping is only permitted on an explicit `Valid`
    /// verdict.
    async fn plan_steps(
        &self,
        original: &SagaExecution,
        original_steps: &[StepExecution],
        retry_execution: &SagaExecution,
    ) -> Result<StepPlan> {
        let steps = step_map(original_steps.to_vec());
        let context = rebuild_context(original, &steps);
        let registry = self.engine.registry().clone();

        let mut plan = StepPlan::default();
        for (index, record) in &steps {
            let candidate = matches!(
                record.status,
                StepStatus::Completed | StepStatus::Compensated | StepStatus::Skipped
            );

            if candidate {
                let verdict = match registry.get(*index as usize) {
                    Some(step) => step.check_validity(&context).await,
                    None => StepValidity::RequiresReExecution(format!(
                        "no step registered at index {index}"
                    )),
                };
                match verdict {
                    StepValidity::Valid => {
                        let skipped = StepExecution::skipped(
                            self.ids.next_id(),
                            retry_execution.id,
                            record.step_name.clone(),
                            *index,
                            record.result_payload.clone(),
                        );
                        self.store.record_step_skipped(&skipped).await?;
                        plan.skipped.push(record.step_name.clone());
                        continue;
                    }
                    StepValidity::ExpiredButRefreshable(reason)
                    | StepValidity::RequiresReExecution(reason) => {
                        info!(
                            step = %record.step_name,
                            reason = %reason,
                            "Previous step effect unusable; will re-execute"
                        );
                    }
                }
            }

            if plan.resumed_from.is_none() {
                plan.resumed_from = Some(record.step_name.clone());
            }
        }

        Ok(plan)
    }
}

#[derive(Debug, Default)]
struct StepPlan {
    skipped: Vec<String>,
    resumed_from: Option<String>,
}
