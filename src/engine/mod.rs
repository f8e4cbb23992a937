//! Saga execution engine.
//!
//! Drives a single saga execution through the state machine: forward steps
//! in registered order, failure handling, reverse-order compensation, and
//! terminal transitions. Progress is committed after every step transition,
//! with the corresponding lifecycle event appended in the same transaction,
//! so a crashed engine resumes from exactly what is persisted. Concurrency
//! control is the store's optimistic guard on `(id, status)`: a worker that
//! loses a transition race aborts silently and the winner drives the
//! execution.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::SagaContext;
use crate::domain::{
    ErrorInfo, ExecutionStatus, NewOrder, Order, OrderStatus, SagaExecution, StepExecution,
    StepStatus, ValidationError,
};
use crate::recorder::EventRecorder;
use crate::step::{SagaStep, StepRegistry, StepRuntime};
use crate::steps::keys;
use crate::storage::{SagaStore, StorageError, TransitionChanges};
use crate::stream::{StatusStreamHub, StatusUpdate};
use crate::utils::{Clock, IdGenerator};


/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine.
///
/// Step failures are not errors here: they are handled by compensation and
/// reported through the execution's terminal state.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("No step registered at index {0}")]
    UnknownStepIndex(u32),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Read model behind the external status endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrderStatusView {
    pub overall_status: OrderStatus,
    pub current_step: Option<String>,
    pub failed_step: Option<String>,
    pub failure_reason: Option<String>,
}

/// The orchestrator proper.
pub struct SagaEngine {
    store: Arc<dyn SagaStore>,
    registry: Arc<StepRegistry>,
    runtime: StepRuntime,
    recorder: EventRecorder,
    hub: Arc<StatusStreamHub>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    shutdown: CancellationToken,
}

impl SagaEngine {
    /// Create an engine over its collaborators.
    pub fn new(
        store: Arc<dyn SagaStore>,
        registry: Arc<StepRegistry>,
        hub: Arc<StatusStreamHub>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            store,
            registry,
            runtime: StepRuntime::new(),
            recorder: EventRecorder::new(clock.clone(), ids.clone()),
            hub,
            config,
            clock,
            ids,
            shutdown: CancellationToken::new(),
        }
    }

    /// The engine's event recorder (shared with the retry coordinator).
    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    /// The step registry this engine runs.
    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    /// Request cooperative shutdown: in-flight step calls are cancelled and
    /// treated as unknown-outcome failures; executions still reach a
    /// terminal or resumable state.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Validate and persist a new order, then run its saga to a terminal
    /// state. Validation failures surface synchronously and leave no
    /// persisted state.
    pub async fn submit_order(&self, submission: NewOrder) -> Result<SagaExecution> {
        let now = self.clock.now();
        let order_id = self.ids.next_id();
        let ids = self.ids.clone();
        let (order, items) =
            Order::from_submission(order_id, move || ids.next_id(), &submission, now)?;

        info!(
            order_id = %order.id,
            customer = %order.customer_id,
            total_minor = order.total_amount_minor,
            "Order accepted"
        );

        self.store
            .insert_order(
                &order,
                &items,
                self.recorder.order_created(order.id, order.total_amount_minor),
            )
            .await?;

        let trace_id = self.ids.next_id().simple().to_string();
        let execution = SagaExecution::new(self.ids.next_id(), order.id, Some(trace_id), now)
            .with_seed(seed_from_submission(&order, &submission));
        self.store.insert_execution(&execution).await?;

        self.run_execution(execution.id).await
    }

    // ------------------------------------------------------------------
    // Driving
    // ------------------------------------------------------------------

    /// Drive an execution from its persisted state to a terminal state.
    ///
    /// Covers fresh executions, retry executions prepared by the
    /// coordinator, and crashed executions being resumed. Returns the final
    /// execution row; if this worker loses an optimistic race, the stored
    /// row (owned by the winner) is returned untouched.
    pub async fn run_execution(&self, execution_id: Uuid) -> Result<SagaExecution> {
        match self.drive(execution_id).await {
            Ok(execution) => Ok(execution),
            Err(EngineError::Storage(StorageError::VersionConflict {
                execution_id,
                expected,
            })) => {
                debug!(
                    execution_id = %execution_id,
                    expected = %expected,
                    "Lost optimistic race; another worker owns this execution"
                );
                self.store
                    .get_execution(execution_id)
                    .await?
                    .ok_or(EngineError::ExecutionNotFound(execution_id))
            }
            Err(e) => Err(e),
        }
    }

    async fn drive(&self, execution_id: Uuid) -> Result<SagaExecution> {
        let mut execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;
        let mut steps = step_map(self.store.step_executions(execution_id).await?);
        let mut context = rebuild_context(&execution, &steps);

        if execution.status == ExecutionStatus::Pending {
            self.start(&mut execution).await?;
        }

        if execution.status == ExecutionStatus::InProgress {
            match self.run_forward(&mut execution, &mut steps, &mut context).await? {
                ForwardOutcome::Completed => {
                    self.finish_success(&mut execution).await?;
                    return Ok(execution);
                }
                ForwardOutcome::Failed => {}
            }
        }

        if matches!(
            execution.status,
            ExecutionStatus::Failed | ExecutionStatus::Compensating
        ) {
            self.compensate(&mut execution, &mut steps, &context).await?;
        }

        Ok(execution)
    }

    async fn start(&self, execution: &mut SagaExecution) -> Result<()> {
        let event = self
            .recorder
            .saga_started(execution.order_id, execution.id);
        self.store
            .transition_execution(
                execution.id,
                ExecutionStatus::Pending,
                ExecutionStatus::InProgress,
                TransitionChanges::default(),
                Some(event.clone()),
            )
            .await?;
        execution.status = ExecutionStatus::InProgress;

        self.store
            .update_order_status(
                execution.order_id,
                OrderStatus::Processing,
                self.clock.now(),
                None,
            )
            .await?;

        info!(
            order_id = %execution.order_id,
            execution_id = %execution.id,
            retry = execution.is_retry,
            "Saga started"
        );
        self.publish(execution, Some(&event), None).await;
        Ok(())
    }

    async fn run_forward(
        &self,
        execution: &mut SagaExecution,
        steps: &mut BTreeMap<u32, StepExecution>,
        context: &mut SagaContext,
    ) -> Result<ForwardOutcome> {
        let total = self.registry.len() as u32;
        let mut index = execution.current_step_index;

        while index < total {
            if let Some(existing) = steps.get(&index) {
                match existing.status {
                    // Prepared by the retry coordinator, or already done
                    // before a crash: data is in the context, move on.
                    StepStatus::Skipped | StepStatus::Completed => {
                        index += 1;
                        continue;
                    }
                    _ => {}
                }
            }

            let step = self
                .registry
                .get(index as usize)
                .ok_or(EngineError::UnknownStepIndex(index))?
                .clone();

            match self.run_step(execution, steps, context, index, &step).await? {
                StepOutcome::Completed => index += 1,
                StepOutcome::Failed => return Ok(ForwardOutcome::Failed),
            }
        }

        Ok(ForwardOutcome::Completed)
    }

    async fn run_step(
        &self,
        execution: &mut SagaExecution,
        steps: &mut BTreeMap<u32, StepExecution>,
        context: &mut SagaContext,
        index: u32,
        step: &Arc<dyn SagaStep>,
    ) -> Result<StepOutcome> {
        let now = self.clock.now();
        // Reuse the row id when re-invoking after a crash; the record is
        // keyed by (execution, index).
        let record_id = steps
            .get(&index)
            .map(|s| s.id)
            .unwrap_or_else(|| self.ids.next_id());
        let mut record =
            StepExecution::starting(record_id, execution.id, step.name(), index, now);

        let started_event =
            self.recorder
                .step_started(execution.order_id, execution.id, step.name());
        self.store
            .record_step_start(&record, started_event.clone())
            .await?;
        self.publish(execution, Some(&started_event), Some(step.name()))
            .await;

        let deadline = self.config.step_timeout(step.name());
        let result = self
            .runtime
            .execute_forward(step.as_ref(), context, deadline, &self.shutdown.child_token())
            .await;

        if result.success {
            context.merge(&result.data);
            context.record_completion(step.name());

            record.status = StepStatus::Completed;
            record.completed_at = Some(self.clock.now());
            record.result_payload = Some(Value::Object(
                result.data.clone().into_iter().collect(),
            ));

            let event = self.recorder.step_completed(
                execution.order_id,
                execution.id,
                step.name(),
                &result.data,
            );
            self.store
                .record_step_completion(&record, index + 1, event.clone())
                .await?;
            execution.current_step_index = index + 1;
            steps.insert(index, record);

            debug!(
                order_id = %execution.order_id,
                step = %step.name(),
                index,
                "Step completed"
            );
            self.publish(execution, Some(&event), Some(step.name())).await;
            Ok(StepOutcome::Completed)
        } else {
            let error = result
                .error
                .unwrap_or_else(|| ErrorInfo::unexpected("step reported failure without detail"));

            record.status = StepStatus::Failed;
            record.error = Some(error.clone());

            let event = self.recorder.step_failed(
                execution.order_id,
                execution.id,
                step.name(),
                error.clone(),
            );
            self.store
                .record_step_failure(&record, index, &error.message, event.clone())
                .await?;
            execution.status = ExecutionStatus::Failed;
            execution.failed_step_index = Some(index);
            execution.failure_reason = Some(error.message.clone());
            steps.insert(index, record);

            warn!(
                order_id = %execution.order_id,
                step = %step.name(),
                index,
                code = %error.code,
                reason = %error.message,
                "Step failed; compensation will run"
            );
            self.publish(execution, Some(&event), Some(step.name())).await;

            // Execution-level failure marker, outside the step transaction.
            let saga_failed = self.recorder.saga_failed(
                execution.order_id,
                execution.id,
                step.name(),
                &error.message,
            );
            self.store.append_event(saga_failed).await?;

            Ok(StepOutcome::Failed)
        }
    }

    async fn compensate(
        &self,
        execution: &mut SagaExecution,
        steps: &mut BTreeMap<u32, StepExecution>,
        context: &SagaContext,
    ) -> Result<()> {
        let failed_index = execution
            .failed_step_index
            .unwrap_or(execution.current_step_index);

        if execution.status == ExecutionStatus::Failed {
            let event = self
                .recorder
                .compensation_started(execution.order_id, execution.id);
            self.store
                .transition_execution(
                    execution.id,
                    ExecutionStatus::Failed,
                    ExecutionStatus::Compensating,
                    TransitionChanges {
                        compensation_started_at: Some(self.clock.now()),
                        ..Default::default()
                    },
                    Some(event.clone()),
                )
                .await?;
            execution.status = ExecutionStatus::Compensating;

            self.store
                .update_order_status(
                    execution.order_id,
                    OrderStatus::Compensating,
                    self.clock.now(),
                    None,
                )
                .await?;

            info!(
                order_id = %execution.order_id,
                execution_id = %execution.id,
                failed_index,
                "Compensation started"
            );
            self.publish(execution, Some(&event), None).await;
        }

        let mut anomalies: u32 = 0;
        for index in (0..failed_index).rev() {
            let Some(record) = steps.get(&index).cloned() else {
                continue;
            };
            // Compensating: crashed mid-undo, invoke again (at-least-once).
            if !matches!(
                record.status,
                StepStatus::Completed | StepStatus::Compensating
            ) {
                continue;
            }

            let step = self
                .registry
                .get(index as usize)
                .ok_or(EngineError::UnknownStepIndex(index))?
                .clone();

            let mut record = record;
            record.status = StepStatus::Compensating;
            self.store.record_step_compensating(&record).await?;

            let deadline = self.config.step_timeout(step.name());
            let result = self
                .runtime
                .execute_compensation(
                    step.as_ref(),
                    context,
                    deadline,
                    &self.shutdown.child_token(),
                )
                .await;

            if result.success {
                record.status = StepStatus::Compensated;
                record.compensated_at = Some(self.clock.now());
                let event = self.recorder.step_compensated(
                    execution.order_id,
                    execution.id,
                    step.name(),
                );
                self.store
                    .record_step_compensated(&record, event.clone())
                    .await?;
                debug!(
                    order_id = %execution.order_id,
                    step = %step.name(),
                    index,
                    "Step compensated"
                );
                self.publish(execution, Some(&event), Some(step.name())).await;
            } else {
                // Best-effort: record the anomaly and keep reversing the
                // earlier steps.
                let message = result
                    .message
                    .unwrap_or_else(|| "compensation failed without detail".to_string());
                record.status = StepStatus::Failed;
                record.error = Some(ErrorInfo::compensation_failed(&message));
                let event = self.recorder.step_compensation_failed(
                    execution.order_id,
                    execution.id,
                    step.name(),
                    &message,
                );
                self.store
                    .record_step_compensation_failed(&record, event.clone())
                    .await?;
                anomalies += 1;
                error!(
                    order_id = %execution.order_id,
                    step = %step.name(),
                    index,
                    reason = %message,
                    "Compensation failed; continuing with earlier steps"
                );
                self.publish(execution, Some(&event), Some(step.name())).await;
            }
            steps.insert(index, record);
        }

        let now = self.clock.now();
        let event = self
            .recorder
            .saga_compensated(execution.order_id, execution.id);
        self.store
            .transition_execution(
                execution.id,
                ExecutionStatus::Compensating,
                ExecutionStatus::Compensated,
                TransitionChanges {
                    completed_at: Some(now),
                    compensation_completed_at: Some(now),
                    ..Default::default()
                },
                Some(event.clone()),
            )
            .await?;
        execution.status = ExecutionStatus::Compensated;
        execution.completed_at = Some(now);
        execution.compensation_completed_at = Some(now);

        let cancelled = self
            .recorder
            .order_cancelled(execution.order_id, execution.id);
        self.store
            .update_order_status(
                execution.order_id,
                OrderStatus::Compensated,
                self.clock.now(),
                Some(cancelled),
            )
            .await?;

        info!(
            order_id = %execution.order_id,
            execution_id = %execution.id,
            anomalies,
            "Saga compensated"
        );
        self.publish(execution, Some(&event), None).await;
        Ok(())
    }

    async fn finish_success(&self, execution: &mut SagaExecution) -> Result<()> {
        let now = self.clock.now();
        let event = self
            .recorder
            .saga_completed(execution.order_id, execution.id);
        self.store
            .transition_execution(
                execution.id,
                ExecutionStatus::InProgress,
                ExecutionStatus::Completed,
                TransitionChanges {
                    completed_at: Some(now),
                    ..Default::default()
                },
                Some(event.clone()),
            )
            .await?;
        execution.status = ExecutionStatus::Completed;
        execution.completed_at = Some(now);

        let completed = self
            .recorder
            .order_completed(execution.order_id, execution.id);
        self.store
            .update_order_status(
                execution.order_id,
                OrderStatus::Completed,
                self.clock.now(),
                Some(completed),
            )
            .await?;

        info!(
            order_id = %execution.order_id,
            execution_id = %execution.id,
            "Saga completed"
        );
        self.publish(execution, Some(&event), None).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recovery & queries
    // ------------------------------------------------------------------

    /// Crash-recovery sweep: drive every execution left unfinished by a
    /// previous process to a terminal state. Returns the execution ids that
    /// were resumed.
    pub async fn resume_unfinished(&self) -> Result<Vec<Uuid>> {
        let unfinished = self.store.list_unfinished_executions().await?;
        let mut resumed = Vec::with_capacity(unfinished.len());

        for execution in unfinished {
            info!(
                order_id = %execution.order_id,
                execution_id = %execution.id,
                status = %execution.status,
                "Resuming unfinished execution"
            );
            self.run_execution(execution.id).await?;
            resumed.push(execution.id);
        }

        Ok(resumed)
    }

    /// Current status of an order, for the external status endpoint.
    pub async fn order_status(&self, order_id: Uuid) -> Result<OrderStatusView> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))?;

        let latest = self.store.load_execution_for_resume(order_id).await?;
        let (current_step, failed_step, failure_reason) = match &latest {
            None => (None, None, None),
            Some((execution, steps)) => {
                let current = if execution.status == ExecutionStatus::InProgress {
                    self.registry
                        .get(execution.current_step_index as usize)
                        .map(|s| s.name().to_string())
                } else {
                    None
                };
                let failed = execution.failed_step_index.and_then(|index| {
                    steps
                        .iter()
                        .find(|s| s.step_index == index)
                        .map(|s| s.step_name.clone())
                });
                (current, failed, execution.failure_reason.clone())
            }
        };

        Ok(OrderStatusView {
            overall_status: order.status,
            current_step,
            failed_step,
            failure_reason,
        })
    }

    async fn publish(
        &self,
        execution: &SagaExecution,
        event: Option<&crate::domain::OrderEvent>,
        step_name: Option<&str>,
    ) {
        self.hub
            .publish(StatusUpdate {
                order_id: execution.order_id,
                execution_id: execution.id,
                status: execution.status,
                event_type: event.map(|e| e.event_type),
                step_name: step_name.map(str::to_string),
                at: self.clock.now(),
            })
            .await;
    }
}

enum ForwardOutcome {
    Completed,
    Failed,
}

enum StepOutcome {
    Completed,
    Failed,
}

/// Index step records by step index.
pub(crate) fn step_map(steps: Vec<StepExecution>) -> BTreeMap<u32, StepExecution> {
    steps.into_iter().map(|s| (s.step_index, s)).collect()
}

/// Rebuild a context from an execution's seed and its persisted step
/// payloads, in index order.
pub(crate) fn rebuild_context(
    execution: &SagaExecution,
    steps: &BTreeMap<u32, StepExecution>,
) -> SagaContext {
    let mut context = SagaContext::new();

    if let Some(Value::Object(seed)) = &execution.context_seed {
        for (key, value) in seed {
            context.put_raw(key.clone(), value.clone());
        }
    }

    for step in steps.values() {
        let carried = matches!(
            step.status,
            StepStatus::Completed
                | StepStatus::Skipped
                | StepStatus::Compensating
                | StepStatus::Compensated
        );
        if !carried {
            continue;
        }
        if let Some(Value::Object(payload)) = &step.result_payload {
            for (key, value) in payload {
                context.put_raw(key.clone(), value.clone());
            }
        }
        if step.status == StepStatus::Completed {
            context.record_completion(&step.step_name);
        }
    }

    context
}

/// Initial context values for a fresh submission.
fn seed_from_submission(order: &Order, submission: &NewOrder) -> Value {
    let mut seed = serde_json::Map::new();
    seed.insert(
        keys::ORDER_ID.name().to_string(),
        Value::String(order.id.to_string()),
    );
    seed.insert(
        keys::CUSTOMER_ID.name().to_string(),
        Value::String(order.customer_id.clone()),
    );
    seed.insert(
        keys::PAYMENT_METHOD_ID.name().to_string(),
        Value::String(submission.payment_method_id.clone()),
    );
    seed.insert(
        keys::SHIPPING_ADDRESS.name().to_string(),
        Value::String(submission.shipping_address.clone()),
    );
    seed.insert(
        keys::ORDER_ITEMS.name().to_string(),
        serde_json::to_value(&submission.items).unwrap_or(Value::Null),
    );
    seed.insert(
        keys::TOTAL_AMOUNT_MINOR.name().to_string(),
        Value::from(order.total_amount_minor),
    );
    Value::Object(seed)
}
