//! In-memory SagaStore for tests and standalone mode.
//!
//! One `Mutex` over the whole world makes every composite operation atomic,
//! mirroring what the SQL stores get from transactions. Optimistic
//! concurrency on executions behaves exactly like the SQL `WHERE status =
//! :expected` guard.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    ExecutionStatus, Order, OrderEvent, OrderItem, OrderStatus, RetryAttempt, SagaExecution,
    StepExecution,
};

use super::{Result, SagaStore, StorageError, TransitionChanges};

#[derive(Default)]
struct World {
    orders: HashMap<Uuid, Order>,
    items: HashMap<Uuid, Vec<OrderItem>>,
    executions: HashMap<Uuid, SagaExecution>,
    steps: HashMap<Uuid, Vec<StepExecution>>,
    events: Vec<OrderEvent>,
    retries: HashMap<Uuid, Vec<RetryAttempt>>,
}

impl World {
    fn execution_mut(&mut self, execution_id: Uuid) -> Result<&mut SagaExecution> {
        self.executions
            .get_mut(&execution_id)
            .ok_or(StorageError::ExecutionNotFound(execution_id))
    }

    fn upsert_step(&mut self, step: &StepExecution) {
        let steps = self.steps.entry(step.saga_execution_id).or_default();
        match steps.iter_mut().find(|s| s.id == step.id) {
            Some(existing) => *existing = step.clone(),
            None => {
                steps.push(step.clone());
                steps.sort_by_key(|s| s.step_index);
            }
        }
    }

    fn guarded_execution(
        &mut self,
        execution_id: Uuid,
        expected: ExecutionStatus,
    ) -> Result<&mut SagaExecution> {
        let exec = self.execution_mut(execution_id)?;
        if exec.status != expected {
            return Err(StorageError::VersionConflict {
                execution_id,
                expected,
            });
        }
        Ok(exec)
    }
}

/// In-memory implementation of [`SagaStore`].
#[derive(Default)]
pub struct MockSagaStore {
    world: Mutex<World>,
}

impl MockSagaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SagaStore for MockSagaStore {
    async fn insert_order(
        &self,
        order: &Order,
        items: &[OrderItem],
        event: OrderEvent,
    ) -> Result<()> {
        let mut world = self.lock();
        world.orders.insert(order.id, order.clone());
        world.items.insert(order.id, items.to_vec());
        world.events.push(event);
        Ok(())
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
        Ok(self.lock().orders.get(&order_id).cloned())
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        Ok(self.lock().items.get(&order_id).cloned().unwrap_or_default())
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        updated_at: DateTime<Utc>,
        event: Option<OrderEvent>,
    ) -> Result<()> {
        let mut world = self.lock();
        let order = world
            .orders
            .get_mut(&order_id)
            .ok_or(StorageError::OrderNotFound(order_id))?;
        order.status = status;
        order.updated_at = updated_at;
        if let Some(event) = event {
            world.events.push(event);
        }
        Ok(())
    }

    async fn insert_execution(&self, execution: &SagaExecution) -> Result<()> {
        let mut world = self.lock();
        let in_flight = world
            .executions
            .values()
            .any(|e| e.order_id == execution.order_id && e.status.is_in_flight());
        if in_flight {
            return Err(StorageError::ExecutionInProgress(execution.order_id));
        }
        world.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> Result<Option<SagaExecution>> {
        Ok(self.lock().executions.get(&execution_id).cloned())
    }

    async fn transition_execution(
        &self,
        execution_id: Uuid,
        from: ExecutionStatus,
        to: ExecutionStatus,
        changes: TransitionChanges,
        event: Option<OrderEvent>,
    ) -> Result<()> {
        let mut world = self.lock();
        let exec = world.guarded_execution(execution_id, from)?;

        exec.status = to;
        if let Some(index) = changes.failed_step_index {
            exec.failed_step_index = Some(index);
        }
        if let Some(reason) = changes.failure_reason {
            exec.failure_reason = Some(reason);
        }
        if let Some(at) = changes.completed_at {
            exec.completed_at = Some(at);
        }
        if let Some(at) = changes.compensation_started_at {
            exec.compensation_started_at = Some(at);
        }
        if let Some(at) = changes.compensation_completed_at {
            exec.compensation_completed_at = Some(at);
        }

        if let Some(event) = event {
            world.events.push(event);
        }
        Ok(())
    }

    async fn load_execution_for_resume(
        &self,
        order_id: Uuid,
    ) -> Result<Option<(SagaExecution, Vec<StepExecution>)>> {
        let world = self.lock();
        let latest = world
            .executions
            .values()
            .filter(|e| e.order_id == order_id)
            .max_by_key(|e| e.started_at);

        Ok(latest.map(|exec| {
            let steps = world.steps.get(&exec.id).cloned().unwrap_or_default();
            (exec.clone(), steps)
        }))
    }

    async fn load_executions(&self, order_id: Uuid) -> Result<Vec<SagaExecution>> {
        let world = self.lock();
        let mut executions: Vec<SagaExecution> = world
            .executions
            .values()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect();
        executions.sort_by_key(|e| e.started_at);
        Ok(executions)
    }

    async fn list_unfinished_executions(&self) -> Result<Vec<SagaExecution>> {
        let world = self.lock();
        let mut executions: Vec<SagaExecution> = world
            .executions
            .values()
            .filter(|e| e.status.is_in_flight())
            .cloned()
            .collect();
        executions.sort_by_key(|e| e.started_at);
        Ok(executions)
    }

    async fn record_step_start(&self, step: &StepExecution, event: OrderEvent) -> Result<()> {
        let mut world = self.lock();
        world.execution_mut(step.saga_execution_id)?;
        world.upsert_step(step);
        world.events.push(event);
        Ok(())
    }

    async fn record_step_completion(
        &self,
        step: &StepExecution,
        new_current_index: u32,
        event: OrderEvent,
    ) -> Result<()> {
        let mut world = self.lock();
        let exec = world.guarded_execution(step.saga_execution_id, ExecutionStatus::InProgress)?;
        exec.current_step_index = new_current_index;
        world.upsert_step(step);
        world.events.push(event);
        Ok(())
    }

    async fn record_step_failure(
        &self,
        step: &StepExecution,
        failed_step_index: u32,
        failure_reason: &str,
        event: OrderEvent,
    ) -> Result<()> {
        let mut world = self.lock();
        let exec = world.guarded_execution(step.saga_execution_id, ExecutionStatus::InProgress)?;
        exec.failed_step_index = Some(failed_step_index);
        exec.failure_reason = Some(failure_reason.to_string());
        exec.status = ExecutionStatus::Failed;
        world.upsert_step(step);
        world.events.push(event);
        Ok(())
    }

    async fn record_step_compensating(&self, step: &StepExecution) -> Result<()> {
        let mut world = self.lock();
        world.execution_mut(step.saga_execution_id)?;
        world.upsert_step(step);
        Ok(())
    }

    async fn record_step_compensated(&self, step: &StepExecution, event: OrderEvent) -> Result<()> {
        let mut world = self.lock();
        world.execution_mut(step.saga_execution_id)?;
        world.upsert_step(step);
        world.events.push(event);
        Ok(())
    }

    async fn record_step_compensation_failed(
        &self,
        step: &StepExecution,
        event: OrderEvent,
    ) -> Result<()> {
        let mut world = self.lock();
        world.execution_mut(step.saga_execution_id)?;
        world.upsert_step(step);
        world.events.push(event);
        Ok(())
    }

    async fn record_step_skipped(&self, step: &StepExecution) -> Result<()> {
        let mut world = self.lock();
        world.execution_mut(step.saga_execution_id)?;
        world.upsert_step(step);
        Ok(())
    }

    async fn step_executions(&self, execution_id: Uuid) -> Result<Vec<StepExecution>> {
        Ok(self
            .lock()
            .steps
            .get(&execution_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_event(&self, event: OrderEvent) -> Result<()> {
        self.lock().events.push(event);
        Ok(())
    }

    async fn events_for_order(&self, order_id: Uuid) -> Result<Vec<OrderEvent>> {
        let world = self.lock();
        let mut events: Vec<OrderEvent> = world
            .events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect();
        events.sort_by_key(OrderEvent::sort_key);
        Ok(events)
    }

    async fn insert_retry_attempt(&self, attempt: &RetryAttempt) -> Result<()> {
        let mut world = self.lock();
        let attempts = world.retries.entry(attempt.order_id).or_default();
        if attempts
            .iter()
            .any(|a| a.attempt_number == attempt.attempt_number)
        {
            return Err(StorageError::DuplicateRetryAttempt {
                order_id: attempt.order_id,
                attempt_number: attempt.attempt_number,
            });
        }
        attempts.push(attempt.clone());
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(())
    }

    async fn update_retry_attempt(&self, attempt: &RetryAttempt) -> Result<()> {
        let mut world = self.lock();
        let attempts = world
            .retries
            .get_mut(&attempt.order_id)
            .ok_or(StorageError::OrderNotFound(attempt.order_id))?;
        match attempts.iter_mut().find(|a| a.id == attempt.id) {
            Some(existing) => {
                *existing = attempt.clone();
                Ok(())
            }
            None => Err(StorageError::OrderNotFound(attempt.order_id)),
        }
    }

    async fn list_retry_attempts(&self, order_id: Uuid) -> Result<Vec<RetryAttempt>> {
        Ok(self
            .lock()
            .retries
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventOutcome, EventType};

    fn make_order(order_id: Uuid) -> (Order, Vec<OrderItem>) {
        let now = Utc::now();
        let order = Order::hydrate(order_id, "C1".to_string(), 5000, OrderStatus::Pending, now, now);
        let items = vec![OrderItem {
            id: Uuid::new_v4(),
            order_id,
            product_id: "P1".to_string(),
            product_name: "Widget".to_string(),
            quantity: 2,
            unit_price_minor: 2500,
        }];
        (order, items)
    }

    fn make_event(order_id: Uuid, event_type: EventType) -> OrderEvent {
        OrderEvent {
            id: Uuid::new_v4(),
            order_id,
            saga_execution_id: None,
            event_type,
            step_name: None,
            outcome: EventOutcome::Neutral,
            details: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_order() {
        let store = MockSagaStore::new();
        let order_id = Uuid::new_v4();
        let (order, items) = make_order(order_id);

        store
            .insert_order(&order, &items, make_event(order_id, EventType::OrderCreated))
            .await
            .unwrap();

        let loaded = store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(loaded.customer_id, "C1");
        assert_eq!(store.order_items(order_id).await.unwrap().len(), 1);
        assert_eq!(store.events_for_order(order_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_execution_rejects_second_in_flight() {
        let store = MockSagaStore::new();
        let order_id = Uuid::new_v4();

        let first = SagaExecution::new(Uuid::new_v4(), order_id, None, Utc::now());
        store.insert_execution(&first).await.unwrap();

        let second = SagaExecution::new(Uuid::new_v4(), order_id, None, Utc::now());
        assert!(matches!(
            store.insert_execution(&second).await,
            Err(StorageError::ExecutionInProgress(_))
        ));
    }

    #[tokio::test]
    async fn test_transition_guards_on_expected_status() {
        let store = MockSagaStore::new();
        let exec = SagaExecution::new(Uuid::new_v4(), Uuid::new_v4(), None, Utc::now());
        store.insert_execution(&exec).await.unwrap();

        store
            .transition_execution(
                exec.id,
                ExecutionStatus::Pending,
                ExecutionStatus::InProgress,
                TransitionChanges::default(),
                None,
            )
            .await
            .unwrap();

        // A second worker still believing the execution is PENDING loses.
        let result = store
            .transition_execution(
                exec.id,
                ExecutionStatus::Pending,
                ExecutionStatus::InProgress,
                TransitionChanges::default(),
                None,
            )
            .await;

        assert!(matches!(
            result,
            Err(StorageError::VersionConflict { expected: ExecutionStatus::Pending, .. })
        ));
    }

    #[tokio::test]
    async fn test_version_conflict_does_not_append_event() {
        let store = MockSagaStore::new();
        let order_id = Uuid::new_v4();
        let exec = SagaExecution::new(Uuid::new_v4(), order_id, None, Utc::now());
        store.insert_execution(&exec).await.unwrap();

        let result = store
            .transition_execution(
                exec.id,
                ExecutionStatus::InProgress,
                ExecutionStatus::Completed,
                TransitionChanges::default(),
                Some(make_event(order_id, EventType::SagaCompleted)),
            )
            .await;

        assert!(result.is_err());
        assert!(store.events_for_order(order_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_step_completion_bumps_current_index() {
        let store = MockSagaStore::new();
        let order_id = Uuid::new_v4();
        let exec = SagaExecution::new(Uuid::new_v4(), order_id, None, Utc::now());
        store.insert_execution(&exec).await.unwrap();
        store
            .transition_execution(
                exec.id,
                ExecutionStatus::Pending,
                ExecutionStatus::InProgress,
                TransitionChanges::default(),
                None,
            )
            .await
            .unwrap();

        let mut step = StepExecution::starting(Uuid::new_v4(), exec.id, "inventory", 0, Utc::now());
        store
            .record_step_start(&step, make_event(order_id, EventType::StepStarted))
            .await
            .unwrap();

        step.status = crate::domain::StepStatus::Completed;
        step.completed_at = Some(Utc::now());
        store
            .record_step_completion(&step, 1, make_event(order_id, EventType::StepCompleted))
            .await
            .unwrap();

        let reloaded = store.get_execution(exec.id).await.unwrap().unwrap();
        assert_eq!(reloaded.current_step_index, 1);

        let steps = store.step_executions(exec.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, crate::domain::StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_step_failure_marks_execution_failed() {
        let store = MockSagaStore::new();
        let order_id = Uuid::new_v4();
        let exec = SagaExecution::new(Uuid::new_v4(), order_id, None, Utc::now());
        store.insert_execution(&exec).await.unwrap();
        store
            .transition_execution(
                exec.id,
                ExecutionStatus::Pending,
                ExecutionStatus::InProgress,
                TransitionChanges::default(),
                None,
            )
            .await
            .unwrap();

        let mut step = StepExecution::starting(Uuid::new_v4(), exec.id, "payment", 1, Utc::now());
        store
            .record_step_start(&step, make_event(order_id, EventType::StepStarted))
            .await
            .unwrap();

        step.status = crate::domain::StepStatus::Failed;
        store
            .record_step_failure(&step, 1, "card declined", make_event(order_id, EventType::StepFailed))
            .await
            .unwrap();

        let reloaded = store.get_execution(exec.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, ExecutionStatus::Failed);
        assert_eq!(reloaded.failed_step_index, Some(1));
        assert_eq!(reloaded.failure_reason.as_deref(), Some("card declined"));
    }

    #[tokio::test]
    async fn test_retry_attempts_unique_per_order() {
        let store = MockSagaStore::new();
        let order_id = Uuid::new_v4();
        let original = Uuid::new_v4();

        let attempt = RetryAttempt::initiated(Uuid::new_v4(), order_id, original, 1, Utc::now());
        store.insert_retry_attempt(&attempt).await.unwrap();

        let duplicate = RetryAttempt::initiated(Uuid::new_v4(), order_id, original, 1, Utc::now());
        assert!(matches!(
            store.insert_retry_attempt(&duplicate).await,
            Err(StorageError::DuplicateRetryAttempt { .. })
        ));
    }

    #[tokio::test]
    async fn test_events_sorted_by_time_then_id() {
        let store = MockSagaStore::new();
        let order_id = Uuid::new_v4();
        let t = Utc::now();

        let mut late = make_event(order_id, EventType::SagaCompleted);
        late.recorded_at = t + chrono::Duration::seconds(1);
        let mut early = make_event(order_id, EventType::SagaStarted);
        early.recorded_at = t;

        store.append_event(late.clone()).await.unwrap();
        store.append_event(early.clone()).await.unwrap();

        let events = store.events_for_order(order_id).await.unwrap();
        assert_eq!(events[0].id, early.id);
        assert_eq!(events[1].id, late.id);
    }
}
