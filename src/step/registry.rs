//! Immutable ordered catalogue of step definitions.
//!
//! Registration order determines both forward execution and reverse
//! compensation. One registry per saga type, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use super::SagaStep;

/// Errors from registry construction.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Duplicate step name: {0}")]
    DuplicateName(String),

    #[error("A saga type must register at least one step")]
    Empty,
}

/// Fixed, ordered catalogue of steps for one saga type.
pub struct StepRegistry {
    steps: Vec<Arc<dyn SagaStep>>,
    by_name: HashMap<String, usize>,
}

impl StepRegistry {
    /// Start building a registry.
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder { steps: Vec::new() }
    }

    /// Number of registered steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the registry is empty. Never true for a built registry.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at a forward index.
    pub fn get(&self, index: usize) -> Option<&Arc<dyn SagaStep>> {
        self.steps.get(index)
    }

    /// Step by name, with its forward index.
    pub fn by_name(&self, name: &str) -> Option<(usize, &Arc<dyn SagaStep>)> {
        self.by_name.get(name).map(|&i| (i, &self.steps[i]))
    }

    /// Iterate steps in forward order with their indexes.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<dyn SagaStep>)> {
        self.steps.iter().enumerate()
    }

    /// Step names in forward order.
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

/// Builder for [`StepRegistry`].
pub struct StepRegistryBuilder {
    steps: Vec<Arc<dyn SagaStep>>,
}

impl StepRegistryBuilder {
    /// Append a step; position in the call sequence is its forward index.
    pub fn register(mut self, step: Arc<dyn SagaStep>) -> Self {
        self.steps.push(step);
        self
    }

    /// Finalize. Fails on duplicate names or an empty step set.
    pub fn build(self) -> Result<StepRegistry, RegistryError> {
        if self.steps.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut by_name = HashMap::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            if by_name.insert(step.name().to_string(), index).is_some() {
                return Err(RegistryError::DuplicateName(step.name().to_string()));
            }
        }

        Ok(StepRegistry {
            steps: self.steps,
            by_name,
        })
    }
}
