//! Per-execution saga context.
//!
//! A keyed bag carried through one execution. Keys are typed tokens so that
//! readers and writers cannot disagree on a value's type; the legacy
//! string-keyed accessors remain as a compatibility shim. The context also
//! records which steps have completed, in order. Everything recorded into a
//! step's result payload survives restarts by being merged back in from
//! storage.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Result type for context operations.
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors from context access.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Context value for '{key}' has the wrong shape: {source}")]
    WrongShape {
        key: String,
        source: serde_json::Error,
    },

    #[error("Context value for '{key}' could not be serialized: {source}")]
    NotSerializable {
        key: String,
        source: serde_json::Error,
    },
}

/// Typed context key: a name plus a static type tag.
///
/// Equality is defined by name only; the type parameter pins what `put` and
/// `get` agree on. Declare keys as consts next to the steps that own them.
pub struct ContextKey<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// Declare a key.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    /// The key's name as stored in the bag.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> PartialEq for ContextKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for ContextKey<T> {}

impl<T> std::fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContextKey({})", self.name)
    }
}

/// Keyed data bag shared across the steps of one execution.
#[derive(Debug, Clone, Default)]
pub struct SagaContext {
    values: BTreeMap<String, Value>,
    completed_steps: Vec<String>,
}

impl SagaContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a typed value.
    pub fn put<T: Serialize>(&mut self, key: ContextKey<T>, value: &T) -> Result<()> {
        let json = serde_json::to_value(value).map_err(|source| ContextError::NotSerializable {
            key: key.name.to_string(),
            source,
        })?;
        self.values.insert(key.name.to_string(), json);
        Ok(())
    }

    /// Read a typed value. `None` when the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: ContextKey<T>) -> Result<Option<T>> {
        match self.values.get(key.name) {
            None => Ok(None),
            Some(json) => serde_json::from_value(json.clone())
                .map(Some)
                .map_err(|source| ContextError::WrongShape {
                    key: key.name.to_string(),
                    source,
                }),
        }
    }

    /// Whether a key is present.
    pub fn contains<T>(&self, key: ContextKey<T>) -> bool {
        self.values.contains_key(key.name)
    }

    /// Legacy string-keyed write. Prefer [`SagaContext::put`].
    pub fn put_raw(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Legacy string-keyed read. Prefer [`SagaContext::get`].
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Merge a step's result data into the bag. Later writers win per key.
    pub fn merge(&mut self, data: &BTreeMap<String, Value>) {
        for (key, value) in data {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Record a step as forward-completed. Insert-ordered, deduplicated.
    pub fn record_completion(&mut self, step_name: &str) {
        if !self.completed_steps.iter().any(|s| s == step_name) {
            self.completed_steps.push(step_name.to_string());
        }
    }

    /// Step names completed so far, in completion order.
    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    /// Whether a step has been recorded as completed.
    pub fn has_completed(&self, step_name: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_name)
    }

    /// Snapshot of the raw values, used to persist a step's view of the bag.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESERVATION_ID: ContextKey<String> = ContextKey::new("RESERVATION_ID");
    const ATTEMPTS: ContextKey<u32> = ContextKey::new("ATTEMPTS");

    #[test]
    fn test_typed_put_get_round_trip() {
        let mut ctx = SagaContext::new();
        ctx.put(RESERVATION_ID, &"R-42".to_string()).unwrap();

        assert_eq!(ctx.get(RESERVATION_ID).unwrap(), Some("R-42".to_string()));
        assert!(ctx.contains(RESERVATION_ID));
        assert_eq!(ctx.get(ATTEMPTS).unwrap(), None);
    }

    #[test]
    fn test_get_rejects_wrong_shape() {
        let mut ctx = SagaContext::new();
        ctx.put_raw("ATTEMPTS", Value::String("not a number".into()));

        assert!(matches!(
            ctx.get(ATTEMPTS),
            Err(ContextError::WrongShape { .. })
        ));
    }

    #[test]
    fn test_raw_shim_interoperates_with_typed_keys() {
        let mut ctx = SagaContext::new();
        ctx.put_raw("RESERVATION_ID", Value::String("R-7".into()));

        assert_eq!(ctx.get(RESERVATION_ID).unwrap(), Some("R-7".to_string()));
        assert_eq!(
            ctx.get_raw("RESERVATION_ID"),
            Some(&Value::String("R-7".into()))
        );
    }

    #[test]
    fn test_merge_overwrites_per_key() {
        let mut ctx = SagaContext::new();
        ctx.put_raw("A", Value::from(1));

        let mut data = BTreeMap::new();
        data.insert("A".to_string(), Value::from(2));
        data.insert("B".to_string(), Value::from(3));
        ctx.merge(&data);

        assert_eq!(ctx.get_raw("A"), Some(&Value::from(2)));
        assert_eq!(ctx.get_raw("B"), Some(&Value::from(3)));
    }

    #[test]
    fn test_completed_steps_ordered_and_deduplicated() {
        let mut ctx = SagaContext::new();
        ctx.record_completion("inventory");
        ctx.record_completion("payment");
        ctx.record_completion("inventory");

        assert_eq!(ctx.completed_steps(), &["inventory", "payment"]);
        assert!(ctx.has_completed("payment"));
        assert!(!ctx.has_completed("shipping"));
    }

    #[test]
    fn test_key_equality_by_name_only() {
        let a: ContextKey<String> = ContextKey::new("K");
        let b: ContextKey<String> = ContextKey::new("K");
        assert_eq!(a, b);
    }
}
