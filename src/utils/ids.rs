//! Injectable unique id generation.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Source of unique identifiers.
pub trait IdGenerator: Send + Sync {
    /// Produce a fresh identifier.
    fn next_id(&self) -> Uuid;
}

/// Production generator using random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl UuidGenerator {
    /// Create a new UUID generator.
    pub fn new() -> Self {
        Self
    }
}

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Deterministic generator for tests: ids are derived from a counter, so a
/// test run produces the same ids every time.
#[derive(Debug, Default)]
pub struct SequencedIds {
    counter: AtomicU64,
}

impl SequencedIds {
    /// Create a sequenced generator starting at zero.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequencedIds {
    fn next_id(&self) -> Uuid {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Uuid::from_u64_pair(0x5eed, n)
    }
}
