//! Aggregate stores

use super::Aggregate;
use crate::error::RepositoryError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Backing storage for a [`super::Repository`].
pub trait AggregateStore<A: Aggregate>: Send + Sync {
    fn load(&self, key: &A::Key) -> Result<Option<A>, RepositoryError>;

    /// Insert a new aggregate. Fails if the key already exists.
    fn insert(&self, aggregate: &A) -> Result<(), RepositoryError>;

    /// Replace an aggregate whose stored version must equal `expected_version`.
    fn update(&self, aggregate: &A, expected_version: u64) -> Result<(), RepositoryError>;

    fn delete(&self, key: &A::Key, expected_version: u64) -> Result<(), RepositoryError>;
}

/// HashMap-backed store with optimistic concurrency checks.
pub struct InMemoryAggregateStore<A: Aggregate> {
    aggregates: RwLock<HashMap<A::Key, A>>,
}

impl<A: Aggregate> InMemoryAggregateStore<A> {
    pub fn new() -> Self {
        Self {
            aggregates: RwLock::new(HashMap::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.aggregates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.read().is_empty()
    }

    /// Snapshot of every stored aggregate.
    pub fn all(&self) -> Vec<A> {
        self.aggregates.read().values().cloned().collect()
    }

    fn check_version(stored: &A, expected: u64) -> Result<(), RepositoryError> {
        if stored.version() != expected {
            return Err(RepositoryError::ConcurrencyConflict {
                key: stored.key().to_string(),
                expected,
                actual: stored.version(),
            });
        }
        Ok(())
    }
}

impl<A: Aggregate> Default for InMemoryAggregateStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Aggregate> AggregateStore<A> for InMemoryAggregateStore<A> {
    fn load(&self, key: &A::Key) -> Result<Option<A>, RepositoryError> {
        Ok(self.aggregates.read().get(key).cloned())
    }

    fn insert(&self, aggregate: &A) -> Result<(), RepositoryError> {
        let mut aggregates = self.aggregates.write();
        let key = aggregate.key();
        if aggregates.contains_key(&key) {
            return Err(RepositoryError::DuplicateKey(key.to_string()));
        }
        aggregates.insert(key, aggregate.clone());
        Ok(())
    }

    fn update(&self, aggregate: &A, expected_version: u64) -> Result<(), RepositoryError> {
        let mut aggregates = self.aggregates.write();
        let key = aggregate.key();
        let stored = aggregates
            .get(&key)
            .ok_or_else(|| RepositoryError::NotFound(key.to_string()))?;
        Self::check_version(stored, expected_version)?;
        aggregates.insert(key, aggregate.clone());
        Ok(())
    }

    fn delete(&self, key: &A::Key, expected_version: u64) -> Result<(), RepositoryError> {
        let mut aggregates = self.aggregates.write();
        let stored = aggregates
            .get(key)
            .ok_or_else(|| RepositoryError::NotFound(key.to_string()))?;
        Self::check_version(stored, expected_version)?;
        aggregates.remove(key);
        Ok(())
    }
}
