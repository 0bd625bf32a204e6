//! Aggregate Repository
//!
//! Identity-mapped, change-tracking repository. Every operation enlists the repository in the
//! caller's [`UnitOfWorkContext`]; pending inserts, updates and deletes are written to the
//! [`AggregateStore`] when the context flushes. Events raised by aggregates are published to
//! the context's current event bus, so they only become visible once the scope completes.

mod store;

pub use store::{AggregateStore, InMemoryAggregateStore};

use crate::error::{BoxError, RepositoryError, UnitOfWorkError};
use crate::events::EventEnvelope;
use crate::uow::{FlushContext, UnitOfWork, UnitOfWorkContext};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// An aggregate root managed by a [`Repository`].
pub trait Aggregate: Clone + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    /// Version of the aggregate as last stored (0 before the first insert).
    fn version(&self) -> u64;

    fn set_version(&mut self, version: u64);

    /// Drain events raised since the last call.
    fn take_events(&mut self) -> Vec<EventEnvelope>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Unchanged,
    Added,
    Modified,
    Removed,
}

struct Tracked<A> {
    aggregate: A,
    loaded_version: u64,
    change: Change,
}

struct ChangeSet<A: Aggregate> {
    tracked: HashMap<A::Key, Tracked<A>>,
    order: Vec<A::Key>,
}

impl<A: Aggregate> Default for ChangeSet<A> {
    fn default() -> Self {
        Self {
            tracked: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<A: Aggregate> ChangeSet<A> {
    fn track(&mut self, key: A::Key, tracked: Tracked<A>) {
        if self.tracked.insert(key.clone(), tracked).is_none() {
            self.order.push(key);
        }
    }

    fn forget(&mut self, key: &A::Key) {
        self.tracked.remove(key);
        self.order.retain(|k| k != key);
    }

    fn pending(&self) -> usize {
        self.tracked
            .values()
            .filter(|t| t.change != Change::Unchanged)
            .count()
    }
}

/// Repository flush behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryOptions {
    /// Repositories sharing a non-empty group are flushed together on one thread
    pub flush_group: String,
    /// Allow the repository to be flushed on a background thread
    pub asynchronous: bool,
}

pub struct Repository<A: Aggregate> {
    name: String,
    store: Arc<dyn AggregateStore<A>>,
    options: RepositoryOptions,
    changes: Mutex<ChangeSet<A>>,
}

impl<A: Aggregate> Repository<A> {
    pub fn new(name: impl Into<String>, store: Arc<dyn AggregateStore<A>>) -> Arc<Self> {
        Self::with_options(name, store, RepositoryOptions::default())
    }

    pub fn with_options(
        name: impl Into<String>,
        store: Arc<dyn AggregateStore<A>>,
        options: RepositoryOptions,
    ) -> Arc<Self> {
        Arc::new(Self::build(name.into(), store, options))
    }

    /// The repository cached in `context` under `name`, created on first use.
    ///
    /// Repositories are cached by aggregate type and name. A later call with the same name
    /// returns the cached instance and ignores `store` and `options`.
    pub fn scoped(
        context: &UnitOfWorkContext,
        name: &str,
        store: Arc<dyn AggregateStore<A>>,
        options: RepositoryOptions,
    ) -> Arc<Self> {
        context
            .cache()
            .get_or_insert_named(name, || Self::build(name.to_string(), store, options))
    }

    fn build(name: String, store: Arc<dyn AggregateStore<A>>, options: RepositoryOptions) -> Self {
        Self {
            name,
            store,
            options,
            changes: Mutex::new(ChangeSet::default()),
        }
    }

    /// Number of aggregates with unflushed changes.
    pub fn pending_changes(&self) -> usize {
        self.changes.lock().pending()
    }

    pub fn get(
        self: &Arc<Self>,
        context: &UnitOfWorkContext,
        key: &A::Key,
    ) -> Result<Option<A>, RepositoryError> {
        self.attach(context)?;
        if let Some(tracked) = self.changes.lock().tracked.get(key) {
            return Ok(match tracked.change {
                Change::Removed => None,
                _ => Some(tracked.aggregate.clone()),
            });
        }
        let Some(aggregate) = self.store.load(key)? else {
            return Ok(None);
        };
        self.changes.lock().track(
            key.clone(),
            Tracked {
                aggregate: aggregate.clone(),
                loaded_version: aggregate.version(),
                change: Change::Unchanged,
            },
        );
        Ok(Some(aggregate))
    }

    pub fn add(
        self: &Arc<Self>,
        context: &UnitOfWorkContext,
        mut aggregate: A,
    ) -> Result<(), RepositoryError> {
        self.attach(context)?;
        let key = aggregate.key();
        let previous = self
            .changes
            .lock()
            .tracked
            .get(&key)
            .map(|t| (t.change, t.loaded_version));
        let (change, loaded_version) = match previous {
            Some((Change::Removed, loaded_version)) => (Change::Modified, loaded_version),
            Some(_) => return Err(RepositoryError::DuplicateKey(key.to_string())),
            None => (Change::Added, 0),
        };
        publish_events(context, &mut aggregate)?;
        self.changes.lock().track(
            key,
            Tracked {
                aggregate,
                loaded_version,
                change,
            },
        );
        Ok(())
    }

    pub fn update(
        self: &Arc<Self>,
        context: &UnitOfWorkContext,
        mut aggregate: A,
    ) -> Result<(), RepositoryError> {
        self.attach(context)?;
        let key = aggregate.key();
        let previous = self
            .changes
            .lock()
            .tracked
            .get(&key)
            .map(|t| (t.change, t.loaded_version));
        let (change, loaded_version) = match previous {
            Some((Change::Removed, _)) => return Err(RepositoryError::NotFound(key.to_string())),
            Some((Change::Added, _)) => (Change::Added, 0),
            Some((_, loaded_version)) => (Change::Modified, loaded_version),
            None => {
                let stored = self
                    .store
                    .load(&key)?
                    .ok_or_else(|| RepositoryError::NotFound(key.to_string()))?;
                (Change::Modified, stored.version())
            }
        };
        publish_events(context, &mut aggregate)?;
        self.changes.lock().track(
            key,
            Tracked {
                aggregate,
                loaded_version,
                change,
            },
        );
        Ok(())
    }

    /// Mark an aggregate for deletion. Returns false if it does not exist.
    pub fn remove(
        self: &Arc<Self>,
        context: &UnitOfWorkContext,
        key: &A::Key,
    ) -> Result<bool, RepositoryError> {
        self.attach(context)?;
        let mut changes = self.changes.lock();
        match changes.tracked.get(key).map(|t| t.change) {
            Some(Change::Removed) => return Ok(false),
            Some(Change::Added) => {
                changes.forget(key);
                return Ok(true);
            }
            Some(Change::Unchanged | Change::Modified) => {
                if let Some(tracked) = changes.tracked.get_mut(key) {
                    tracked.change = Change::Removed;
                }
                return Ok(true);
            }
            None => {}
        }
        let Some(stored) = self.store.load(key)? else {
            return Ok(false);
        };
        changes.track(
            key.clone(),
            Tracked {
                loaded_version: stored.version(),
                aggregate: stored,
                change: Change::Removed,
            },
        );
        Ok(true)
    }

    fn attach(self: &Arc<Self>, context: &UnitOfWorkContext) -> Result<(), RepositoryError> {
        context.enlist(self.clone()).map_err(|err| match err {
            UnitOfWorkError::NoActiveContext => RepositoryError::NoActiveContext,
            other => RepositoryError::Unavailable(other.to_string()),
        })
    }

    fn write(&self, changes: ChangeSet<A>) -> Result<usize, RepositoryError> {
        let ChangeSet { mut tracked, order } = changes;
        let mut written = 0;
        for key in order {
            let Some(entry) = tracked.remove(&key) else {
                continue;
            };
            let mut aggregate = entry.aggregate;
            match entry.change {
                Change::Unchanged => continue,
                Change::Added => {
                    aggregate.set_version(1);
                    self.store.insert(&aggregate)?;
                }
                Change::Modified => {
                    aggregate.set_version(entry.loaded_version + 1);
                    self.store.update(&aggregate, entry.loaded_version)?;
                }
                Change::Removed => self.store.delete(&key, entry.loaded_version)?,
            }
            written += 1;
        }
        Ok(written)
    }
}

fn publish_events<A: Aggregate>(
    context: &UnitOfWorkContext,
    aggregate: &mut A,
) -> Result<(), RepositoryError> {
    let events = aggregate.take_events();
    if events.is_empty() {
        return Ok(());
    }
    let bus = context
        .event_bus()
        .map_err(|_| RepositoryError::NoActiveContext)?;
    for event in events {
        bus.publish(event)
            .map_err(|err| RepositoryError::Publish(err.to_string()))?;
    }
    Ok(())
}

impl<A: Aggregate> UnitOfWork for Repository<A> {
    fn name(&self) -> &str {
        &self.name
    }

    fn flush_group_id(&self) -> &str {
        &self.options.flush_group
    }

    fn can_be_flushed_asynchronously(&self) -> bool {
        self.options.asynchronous
    }

    fn requires_flush(&self) -> bool {
        self.pending_changes() > 0
    }

    fn flush(&self, context: &FlushContext) -> Result<(), BoxError> {
        let changes = std::mem::take(&mut *self.changes.lock());
        let written = self.write(changes)?;
        debug!(
            repository = %self.name,
            written,
            background = context.is_background(),
            "repository flushed"
        );
        Ok(())
    }
}
