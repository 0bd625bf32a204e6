//! Scope-specific dependency cache.

use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type Eviction = Box<dyn FnOnce() + Send>;

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    on_evict: Option<Eviction>,
}

/// Cache slot: the value's type plus a caller-chosen name.
type CacheKey = (TypeId, String);

/// Type-keyed cache owned by a unit-of-work context.
///
/// Entries are keyed by type and an optional name, so several values of one type can live side
/// by side. Values live until the owning context is disposed. Eviction callbacks run when an
/// entry is removed or the cache is disposed.
#[derive(Default)]
pub struct DependencyCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    disposed: Mutex<bool>,
}

fn slot<T: Any>(name: &str) -> CacheKey {
    (TypeId::of::<T>(), name.to_string())
}

impl DependencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.get_named::<T>("")
    }

    pub fn get_named<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let entries = self.entries.lock();
        entries
            .get(&slot::<T>(name))
            .and_then(|entry| entry.value.clone().downcast::<T>().ok())
    }

    /// Return the cached value of type `T`, creating it with `create` if absent.
    pub fn get_or_insert_with<T, F>(&self, create: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        self.get_or_insert_named("", create)
    }

    /// Return the value of type `T` cached under `name`, creating it with `create` if absent.
    ///
    /// `create` runs without the cache lock held. If another thread fills the slot first, its
    /// value wins and the freshly created one is dropped.
    pub fn get_or_insert_named<T, F>(&self, name: &str, create: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get_named::<T>(name) {
            return existing;
        }
        let created = Arc::new(create());
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(slot::<T>(name))
            .or_insert_with(|| CacheEntry {
                value: created.clone(),
                on_evict: None,
            });
        entry.value.clone().downcast::<T>().unwrap_or(created)
    }

    /// Insert a value with a callback that runs when the entry is evicted.
    pub fn insert_with_eviction<T, F>(&self, value: T, on_evict: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() + Send + 'static,
    {
        let value = Arc::new(value);
        let replaced = self.entries.lock().insert(
            slot::<T>(""),
            CacheEntry {
                value: value.clone(),
                on_evict: Some(Box::new(on_evict)),
            },
        );
        if let Some(CacheEntry {
            on_evict: Some(on_evict),
            ..
        }) = replaced
        {
            on_evict();
        }
        value
    }

    pub fn remove<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let entry = self.entries.lock().remove(&slot::<T>(""))?;
        if let Some(on_evict) = entry.on_evict {
            on_evict();
        }
        entry.value.downcast::<T>().ok()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.lock()
    }

    /// Evict every entry. Idempotent.
    pub fn dispose(&self) {
        {
            let mut disposed = self.disposed.lock();
            if *disposed {
                return;
            }
            *disposed = true;
        }
        let entries: Vec<CacheEntry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        debug!(entries = entries.len(), "disposing dependency cache");
        for entry in entries {
            if let Some(on_evict) = entry.on_evict {
                on_evict();
            }
        }
    }
}
