//! Shared test utilities for integration tests

use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use tempfile::TempDir;
use unitary::{BoxError, EventEnvelope, FlushContext, UnitOfWork};

/// Global mutex to serialize environment variable access across all tests
static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Point XDG_CONFIG_HOME and HOME into `test_dir` while `f` runs, then restore them.
pub fn with_xdg_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let saved: Vec<_> = ["HOME", "XDG_CONFIG_HOME", "UNITARY_ENV"]
        .into_iter()
        .map(|key| (key, std::env::var(key).ok()))
        .collect();

    let home = test_dir.path().join("home");
    std::fs::create_dir_all(&home).unwrap();
    std::env::set_var("HOME", &home);
    std::env::set_var("XDG_CONFIG_HOME", test_dir.path());
    std::env::remove_var("UNITARY_ENV");

    let result = f();

    for (key, value) in saved {
        match value {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }
    }
    result
}

/// Unit of work that records where and how often it was flushed.
pub struct ProbeUnit {
    name: String,
    group: String,
    asynchronous: bool,
    pending: AtomicBool,
    fail: bool,
    pub flushes: AtomicUsize,
    pub threads: Mutex<Vec<ThreadId>>,
    pub background: AtomicUsize,
}

impl ProbeUnit {
    pub fn new(name: &str, group: &str, asynchronous: bool) -> Arc<Self> {
        Self::build(name, group, asynchronous, false)
    }

    pub fn failing(name: &str, asynchronous: bool) -> Arc<Self> {
        Self::build(name, "", asynchronous, true)
    }

    fn build(name: &str, group: &str, asynchronous: bool, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            group: group.to_string(),
            asynchronous,
            pending: AtomicBool::new(true),
            fail,
            flushes: AtomicUsize::new(0),
            threads: Mutex::new(Vec::new()),
            background: AtomicUsize::new(0),
        })
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.threads.lock().clone()
    }
}

impl UnitOfWork for ProbeUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn flush_group_id(&self) -> &str {
        &self.group
    }

    fn can_be_flushed_asynchronously(&self) -> bool {
        self.asynchronous
    }

    fn requires_flush(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    fn flush(&self, context: &FlushContext) -> Result<(), BoxError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.threads.lock().push(std::thread::current().id());
        if context.is_background() {
            self.background.fetch_add(1, Ordering::SeqCst);
        }
        self.pending.store(false, Ordering::SeqCst);
        if self.fail {
            return Err(format!("{} could not be written", self.name).into());
        }
        Ok(())
    }
}

pub fn event(event_type: &str) -> EventEnvelope {
    EventEnvelope::with_now(event_type, json!({}))
}
