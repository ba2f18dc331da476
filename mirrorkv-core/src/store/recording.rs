//! Call-journaling store decorator for tests, benches and diagnostics
//!
//! [`RecordingStore`] wraps any [`BackingStore`] and appends every call it
//! forwards to a shared journal. Lifecycle callbacks made through
//! [`RecordingHooks`] land in the same journal, so a test can assert the exact
//! interleaving of hooks and store calls. One-shot failures can be queued per
//! operation with [`RecordingStore::fail_next`].

use super::{BackingStore, TransactionHooks};
use crate::error::{StoreError, StoreResult};
use crate::value::{Delta, Value};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// One journaled call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: &'static str,
    pub args: Vec<String>,
}

impl StoreCall {
    pub fn new(op: &'static str, args: Vec<String>) -> Self {
        Self { op, args }
    }
}

impl fmt::Display for StoreCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Journal {
    calls: Mutex<Vec<StoreCall>>,
    failures: Mutex<Vec<(&'static str, StoreError)>>,
}

impl Journal {
    /// Journal a call, then fire a queued failure for `op` if one exists
    fn record(&self, op: &'static str, args: Vec<String>) -> StoreResult<()> {
        self.calls.lock().push(StoreCall::new(op, args));

        let mut failures = self.failures.lock();
        match failures.iter().position(|(failing, _)| *failing == op) {
            Some(index) => Err(failures.remove(index).1),
            None => Ok(()),
        }
    }
}

/// Decorator that journals calls before forwarding them
#[derive(Clone)]
pub struct RecordingStore<S> {
    inner: S,
    journal: Arc<Journal>,
}

impl<S> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            journal: Arc::new(Journal::default()),
        }
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Make the next call to `op` fail with `error` instead of being forwarded
    ///
    /// The call is still journaled. Queued failures for the same op fire in
    /// the order they were queued.
    pub fn fail_next(&self, op: &'static str, error: StoreError) {
        self.journal.failures.lock().push((op, error));
    }

    /// Every journaled call, oldest first
    pub fn calls(&self) -> Vec<StoreCall> {
        self.journal.calls.lock().clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<StoreCall> {
        self.journal
            .calls
            .lock()
            .iter()
            .filter(|call| call.op == op)
            .cloned()
            .collect()
    }

    pub fn count(&self, op: &str) -> usize {
        self.journal
            .calls
            .lock()
            .iter()
            .filter(|call| call.op == op)
            .count()
    }

    /// Operation names in call order
    pub fn ops(&self) -> Vec<&'static str> {
        self.journal.calls.lock().iter().map(|call| call.op).collect()
    }

    pub fn clear_calls(&self) {
        self.journal.calls.lock().clear();
    }

    /// Lifecycle hooks that journal into this store's journal
    pub fn hooks(&self) -> RecordingHooks {
        RecordingHooks {
            journal: Arc::clone(&self.journal),
        }
    }
}

fn render_entries(entries: &BTreeMap<String, Value>) -> Vec<String> {
    entries
        .iter()
        .map(|(key, value)| format!("{}={}", key, value.canonical()))
        .collect()
}

impl<S: BackingStore> BackingStore for RecordingStore<S> {
    fn init(&self) -> StoreResult<()> {
        self.journal.record("init", Vec::new())?;
        self.inner.init()
    }

    fn get(&self, key: &str) -> StoreResult<String> {
        self.journal.record("get", vec![key.to_string()])?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &Value) -> StoreResult<()> {
        self.journal
            .record("set", vec![key.to_string(), value.canonical()])?;
        self.inner.set(key, value)
    }

    fn mget(&self, keys: &[String]) -> StoreResult<HashMap<String, String>> {
        self.journal.record("mget", keys.to_vec())?;
        self.inner.mget(keys)
    }

    fn mset(&self, entries: &BTreeMap<String, Value>) -> StoreResult<()> {
        self.journal.record("mset", render_entries(entries))?;
        self.inner.mset(entries)
    }

    fn del(&self, key: &str) -> StoreResult<()> {
        self.journal.record("del", vec![key.to_string()])?;
        self.inner.del(key)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.journal.record("exists", vec![key.to_string()])?;
        self.inner.exists(key)
    }

    fn expire(&self, key: &str, ttl_seconds: u64) -> StoreResult<()> {
        self.journal
            .record("expire", vec![key.to_string(), ttl_seconds.to_string()])?;
        self.inner.expire(key, ttl_seconds)
    }

    fn incr(&self, key: &str, delta: Delta) -> StoreResult<String> {
        self.journal
            .record("incr", vec![key.to_string(), delta.canonical()])?;
        self.inner.incr(key, delta)
    }

    fn decr(&self, key: &str, delta: Delta) -> StoreResult<String> {
        self.journal
            .record("decr", vec![key.to_string(), delta.canonical()])?;
        self.inner.decr(key, delta)
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<String> {
        self.journal
            .record("hget", vec![key.to_string(), field.to_string()])?;
        self.inner.hget(key, field)
    }

    fn hset(&self, key: &str, field: &str, value: &Value) -> StoreResult<()> {
        self.journal.record(
            "hset",
            vec![key.to_string(), field.to_string(), value.canonical()],
        )?;
        self.inner.hset(key, field, value)
    }

    fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<HashMap<String, String>> {
        let mut args = vec![key.to_string()];
        args.extend(fields.iter().cloned());
        self.journal.record("hmget", args)?;
        self.inner.hmget(key, fields)
    }

    fn hmset(&self, key: &str, entries: &BTreeMap<String, Value>) -> StoreResult<()> {
        let mut args = vec![key.to_string()];
        args.extend(render_entries(entries));
        self.journal.record("hmset", args)?;
        self.inner.hmset(key, entries)
    }

    fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.journal.record("hgetall", vec![key.to_string()])?;
        self.inner.hgetall(key)
    }

    fn hdel(&self, key: &str, field: &str) -> StoreResult<()> {
        self.journal
            .record("hdel", vec![key.to_string(), field.to_string()])?;
        self.inner.hdel(key, field)
    }

    fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.journal
            .record("hexists", vec![key.to_string(), field.to_string()])?;
        self.inner.hexists(key, field)
    }

    fn hincr(&self, key: &str, field: &str, delta: Delta) -> StoreResult<String> {
        self.journal.record(
            "hincr",
            vec![key.to_string(), field.to_string(), delta.canonical()],
        )?;
        self.inner.hincr(key, field, delta)
    }

    fn hdecr(&self, key: &str, field: &str, delta: Delta) -> StoreResult<String> {
        self.journal.record(
            "hdecr",
            vec![key.to_string(), field.to_string(), delta.canonical()],
        )?;
        self.inner.hdecr(key, field, delta)
    }
}

/// Lifecycle hooks writing to a [`RecordingStore`] journal
#[derive(Clone)]
pub struct RecordingHooks {
    journal: Arc<Journal>,
}

impl TransactionHooks for RecordingHooks {
    fn before_create(&self) -> StoreResult<()> {
        self.journal.record("before_create", Vec::new())
    }

    fn after_create(&self) -> StoreResult<()> {
        self.journal.record("after_create", Vec::new())
    }

    fn before_commit(&self) -> StoreResult<()> {
        self.journal.record("before_commit", Vec::new())
    }

    fn after_commit(&self) -> StoreResult<()> {
        self.journal.record("after_commit", Vec::new())
    }

    fn before_rollback(&self) -> StoreResult<()> {
        self.journal.record("before_rollback", Vec::new())
    }

    fn after_rollback(&self) -> StoreResult<()> {
        self.journal.record("after_rollback", Vec::new())
    }
}
