//! Write-through cache coordinator
//!
//! [`CacheCoordinator`] is the single entry point for callers. Reads consult
//! the [`Mirror`] first and only reach the backing store on a miss. Writes go
//! to the store and the mirror together, or, while a transaction is active,
//! into the transaction log and the mirror, with the store call deferred to
//! commit. Increments always reach the store immediately because the caller
//! needs the resulting value.
//!
//! A coordinator is meant to serve one session. Every mutating method takes
//! `&mut self`, and no internal locking is done.

use crate::config::MirrorConfig;
use crate::error::{CacheError, CacheResult, StoreError, StoreResult};
use crate::logging::SlowCallLogger;
use crate::mirror::{Mirror, Resolution, Slot};
use crate::store::{BackingStore, TransactionHooks};
use crate::transaction::{
    AppliedCommand, DeferredCommand, ReplayReport, Transaction, TransactionId,
};
use crate::value::{Delta, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Coordinator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Lookups answered by the mirror
    pub mirror_hits: u64,
    /// Lookups that had to reach the store
    pub mirror_misses: u64,
    pub store_calls: u64,
    /// Failed store calls, not counting "not found"
    pub store_errors: u64,
    pub slow_store_calls: u64,
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
}

impl CoordinatorStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.mirror_hits + self.mirror_misses;
        if total == 0 {
            0.0
        } else {
            self.mirror_hits as f64 / total as f64
        }
    }
}

/// Mirror and transaction log in front of a backing store
pub struct CacheCoordinator<S: BackingStore> {
    store: S,
    config: MirrorConfig,
    mirror: Mirror,
    /// Current or most recently finished transaction
    tx: Option<Transaction>,
    next_tx_id: TransactionId,
    hooks: Option<Box<dyn TransactionHooks>>,
    stats: CoordinatorStats,
    slow_calls: SlowCallLogger,
}

/// The transaction in `slot`, if it is still active
fn active_mut(slot: &mut Option<Transaction>) -> Option<&mut Transaction> {
    slot.as_mut().filter(|tx| tx.is_active())
}

/// Map a batched read failure; batched reads never report "not found"
fn batch_error(op: &str, err: StoreError) -> CacheError {
    if err.is_not_found() {
        CacheError::internal(format!("{} reported a missing value", op), err)
    } else {
        CacheError::Store(err)
    }
}

impl<S: BackingStore> CacheCoordinator<S> {
    /// Create a coordinator with default configuration
    pub fn new(store: S) -> Self {
        Self::with_config(store, MirrorConfig::default())
    }

    pub fn with_config(store: S, config: MirrorConfig) -> Self {
        let slow_calls = SlowCallLogger::from_settings(&config.logging);
        Self {
            store,
            config,
            mirror: Mirror::new(),
            tx: None,
            next_tx_id: 1,
            hooks: None,
            stats: CoordinatorStats::default(),
            slow_calls,
        }
    }

    /// Attach transaction lifecycle hooks
    pub fn with_hooks(mut self, hooks: impl TransactionHooks + 'static) -> Self {
        self.hooks = Some(Box::new(hooks));
        self
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn slow_calls(&self) -> &SlowCallLogger {
        &self.slow_calls
    }

    /// The active transaction, or the last one to finish
    pub fn transaction(&self) -> Option<&Transaction> {
        self.tx.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.as_ref().is_some_and(Transaction::is_active)
    }

    /// Prepare the backing store
    pub fn init(&mut self) -> CacheResult<()> {
        self.call("init", |store| store.init())
            .map_err(CacheError::Store)
    }

    /// Drop all mirror state; the store and any active transaction are untouched
    pub fn flush_memory(&mut self) {
        self.mirror.clear();
        debug!("mirror flushed");
    }

    // Keys

    pub fn get(&mut self, key: &str) -> CacheResult<String> {
        match self.mirror.lookup(key) {
            Resolution::Value(value) => {
                self.stats.mirror_hits += 1;
                return Ok(value);
            }
            Resolution::Deleted | Resolution::Nil => {
                self.stats.mirror_hits += 1;
                debug!(key, "mirror reports absent");
                return Err(CacheError::ValueNil);
            }
            Resolution::Unknown => self.stats.mirror_misses += 1,
        }

        match self.call("get", |store| store.get(key)) {
            Ok(value) => {
                self.mirror.record_value(key, value.clone());
                Ok(value)
            }
            Err(StoreError::NotFound) => {
                if self.config.cache.negative_caching {
                    self.mirror.record_nil(key);
                }
                Err(CacheError::ValueNil)
            }
            Err(err) => Err(CacheError::Store(err)),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> CacheResult<()> {
        let value = value.into();
        let canonical = value.canonical();

        if let Some(tx) = active_mut(&mut self.tx) {
            tx.defer(DeferredCommand::Set {
                key: key.to_string(),
                value,
            })?;
        } else {
            self.call("set", |store| store.set(key, &value))
                .map_err(CacheError::Store)?;
        }

        self.mirror.record_value(key, canonical);
        Ok(())
    }

    /// Read many keys with one store round-trip for the unresolved ones
    ///
    /// Absent keys map to `""`.
    pub fn mget<K: AsRef<str>>(&mut self, keys: &[K]) -> CacheResult<HashMap<String, String>> {
        let mut result = HashMap::with_capacity(keys.len());
        let mut pending = Vec::new();
        let mut seen = HashSet::new();

        for key in keys {
            let key = key.as_ref();
            match self.mirror.lookup(key).batch_value() {
                Some(value) => {
                    self.stats.mirror_hits += 1;
                    result.insert(key.to_string(), value);
                }
                None => {
                    if seen.insert(key) {
                        self.stats.mirror_misses += 1;
                        pending.push(key.to_string());
                    }
                }
            }
        }

        if pending.is_empty() {
            return Ok(result);
        }

        let mut fetched = self
            .call("mget", |store| store.mget(&pending))
            .map_err(|e| batch_error("mget", e))?;

        for key in pending {
            let value = fetched.remove(&key).unwrap_or_default();
            if self.config.cache.mirror_batch_reads && !value.is_empty() {
                self.mirror.record_value(&key, value.clone());
            }
            result.insert(key, value);
        }
        Ok(result)
    }

    pub fn mset<K, V>(&mut self, entries: impl IntoIterator<Item = (K, V)>) -> CacheResult<()>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let entries: BTreeMap<String, Value> = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        if entries.is_empty() {
            return Ok(());
        }

        if let Some(tx) = active_mut(&mut self.tx) {
            tx.defer(DeferredCommand::MSet {
                entries: entries.clone(),
            })?;
        } else {
            self.call("mset", |store| store.mset(&entries))
                .map_err(CacheError::Store)?;
        }

        for (key, value) in &entries {
            self.mirror.record_value(key, value.canonical());
        }
        Ok(())
    }

    pub fn del(&mut self, key: &str) -> CacheResult<()> {
        if let Some(tx) = active_mut(&mut self.tx) {
            tx.defer(DeferredCommand::Del {
                key: key.to_string(),
            })?;
        } else {
            self.call("del", |store| store.del(key))
                .map_err(CacheError::Store)?;
        }

        self.mirror.record_delete(key);
        Ok(())
    }

    pub fn exists(&mut self, key: &str) -> CacheResult<bool> {
        let known = match self.mirror.lookup(key) {
            Resolution::Deleted | Resolution::Nil => Some(false),
            Resolution::Value(_) => Some(true),
            Resolution::Unknown if self.mirror.has_confirmed_hash(key) => Some(true),
            Resolution::Unknown => None,
        };
        if let Some(exists) = known {
            self.stats.mirror_hits += 1;
            return Ok(exists);
        }

        self.stats.mirror_misses += 1;
        self.call("exists", |store| store.exists(key))
            .map_err(CacheError::Store)
    }

    /// Set a time to live; the mirror does not track expiry
    pub fn expire(&mut self, key: &str, ttl_seconds: u64) -> CacheResult<()> {
        if let Some(tx) = active_mut(&mut self.tx) {
            tx.defer(DeferredCommand::Expire {
                key: key.to_string(),
                ttl_seconds,
            })?;
            return Ok(());
        }

        self.call("expire", |store| store.expire(key, ttl_seconds))
            .map_err(CacheError::Store)
    }

    pub fn incr(&mut self, key: &str, delta: impl Into<Delta>) -> CacheResult<String> {
        self.apply_eager(AppliedCommand::Incr {
            key: key.to_string(),
            delta: delta.into(),
        })
    }

    pub fn decr(&mut self, key: &str, delta: impl Into<Delta>) -> CacheResult<String> {
        self.apply_eager(AppliedCommand::Decr {
            key: key.to_string(),
            delta: delta.into(),
        })
    }

    // Hashes

    pub fn hget(&mut self, key: &str, field: &str) -> CacheResult<String> {
        match self.mirror.lookup_field(key, field) {
            Resolution::Value(value) => {
                self.stats.mirror_hits += 1;
                return Ok(value);
            }
            Resolution::Deleted | Resolution::Nil => {
                self.stats.mirror_hits += 1;
                debug!(key, field, "mirror reports absent field");
                return Err(CacheError::ValueNil);
            }
            Resolution::Unknown => self.stats.mirror_misses += 1,
        }

        match self.call("hget", |store| store.hget(key, field)) {
            Ok(value) => {
                self.mirror.record_field_value(key, field, value.clone());
                Ok(value)
            }
            Err(StoreError::NotFound) => {
                if self.config.cache.negative_caching {
                    self.mirror.record_field_nil(key, field);
                }
                Err(CacheError::ValueNil)
            }
            Err(err) => Err(CacheError::Store(err)),
        }
    }

    pub fn hset(&mut self, key: &str, field: &str, value: impl Into<Value>) -> CacheResult<()> {
        let value = value.into();
        let canonical = value.canonical();

        if let Some(tx) = active_mut(&mut self.tx) {
            tx.defer(DeferredCommand::HSet {
                key: key.to_string(),
                field: field.to_string(),
                value,
            })?;
        } else {
            self.call("hset", |store| store.hset(key, field, &value))
                .map_err(CacheError::Store)?;
        }

        self.mirror.record_field_value(key, field, canonical);
        Ok(())
    }

    /// Read many fields of one hash, like [`CacheCoordinator::mget`]
    pub fn hmget<F: AsRef<str>>(
        &mut self,
        key: &str,
        fields: &[F],
    ) -> CacheResult<HashMap<String, String>> {
        let mut result = HashMap::with_capacity(fields.len());
        let mut pending = Vec::new();
        let mut seen = HashSet::new();

        for field in fields {
            let field = field.as_ref();
            match self.mirror.lookup_field(key, field).batch_value() {
                Some(value) => {
                    self.stats.mirror_hits += 1;
                    result.insert(field.to_string(), value);
                }
                None => {
                    if seen.insert(field) {
                        self.stats.mirror_misses += 1;
                        pending.push(field.to_string());
                    }
                }
            }
        }

        if pending.is_empty() {
            return Ok(result);
        }

        let mut fetched = self
            .call("hmget", |store| store.hmget(key, &pending))
            .map_err(|e| batch_error("hmget", e))?;

        for field in pending {
            let value = fetched.remove(&field).unwrap_or_default();
            if self.config.cache.mirror_batch_reads && !value.is_empty() {
                self.mirror.record_field_value(key, &field, value.clone());
            }
            result.insert(field, value);
        }
        Ok(result)
    }

    pub fn hmset<F, V>(
        &mut self,
        key: &str,
        entries: impl IntoIterator<Item = (F, V)>,
    ) -> CacheResult<()>
    where
        F: Into<String>,
        V: Into<Value>,
    {
        let entries: BTreeMap<String, Value> = entries
            .into_iter()
            .map(|(field, value)| (field.into(), value.into()))
            .collect();
        if entries.is_empty() {
            return Ok(());
        }

        if let Some(tx) = active_mut(&mut self.tx) {
            tx.defer(DeferredCommand::HMSet {
                key: key.to_string(),
                entries: entries.clone(),
            })?;
        } else {
            self.call("hmset", |store| store.hmset(key, &entries))
                .map_err(CacheError::Store)?;
        }

        for (field, value) in &entries {
            self.mirror.record_field_value(key, field, value.canonical());
        }
        Ok(())
    }

    /// All fields of a hash as this session sees them
    ///
    /// Always one store call. Fields deleted in this session are hidden and
    /// fields written in this session win over the store.
    pub fn hgetall(&mut self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.stats.mirror_misses += 1;
        let fetched = self
            .call("hgetall", |store| store.hgetall(key))
            .map_err(|e| batch_error("hgetall", e))?;

        let write_back = self.config.cache.mirror_batch_reads;
        Ok(self.mirror.overlay_hash(key, fetched, write_back))
    }

    pub fn hdel(&mut self, key: &str, field: &str) -> CacheResult<()> {
        if let Some(tx) = active_mut(&mut self.tx) {
            tx.defer(DeferredCommand::HDel {
                key: key.to_string(),
                field: field.to_string(),
            })?;
        } else {
            self.call("hdel", |store| store.hdel(key, field))
                .map_err(CacheError::Store)?;
        }

        self.mirror.record_field_delete(key, field);
        Ok(())
    }

    pub fn hexists(&mut self, key: &str, field: &str) -> CacheResult<bool> {
        let known = match self.mirror.lookup_field(key, field) {
            Resolution::Deleted | Resolution::Nil => Some(false),
            Resolution::Value(_) => Some(true),
            Resolution::Unknown => None,
        };
        if let Some(exists) = known {
            self.stats.mirror_hits += 1;
            return Ok(exists);
        }

        self.stats.mirror_misses += 1;
        self.call("hexists", |store| store.hexists(key, field))
            .map_err(CacheError::Store)
    }

    pub fn hincr(&mut self, key: &str, field: &str, delta: impl Into<Delta>) -> CacheResult<String> {
        self.apply_eager(AppliedCommand::HIncr {
            key: key.to_string(),
            field: field.to_string(),
            delta: delta.into(),
        })
    }

    pub fn hdecr(&mut self, key: &str, field: &str, delta: impl Into<Delta>) -> CacheResult<String> {
        self.apply_eager(AppliedCommand::HDecr {
            key: key.to_string(),
            field: field.to_string(),
            delta: delta.into(),
        })
    }

    // Transactions

    /// Start a transaction, or return the one already active
    pub fn begin_transaction(&mut self) -> CacheResult<&Transaction> {
        if !self.in_transaction() {
            let transaction = Transaction::begin(
                self.next_tx_id,
                self.config.transaction.max_log_entries,
                self.hooks.as_deref(),
            )?;
            self.next_tx_id += 1;
            self.tx = Some(transaction);
        }

        self.tx.as_ref().ok_or(CacheError::NoActiveTransaction)
    }

    /// Replay deferred commands and end the active transaction
    ///
    /// If any replayed command fails the transaction still ends, the mirror
    /// state of the failed and unsent commands is evicted, and
    /// [`CacheError::ReplayIncomplete`] carries the report.
    pub fn commit(&mut self) -> CacheResult<ReplayReport> {
        let tx = active_mut(&mut self.tx).ok_or(CacheError::NoActiveTransaction)?;
        let mixed = tx.mixed_slots();
        let report = tx.commit(
            &self.store,
            self.hooks.as_deref(),
            self.config.transaction.replay_policy,
        )?;

        self.stats.transactions_committed += 1;
        self.count_replay(&report);

        for slot in &mixed {
            self.mirror.evict(slot);
        }
        for failure in &report.failures {
            self.evict_all(failure.record.entry.slots());
        }
        for record in &report.untouched {
            self.evict_all(record.entry.slots());
        }

        report.into_result()
    }

    /// Compensate applied commands and end the active transaction
    ///
    /// Compensated slots take the value the store returned. Failed
    /// compensations are evicted, as are slots written by discarded deferred
    /// commands when `revert_mirror_on_rollback` is set.
    pub fn rollback(&mut self) -> CacheResult<ReplayReport> {
        let tx = active_mut(&mut self.tx).ok_or(CacheError::NoActiveTransaction)?;
        let report = tx.rollback(&self.store, self.hooks.as_deref())?;

        self.stats.transactions_rolled_back += 1;
        self.count_replay(&report);

        for compensation in &report.compensations {
            match compensation.command.slot() {
                Slot::Key(key) => self.mirror.record_value(&key, compensation.value.clone()),
                Slot::Field(key, field) => {
                    self.mirror
                        .record_field_value(&key, &field, compensation.value.clone())
                }
            }
        }
        for failure in &report.failures {
            self.evict_all(failure.record.entry.slots());
        }
        if self.config.transaction.revert_mirror_on_rollback {
            for record in &report.untouched {
                self.evict_all(record.entry.slots());
            }
        }

        report.into_result()
    }

    fn apply_eager(&mut self, command: AppliedCommand) -> CacheResult<String> {
        if let Some(tx) = active_mut(&mut self.tx) {
            tx.ensure_capacity()?;
        }

        let value = self
            .call(command.op(), |store| command.apply(store))
            .map_err(CacheError::Store)?;

        match command.slot() {
            Slot::Key(key) => self.mirror.record_value(&key, value.clone()),
            Slot::Field(key, field) => self.mirror.record_field_value(&key, &field, value.clone()),
        }
        if let Some(tx) = active_mut(&mut self.tx) {
            tx.record_applied(command)?;
        }
        Ok(value)
    }

    fn evict_all(&mut self, slots: Vec<Slot>) {
        for slot in &slots {
            debug!(?slot, "evicting mirror slot");
            self.mirror.evict(slot);
        }
    }

    fn count_replay(&mut self, report: &ReplayReport) {
        let failed = report.failures.len() as u64;
        self.stats.store_calls += report.replayed as u64 + failed;
        self.stats.store_errors += failed;
    }

    /// Run one store call with timing and counters
    fn call<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&S) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let tracker = self.slow_calls.start_call(op);
        let result = f(&self.store);

        self.stats.store_calls += 1;
        if self.slow_calls.finish_call(tracker) {
            self.stats.slow_store_calls += 1;
        }
        match &result {
            Err(err) if !err.is_not_found() => {
                self.stats.store_errors += 1;
                debug!(op, error = %err, "store call failed");
            }
            _ => debug!(op, "store call"),
        }
        result
    }
}
