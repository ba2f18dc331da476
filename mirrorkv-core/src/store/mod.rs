//! Backing store contract consumed by the cache coordinator
//!
//! The coordinator never speaks a wire protocol itself. Anything that can
//! answer the calls below (a Redis adapter, an RPC client, the in-process
//! [`MemoryStore`]) can sit behind it.
//!
//! Batched reads (`mget`, `hmget`) return an entry for every requested key or
//! field, with `""` standing in for a missing one. Single reads report a
//! missing key or field as [`StoreError::NotFound`].

pub mod expiry;
pub mod memory;
pub mod recording;

pub use expiry::ExpiryIndex;
pub use memory::MemoryStore;
pub use recording::{RecordingHooks, RecordingStore, StoreCall};

use crate::error::StoreResult;
use crate::value::{Delta, Value};
use std::collections::{BTreeMap, HashMap};

/// Authoritative key/hash store behind the coordinator
pub trait BackingStore {
    /// Prepare the store for use (connect, ping, ...)
    fn init(&self) -> StoreResult<()> {
        Ok(())
    }

    // Keys

    fn get(&self, key: &str) -> StoreResult<String>;

    fn set(&self, key: &str, value: &Value) -> StoreResult<()>;

    fn mget(&self, keys: &[String]) -> StoreResult<HashMap<String, String>>;

    fn mset(&self, entries: &BTreeMap<String, Value>) -> StoreResult<()>;

    fn del(&self, key: &str) -> StoreResult<()>;

    fn exists(&self, key: &str) -> StoreResult<bool>;

    fn expire(&self, key: &str, ttl_seconds: u64) -> StoreResult<()>;

    /// Increment and return the new value
    fn incr(&self, key: &str, delta: Delta) -> StoreResult<String>;

    /// Decrement and return the new value
    fn decr(&self, key: &str, delta: Delta) -> StoreResult<String>;

    // Hashes

    fn hget(&self, key: &str, field: &str) -> StoreResult<String>;

    fn hset(&self, key: &str, field: &str, value: &Value) -> StoreResult<()>;

    fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<HashMap<String, String>>;

    fn hmset(&self, key: &str, entries: &BTreeMap<String, Value>) -> StoreResult<()>;

    /// All fields of a hash; empty when the key does not exist
    fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    fn hdel(&self, key: &str, field: &str) -> StoreResult<()>;

    fn hexists(&self, key: &str, field: &str) -> StoreResult<bool>;

    fn hincr(&self, key: &str, field: &str, delta: Delta) -> StoreResult<String>;

    fn hdecr(&self, key: &str, field: &str, delta: Delta) -> StoreResult<String>;
}

/// Optional transaction lifecycle callbacks
///
/// Supplied once when the coordinator is built. Every callback defaults to a
/// no-op, so implementors only override the points they care about. A failing
/// `before_*` callback aborts the lifecycle step; a failing `after_*` callback
/// is logged and ignored.
pub trait TransactionHooks {
    fn before_create(&self) -> StoreResult<()> {
        Ok(())
    }

    fn after_create(&self) -> StoreResult<()> {
        Ok(())
    }

    fn before_commit(&self) -> StoreResult<()> {
        Ok(())
    }

    fn after_commit(&self) -> StoreResult<()> {
        Ok(())
    }

    fn before_rollback(&self) -> StoreResult<()> {
        Ok(())
    }

    fn after_rollback(&self) -> StoreResult<()> {
        Ok(())
    }
}
