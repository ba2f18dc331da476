//! In-process backing store using DashMap
//!
//! Strings and hashes share one keyspace, the way Redis does. Operating on a
//! key that holds the other kind fails with [`StoreError::WrongType`].

use super::expiry::ExpiryIndex;
use super::BackingStore;
use crate::error::{StoreError, StoreResult};
use crate::value::{Delta, Value};
use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Stored {
    Text(String),
    Hash(BTreeMap<String, String>),
}

/// Thread-safe store shared by every clone
#[derive(Clone, Default)]
pub struct MemoryStore {
    map: Arc<DashMap<String, Stored>>,
    expiry: Arc<ExpiryIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.purge_expired();
        let mut keys: Vec<String> = self.map.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Remaining time to live in whole seconds, `None` when the key has no deadline
    pub fn ttl(&self, key: &str) -> Option<i64> {
        self.purge_expired();
        self.expiry
            .deadline(key)
            .map(|deadline| (deadline - Utc::now()).num_seconds().max(0))
    }

    /// Drop every key
    pub fn clear(&self) {
        self.map.clear();
        self.expiry.clear();
    }

    fn purge_expired(&self) {
        for key in self.expiry.take_expired(Utc::now()) {
            self.map.remove(&key);
        }
    }

    fn write_text(&self, key: &str, value: String) {
        self.map.insert(key.to_string(), Stored::Text(value));
        self.expiry.disarm(key);
    }

    fn remove_key(&self, key: &str) {
        self.map.remove(key);
        self.expiry.disarm(key);
    }

    fn apply_delta(&self, key: &str, delta: Delta, negate: bool) -> StoreResult<String> {
        self.purge_expired();
        match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => match occupied.get_mut() {
                Stored::Text(current) => {
                    let next = step(key, current, delta, negate)?;
                    *current = next.clone();
                    Ok(next)
                }
                Stored::Hash(_) => Err(StoreError::WrongType(key.to_string())),
            },
            Entry::Vacant(vacant) => {
                let next = step(key, "0", delta, negate)?;
                vacant.insert(Stored::Text(next.clone()));
                Ok(next)
            }
        }
    }

    fn apply_field_delta(
        &self,
        key: &str,
        field: &str,
        delta: Delta,
        negate: bool,
    ) -> StoreResult<String> {
        self.purge_expired();
        match self.map.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => match occupied.get_mut() {
                Stored::Hash(fields) => {
                    let current = fields.get(field).map(String::as_str).unwrap_or("0");
                    let next = step(key, current, delta, negate)?;
                    fields.insert(field.to_string(), next.clone());
                    Ok(next)
                }
                Stored::Text(_) => Err(StoreError::WrongType(key.to_string())),
            },
            Entry::Vacant(vacant) => {
                let next = step(key, "0", delta, negate)?;
                let mut fields = BTreeMap::new();
                fields.insert(field.to_string(), next.clone());
                vacant.insert(Stored::Hash(fields));
                Ok(next)
            }
        }
    }
}

/// Add (or subtract) a delta from a stored numeric string
fn step(key: &str, current: &str, delta: Delta, negate: bool) -> StoreResult<String> {
    match delta {
        Delta::Integer(by) => {
            let base: i64 = current.trim().parse().map_err(|_| StoreError::NotANumber {
                key: key.to_string(),
                expected: "integer",
            })?;
            let result = if negate {
                base.checked_sub(by)
            } else {
                base.checked_add(by)
            };
            result
                .map(|n| n.to_string())
                .ok_or_else(|| StoreError::Overflow(key.to_string()))
        }
        Delta::Float(by) => {
            let base: f64 = current.trim().parse().map_err(|_| StoreError::NotANumber {
                key: key.to_string(),
                expected: "float",
            })?;
            let result = if negate { base - by } else { base + by };
            if !result.is_finite() {
                return Err(StoreError::Overflow(key.to_string()));
            }
            Ok(format!("{}", result))
        }
    }
}

impl BackingStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<String> {
        self.purge_expired();
        match self.map.get(key).as_deref() {
            Some(Stored::Text(value)) => Ok(value.clone()),
            Some(Stored::Hash(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Err(StoreError::NotFound),
        }
    }

    fn set(&self, key: &str, value: &Value) -> StoreResult<()> {
        self.purge_expired();
        self.write_text(key, value.canonical());
        Ok(())
    }

    fn mget(&self, keys: &[String]) -> StoreResult<HashMap<String, String>> {
        self.purge_expired();
        let mut result = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = match self.map.get(key.as_str()).as_deref() {
                Some(Stored::Text(value)) => value.clone(),
                _ => String::new(),
            };
            result.insert(key.clone(), value);
        }
        Ok(result)
    }

    fn mset(&self, entries: &BTreeMap<String, Value>) -> StoreResult<()> {
        self.purge_expired();
        for (key, value) in entries {
            self.write_text(key, value.canonical());
        }
        Ok(())
    }

    fn del(&self, key: &str) -> StoreResult<()> {
        self.purge_expired();
        self.remove_key(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.purge_expired();
        Ok(self.map.contains_key(key))
    }

    fn expire(&self, key: &str, ttl_seconds: u64) -> StoreResult<()> {
        self.purge_expired();
        if !self.map.contains_key(key) {
            return Ok(());
        }
        if ttl_seconds == 0 {
            self.remove_key(key);
            return Ok(());
        }

        let deadline = i64::try_from(ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        match deadline {
            Some(deadline) => self.expiry.arm(key, deadline),
            // Beyond the representable range: never expires
            None => self.expiry.disarm(key),
        }
        Ok(())
    }

    fn incr(&self, key: &str, delta: Delta) -> StoreResult<String> {
        self.apply_delta(key, delta, false)
    }

    fn decr(&self, key: &str, delta: Delta) -> StoreResult<String> {
        self.apply_delta(key, delta, true)
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<String> {
        self.purge_expired();
        match self.map.get(key).as_deref() {
            Some(Stored::Hash(fields)) => fields.get(field).cloned().ok_or(StoreError::NotFound),
            Some(Stored::Text(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Err(StoreError::NotFound),
        }
    }

    fn hset(&self, key: &str, field: &str, value: &Value) -> StoreResult<()> {
        let mut entries = BTreeMap::new();
        entries.insert(field.to_string(), value.clone());
        self.hmset(key, &entries)
    }

    fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<HashMap<String, String>> {
        self.purge_expired();
        let guard = self.map.get(key);
        let stored = match guard.as_deref() {
            Some(Stored::Hash(stored)) => Some(stored),
            Some(Stored::Text(_)) => return Err(StoreError::WrongType(key.to_string())),
            None => None,
        };

        Ok(fields
            .iter()
            .map(|field| {
                let value = stored
                    .and_then(|stored| stored.get(field))
                    .cloned()
                    .unwrap_or_default();
                (field.clone(), value)
            })
            .collect())
    }

    fn hmset(&self, key: &str, entries: &BTreeMap<String, Value>) -> StoreResult<()> {
        self.purge_expired();
        if entries.is_empty() {
            return Ok(());
        }
        let mut entry = self
            .map
            .entry(key.to_string())
            .or_insert_with(|| Stored::Hash(BTreeMap::new()));
        match entry.value_mut() {
            Stored::Hash(fields) => {
                for (field, value) in entries {
                    fields.insert(field.clone(), value.canonical());
                }
                Ok(())
            }
            Stored::Text(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.purge_expired();
        match self.map.get(key).as_deref() {
            Some(Stored::Hash(fields)) => Ok(fields
                .iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()),
            Some(Stored::Text(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(HashMap::new()),
        }
    }

    fn hdel(&self, key: &str, field: &str) -> StoreResult<()> {
        self.purge_expired();
        let emptied = match self.map.get_mut(key) {
            Some(mut entry) => match entry.value_mut() {
                Stored::Hash(fields) => {
                    fields.remove(field);
                    fields.is_empty()
                }
                Stored::Text(_) => return Err(StoreError::WrongType(key.to_string())),
            },
            None => false,
        };

        // A hash with no fields left no longer exists
        if emptied {
            self.map
                .remove_if(key, |_, stored| matches!(stored, Stored::Hash(f) if f.is_empty()));
            self.expiry.disarm(key);
        }
        Ok(())
    }

    fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.purge_expired();
        match self.map.get(key).as_deref() {
            Some(Stored::Hash(fields)) => Ok(fields.contains_key(field)),
            Some(Stored::Text(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(false),
        }
    }

    fn hincr(&self, key: &str, field: &str, delta: Delta) -> StoreResult<String> {
        self.apply_field_delta(key, field, delta, false)
    }

    fn hdecr(&self, key: &str, field: &str, delta: Delta) -> StoreResult<String> {
        self.apply_field_delta(key, field, delta, true)
    }
}
