//! Local mirror of backing store state
//!
//! The mirror holds three structures:
//! - a string mirror: key -> confirmed value or nil-flag
//! - a hash mirror: key -> field -> confirmed value or nil-flag
//! - tombstones: keys (and hash fields) deleted during this session
//!
//! A nil-flag records that the store confirmed a value is absent. A tombstone
//! records that this session deleted it. Both read as absent, and a tombstone
//! masks whatever the mirror holds until the key or field is written again.
//!
//! String and hash state never touch each other: deleting string key `k`
//! leaves any mirrored fields of hash `k` alone.

use std::collections::{HashMap, HashSet};

/// A mirrored slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorEntry {
    /// Value confirmed by the store or written by this session
    Value(String),
    /// The store confirmed no value exists
    Nil,
}

/// Outcome of a mirror lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Tombstoned in this session
    Deleted,
    /// Nil-flagged
    Nil,
    /// Confirmed value
    Value(String),
    /// Never looked up
    Unknown,
}

impl Resolution {
    /// Value as seen by a batched read, where absence reads as `""`
    pub fn batch_value(&self) -> Option<String> {
        match self {
            Resolution::Deleted | Resolution::Nil => Some(String::new()),
            Resolution::Value(value) => Some(value.clone()),
            Resolution::Unknown => None,
        }
    }
}

/// Address of a single mirrored slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Key(String),
    Field(String, String),
}

/// String mirror, hash mirror and tombstones for one coordinator
#[derive(Debug, Default)]
pub struct Mirror {
    strings: HashMap<String, MirrorEntry>,
    hashes: HashMap<String, HashMap<String, MirrorEntry>>,
    deleted_keys: HashSet<String>,
    deleted_fields: HashMap<String, HashSet<String>>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    // String keyspace

    pub fn lookup(&self, key: &str) -> Resolution {
        if self.deleted_keys.contains(key) {
            return Resolution::Deleted;
        }
        match self.strings.get(key) {
            Some(MirrorEntry::Value(value)) => Resolution::Value(value.clone()),
            Some(MirrorEntry::Nil) => Resolution::Nil,
            None => Resolution::Unknown,
        }
    }

    pub fn is_deleted(&self, key: &str) -> bool {
        self.deleted_keys.contains(key)
    }

    /// Mirror a value and clear any tombstone
    pub fn record_value(&mut self, key: &str, value: String) {
        self.deleted_keys.remove(key);
        self.strings
            .insert(key.to_string(), MirrorEntry::Value(value));
    }

    pub fn record_nil(&mut self, key: &str) {
        self.strings.insert(key.to_string(), MirrorEntry::Nil);
    }

    /// Drop the mirrored value and tombstone the key
    pub fn record_delete(&mut self, key: &str) {
        self.strings.remove(key);
        self.deleted_keys.insert(key.to_string());
    }

    /// Drop every trace of the key, so the next read goes to the store
    pub fn forget(&mut self, key: &str) {
        self.strings.remove(key);
        self.deleted_keys.remove(key);
    }

    // Hash keyspace

    pub fn lookup_field(&self, key: &str, field: &str) -> Resolution {
        if self.is_field_deleted(key, field) {
            return Resolution::Deleted;
        }
        match self.hashes.get(key).and_then(|fields| fields.get(field)) {
            Some(MirrorEntry::Value(value)) => Resolution::Value(value.clone()),
            Some(MirrorEntry::Nil) => Resolution::Nil,
            None => Resolution::Unknown,
        }
    }

    pub fn is_field_deleted(&self, key: &str, field: &str) -> bool {
        self.deleted_fields
            .get(key)
            .is_some_and(|fields| fields.contains(field))
    }

    pub fn record_field_value(&mut self, key: &str, field: &str, value: String) {
        self.clear_field_tombstone(key, field);
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), MirrorEntry::Value(value));
    }

    pub fn record_field_nil(&mut self, key: &str, field: &str) {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), MirrorEntry::Nil);
    }

    pub fn record_field_delete(&mut self, key: &str, field: &str) {
        self.remove_field(key, field);
        self.deleted_fields
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string());
    }

    pub fn forget_field(&mut self, key: &str, field: &str) {
        self.remove_field(key, field);
        self.clear_field_tombstone(key, field);
    }

    /// Whether the hash mirror holds at least one confirmed field for `key`
    pub fn has_confirmed_hash(&self, key: &str) -> bool {
        self.hashes.get(key).is_some_and(|fields| {
            fields
                .values()
                .any(|entry| matches!(entry, MirrorEntry::Value(_)))
        })
    }

    /// Merge a full-hash read from the store with session state
    ///
    /// Tombstoned fields are dropped and mirrored values win over the fetched
    /// ones. Fetched fields the mirror did not know, or had nil-flagged, are
    /// recorded when `write_back` is set.
    pub fn overlay_hash(
        &mut self,
        key: &str,
        fetched: HashMap<String, String>,
        write_back: bool,
    ) -> HashMap<String, String> {
        let mut merged = HashMap::with_capacity(fetched.len());
        let mut learned = Vec::new();

        for (field, value) in fetched {
            match self.lookup_field(key, &field) {
                Resolution::Deleted => {}
                Resolution::Value(mirrored) => {
                    merged.insert(field, mirrored);
                }
                Resolution::Nil | Resolution::Unknown => {
                    if write_back {
                        learned.push((field.clone(), value.clone()));
                    }
                    merged.insert(field, value);
                }
            }
        }

        // Fields written in this session that the store has not seen yet
        if let Some(fields) = self.hashes.get(key) {
            for (field, entry) in fields {
                if let MirrorEntry::Value(value) = entry {
                    merged
                        .entry(field.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }

        for (field, value) in learned {
            self.record_field_value(key, &field, value);
        }
        merged
    }

    // Shared

    /// Evict a slot entirely
    pub fn evict(&mut self, slot: &Slot) {
        match slot {
            Slot::Key(key) => self.forget(key),
            Slot::Field(key, field) => self.forget_field(key, field),
        }
    }

    /// Drop the string mirror, the hash mirror and all tombstones
    pub fn clear(&mut self) {
        self.strings.clear();
        self.hashes.clear();
        self.deleted_keys.clear();
        self.deleted_fields.clear();
    }

    /// Number of mirrored string keys (values and nil-flags)
    pub fn key_count(&self) -> usize {
        self.strings.len()
    }

    /// Number of mirrored hash fields across all keys
    pub fn field_count(&self) -> usize {
        self.hashes.values().map(HashMap::len).sum()
    }

    /// Number of tombstoned keys and fields
    pub fn tombstone_count(&self) -> usize {
        self.deleted_keys.len() + self.deleted_fields.values().map(HashSet::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.key_count() == 0 && self.field_count() == 0 && self.tombstone_count() == 0
    }

    fn remove_field(&mut self, key: &str, field: &str) {
        if let Some(fields) = self.hashes.get_mut(key) {
            fields.remove(field);
            if fields.is_empty() {
                self.hashes.remove(key);
            }
        }
    }

    fn clear_field_tombstone(&mut self, key: &str, field: &str) {
        if let Some(fields) = self.deleted_fields.get_mut(key) {
            fields.remove(field);
            if fields.is_empty() {
                self.deleted_fields.remove(key);
            }
        }
    }
}
