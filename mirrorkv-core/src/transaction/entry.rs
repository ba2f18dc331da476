//! Transaction log records and commands

use crate::error::StoreResult;
use crate::mirror::Slot;
use crate::store::BackingStore;
use crate::value::{Delta, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Log record for a single mutation made inside a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position in the transaction log, starting at 1
    pub sequence: u64,
    /// When the mutation was recorded
    pub recorded_at: DateTime<Utc>,
    pub entry: LogEntry,
}

impl LogRecord {
    pub fn new(sequence: u64, entry: LogEntry) -> Self {
        Self {
            sequence,
            recorded_at: Utc::now(),
            entry,
        }
    }
}

/// A deferred command, or an eager one already applied to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    /// Not yet sent; replayed at commit, discarded at rollback
    Deferred(DeferredCommand),
    /// Already sent; its inverse is issued at rollback
    Applied(AppliedCommand),
}

impl LogEntry {
    pub fn is_deferred(&self) -> bool {
        matches!(self, LogEntry::Deferred(_))
    }

    pub fn description(&self) -> String {
        match self {
            LogEntry::Deferred(command) => command.description(),
            LogEntry::Applied(command) => command.description(),
        }
    }

    /// Mirror slots this entry writes
    pub fn slots(&self) -> Vec<Slot> {
        match self {
            LogEntry::Deferred(command) => command.slots(),
            LogEntry::Applied(command) => vec![command.slot()],
        }
    }
}

/// Mutations held back until commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeferredCommand {
    Set {
        key: String,
        value: Value,
    },
    Del {
        key: String,
    },
    Expire {
        key: String,
        ttl_seconds: u64,
    },
    MSet {
        entries: BTreeMap<String, Value>,
    },
    HSet {
        key: String,
        field: String,
        value: Value,
    },
    HMSet {
        key: String,
        entries: BTreeMap<String, Value>,
    },
    HDel {
        key: String,
        field: String,
    },
}

impl DeferredCommand {
    /// Send the command to the store
    pub fn apply<S: BackingStore + ?Sized>(&self, store: &S) -> StoreResult<()> {
        match self {
            DeferredCommand::Set { key, value } => store.set(key, value),
            DeferredCommand::Del { key } => store.del(key),
            DeferredCommand::Expire { key, ttl_seconds } => store.expire(key, *ttl_seconds),
            DeferredCommand::MSet { entries } => store.mset(entries),
            DeferredCommand::HSet { key, field, value } => store.hset(key, field, value),
            DeferredCommand::HMSet { key, entries } => store.hmset(key, entries),
            DeferredCommand::HDel { key, field } => store.hdel(key, field),
        }
    }

    pub fn description(&self) -> String {
        match self {
            DeferredCommand::Set { key, .. } => format!("Set {}", key),
            DeferredCommand::Del { key } => format!("Del {}", key),
            DeferredCommand::Expire { key, ttl_seconds } => {
                format!("Expire {} in {}s", key, ttl_seconds)
            }
            DeferredCommand::MSet { entries } => format!("MSet {} key(s)", entries.len()),
            DeferredCommand::HSet { key, field, .. } => format!("HSet {}.{}", key, field),
            DeferredCommand::HMSet { key, entries } => {
                format!("HMSet {} field(s) of {}", entries.len(), key)
            }
            DeferredCommand::HDel { key, field } => format!("HDel {}.{}", key, field),
        }
    }

    /// Mirror slots the command wrote optimistically
    ///
    /// Expire leaves the mirror alone, so it has none.
    pub fn slots(&self) -> Vec<Slot> {
        match self {
            DeferredCommand::Set { key, .. } | DeferredCommand::Del { key } => {
                vec![Slot::Key(key.clone())]
            }
            DeferredCommand::Expire { .. } => Vec::new(),
            DeferredCommand::MSet { entries } => entries.keys().cloned().map(Slot::Key).collect(),
            DeferredCommand::HSet { key, field, .. } | DeferredCommand::HDel { key, field } => {
                vec![Slot::Field(key.clone(), field.clone())]
            }
            DeferredCommand::HMSet { key, entries } => entries
                .keys()
                .map(|field| Slot::Field(key.clone(), field.clone()))
                .collect(),
        }
    }
}

/// Eager mutations that can be compensated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppliedCommand {
    Incr {
        key: String,
        delta: Delta,
    },
    Decr {
        key: String,
        delta: Delta,
    },
    HIncr {
        key: String,
        field: String,
        delta: Delta,
    },
    HDecr {
        key: String,
        field: String,
        delta: Delta,
    },
}

impl AppliedCommand {
    /// The command that undoes this one
    pub fn inverse(&self) -> AppliedCommand {
        match self.clone() {
            AppliedCommand::Incr { key, delta } => AppliedCommand::Decr { key, delta },
            AppliedCommand::Decr { key, delta } => AppliedCommand::Incr { key, delta },
            AppliedCommand::HIncr { key, field, delta } => {
                AppliedCommand::HDecr { key, field, delta }
            }
            AppliedCommand::HDecr { key, field, delta } => {
                AppliedCommand::HIncr { key, field, delta }
            }
        }
    }

    /// Send the command and return the value the store reports afterwards
    pub fn apply<S: BackingStore + ?Sized>(&self, store: &S) -> StoreResult<String> {
        match self {
            AppliedCommand::Incr { key, delta } => store.incr(key, *delta),
            AppliedCommand::Decr { key, delta } => store.decr(key, *delta),
            AppliedCommand::HIncr { key, field, delta } => store.hincr(key, field, *delta),
            AppliedCommand::HDecr { key, field, delta } => store.hdecr(key, field, *delta),
        }
    }

    pub fn slot(&self) -> Slot {
        match self {
            AppliedCommand::Incr { key, .. } | AppliedCommand::Decr { key, .. } => {
                Slot::Key(key.clone())
            }
            AppliedCommand::HIncr { key, field, .. } | AppliedCommand::HDecr { key, field, .. } => {
                Slot::Field(key.clone(), field.clone())
            }
        }
    }

    /// Store operation name
    pub fn op(&self) -> &'static str {
        match self {
            AppliedCommand::Incr { .. } => "incr",
            AppliedCommand::Decr { .. } => "decr",
            AppliedCommand::HIncr { .. } => "hincr",
            AppliedCommand::HDecr { .. } => "hdecr",
        }
    }

    pub fn description(&self) -> String {
        match self {
            AppliedCommand::Incr { key, delta } => format!("Incr {} by {}", key, delta),
            AppliedCommand::Decr { key, delta } => format!("Decr {} by {}", key, delta),
            AppliedCommand::HIncr { key, field, delta } => {
                format!("HIncr {}.{} by {}", key, field, delta)
            }
            AppliedCommand::HDecr { key, field, delta } => {
                format!("HDecr {}.{} by {}", key, field, delta)
            }
        }
    }
}
