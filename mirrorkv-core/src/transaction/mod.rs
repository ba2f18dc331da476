//! Session transactions with deferred and compensating entries
//!
//! A transaction records two kinds of log entries:
//! - deferred commands (Set, Del, Expire, MSet, HSet, HMSet, HDel) that are
//!   held back and replayed in order at commit
//! - applied commands (Incr, Decr, HIncr, HDecr) that already reached the
//!   store and are undone with their inverse, newest first, at rollback
//!
//! There is no atomicity: a commit whose replay fails part way leaves the
//! commands already sent in place.

pub mod entry;
pub mod replay;

pub use entry::{AppliedCommand, DeferredCommand, LogEntry, LogRecord};
pub use replay::{
    compensate_applied, replay_deferred, Compensation, ReplayFailure, ReplayKind, ReplayPolicy,
    ReplayReport,
};

use crate::error::{CacheError, CacheResult};
use crate::mirror::Slot;
use crate::store::{BackingStore, TransactionHooks};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

pub type TransactionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Active,
    Inactive,
}

/// One in-flight session transaction
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    started_at: DateTime<Utc>,
    log: Vec<LogRecord>,
    next_sequence: u64,
    max_entries: Option<usize>,
}

impl Transaction {
    /// Start a transaction, running the create hooks around it
    pub fn begin(
        id: TransactionId,
        max_entries: Option<usize>,
        hooks: Option<&dyn TransactionHooks>,
    ) -> CacheResult<Self> {
        if let Some(hooks) = hooks {
            hooks
                .before_create()
                .map_err(|e| CacheError::internal("before_create hook", e))?;
        }

        let transaction = Self {
            id,
            state: TransactionState::Active,
            started_at: Utc::now(),
            log: Vec::new(),
            next_sequence: 1,
            max_entries,
        };

        if let Some(hooks) = hooks {
            if let Err(e) = hooks.after_create() {
                warn!(transaction = id, error = %e, "after_create hook failed");
            }
        }

        info!(transaction = id, "transaction started");
        Ok(transaction)
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Number of log records
    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.log
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    /// Fail unless the transaction is active with room for one more record
    pub fn ensure_capacity(&self) -> CacheResult<()> {
        self.ensure_active()?;
        match self.max_entries {
            Some(limit) if self.log.len() >= limit => Err(CacheError::TransactionLogFull { limit }),
            _ => Ok(()),
        }
    }

    /// Record a command to be sent at commit
    pub fn defer(&mut self, command: DeferredCommand) -> CacheResult<u64> {
        self.ensure_capacity()?;
        Ok(self.push(LogEntry::Deferred(command)))
    }

    /// Record a command already sent, for compensation at rollback
    pub fn record_applied(&mut self, command: AppliedCommand) -> CacheResult<u64> {
        self.ensure_capacity()?;
        Ok(self.push(LogEntry::Applied(command)))
    }

    /// Replay deferred commands and end the transaction
    ///
    /// Returns `Err` only when the transaction is inactive or `before_commit`
    /// fails, in which case nothing is replayed and the log is kept. Replay
    /// failures are in the returned report.
    pub fn commit<S: BackingStore + ?Sized>(
        &mut self,
        store: &S,
        hooks: Option<&dyn TransactionHooks>,
        policy: ReplayPolicy,
    ) -> CacheResult<ReplayReport> {
        self.ensure_active()?;
        if let Some(hooks) = hooks {
            hooks
                .before_commit()
                .map_err(|e| CacheError::internal("before_commit hook", e))?;
        }

        let records = std::mem::take(&mut self.log);
        let report = replay_deferred(self.id, records, store, policy);

        if let Some(hooks) = hooks {
            if let Err(e) = hooks.after_commit() {
                warn!(transaction = self.id, error = %e, "after_commit hook failed");
            }
        }
        self.state = TransactionState::Inactive;

        info!(
            transaction = self.id,
            replayed = report.replayed,
            failed = report.failures.len(),
            "transaction committed"
        );
        Ok(report)
    }

    /// Compensate applied commands, discard deferred ones and end the transaction
    ///
    /// Error behaviour matches [`Transaction::commit`].
    pub fn rollback<S: BackingStore + ?Sized>(
        &mut self,
        store: &S,
        hooks: Option<&dyn TransactionHooks>,
    ) -> CacheResult<ReplayReport> {
        self.ensure_active()?;
        if let Some(hooks) = hooks {
            hooks
                .before_rollback()
                .map_err(|e| CacheError::internal("before_rollback hook", e))?;
        }

        let records = std::mem::take(&mut self.log);
        let report = compensate_applied(self.id, records, store);

        if let Some(hooks) = hooks {
            if let Err(e) = hooks.after_rollback() {
                warn!(transaction = self.id, error = %e, "after_rollback hook failed");
            }
        }
        self.state = TransactionState::Inactive;

        info!(
            transaction = self.id,
            compensated = report.replayed,
            discarded = report.untouched.len(),
            failed = report.failures.len(),
            "transaction rolled back"
        );
        Ok(report)
    }

    /// Slots written by both a deferred and an applied entry
    ///
    /// Commit replays deferred commands after the applied ones already reached
    /// the store, so the mirror cannot tell which write landed last.
    pub fn mixed_slots(&self) -> HashSet<Slot> {
        let mut deferred = HashSet::new();
        let mut applied = HashSet::new();
        for record in &self.log {
            match &record.entry {
                LogEntry::Deferred(command) => deferred.extend(command.slots()),
                LogEntry::Applied(command) => {
                    applied.insert(command.slot());
                }
            }
        }
        deferred.intersection(&applied).cloned().collect()
    }

    /// Render the log as pretty-printed JSON
    pub fn export_log(&self) -> CacheResult<String> {
        serde_json::to_string_pretty(&self.log)
            .map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn ensure_active(&self) -> CacheResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CacheError::TransactionInactive(self.id))
        }
    }

    fn push(&mut self, entry: LogEntry) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.log.push(LogRecord::new(sequence, entry));
        sequence
    }
}
