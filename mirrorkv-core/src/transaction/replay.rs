//! Commit replay and rollback compensation

use super::entry::{AppliedCommand, LogEntry, LogRecord};
use crate::error::{CacheError, CacheResult, StoreError};
use crate::store::BackingStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Which end of a transaction produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayKind {
    Commit,
    Rollback,
}

impl fmt::Display for ReplayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayKind::Commit => f.write_str("commit"),
            ReplayKind::Rollback => f.write_str("rollback"),
        }
    }
}

/// What commit does after a deferred command fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReplayPolicy {
    /// Keep replaying the remaining commands
    #[default]
    ContinueOnError,
    /// Stop and leave the remaining commands unsent
    StopOnError,
}

/// A log record the store rejected
#[derive(Debug)]
pub struct ReplayFailure {
    pub record: LogRecord,
    pub error: StoreError,
}

/// A compensating command that reached the store
#[derive(Debug, Clone)]
pub struct Compensation {
    /// The inverse command that was issued
    pub command: AppliedCommand,
    /// Value the store reported afterwards
    pub value: String,
}

/// Outcome of a commit or rollback
#[derive(Debug)]
pub struct ReplayReport {
    pub transaction: u64,
    pub kind: ReplayKind,
    /// Commands the store accepted
    pub replayed: usize,
    pub failures: Vec<ReplayFailure>,
    /// Records never sent: deferred commands after a stop, or discarded at rollback
    pub untouched: Vec<LogRecord>,
    /// Rollback only
    pub compensations: Vec<Compensation>,
}

impl ReplayReport {
    pub fn new(transaction: u64, kind: ReplayKind) -> Self {
        Self {
            transaction,
            kind,
            replayed: 0,
            failures: Vec::new(),
            untouched: Vec::new(),
            compensations: Vec::new(),
        }
    }

    /// True when every command sent was accepted
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Ok` for a clean report, `ReplayIncomplete` otherwise
    pub fn into_result(self) -> CacheResult<ReplayReport> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(CacheError::ReplayIncomplete(Box::new(self)))
        }
    }
}

/// Send deferred commands to the store in log order
///
/// Applied entries were sent when they were recorded and are skipped.
pub fn replay_deferred<S: BackingStore + ?Sized>(
    transaction: u64,
    records: Vec<LogRecord>,
    store: &S,
    policy: ReplayPolicy,
) -> ReplayReport {
    let mut report = ReplayReport::new(transaction, ReplayKind::Commit);
    let mut records = records.into_iter();

    while let Some(record) = records.next() {
        let LogEntry::Deferred(command) = &record.entry else {
            continue;
        };

        match command.apply(store) {
            Ok(()) => {
                debug!(
                    transaction,
                    sequence = record.sequence,
                    "replayed {}",
                    command.description()
                );
                report.replayed += 1;
            }
            Err(error) => {
                warn!(
                    transaction,
                    sequence = record.sequence,
                    error = %error,
                    "failed to replay {}",
                    command.description()
                );
                report.failures.push(ReplayFailure { record, error });

                if policy == ReplayPolicy::StopOnError {
                    report
                        .untouched
                        .extend(records.by_ref().filter(|r| r.entry.is_deferred()));
                    break;
                }
            }
        }
    }

    report
}

/// Issue the inverse of every applied command, newest first
///
/// Deferred commands were never sent, so they are reported as untouched.
/// A failed compensation does not stop the remaining ones.
pub fn compensate_applied<S: BackingStore + ?Sized>(
    transaction: u64,
    records: Vec<LogRecord>,
    store: &S,
) -> ReplayReport {
    let mut report = ReplayReport::new(transaction, ReplayKind::Rollback);

    for record in records.into_iter().rev() {
        let LogEntry::Applied(command) = &record.entry else {
            report.untouched.push(record);
            continue;
        };

        let inverse = command.inverse();
        match inverse.apply(store) {
            Ok(value) => {
                debug!(
                    transaction,
                    sequence = record.sequence,
                    "compensated {} with {}",
                    command.description(),
                    inverse.description()
                );
                report.replayed += 1;
                report.compensations.push(Compensation {
                    command: inverse,
                    value,
                });
            }
            Err(error) => {
                warn!(
                    transaction,
                    sequence = record.sequence,
                    error = %error,
                    "failed to compensate {}",
                    command.description()
                );
                report.failures.push(ReplayFailure { record, error });
            }
        }
    }

    report
}
