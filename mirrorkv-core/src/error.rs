//! Error types for the backing store contract and the cache coordinator

use crate::transaction::ReplayReport;

/// Errors reported by a backing store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key or field holds no value
    #[error("value not found")]
    NotFound,

    #[error("wrong kind of value held at key {0}")]
    WrongType(String),

    #[error("value at {key} is not a valid {expected}")]
    NotANumber { key: String, expected: &'static str },

    #[error("increment or decrement would overflow at key {0}")]
    Overflow(String),

    /// Opaque failure from the store implementation
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Build an opaque backend error from a message
    pub fn backend(message: impl std::fmt::Display) -> Self {
        StoreError::Backend(anyhow::anyhow!("{}", message))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by the cache coordinator
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Key or field is tombstoned or confirmed absent
    #[error("cache: value nil")]
    ValueNil,

    /// Backing store failure, passed through unchanged
    #[error(transparent)]
    Store(StoreError),

    /// Unexpected backing store failure with diagnostic context
    #[error("cache: internal error ({context}): {source}")]
    Internal {
        context: String,
        #[source]
        source: StoreError,
    },

    #[error("cache: no active transaction")]
    NoActiveTransaction,

    #[error("cache: transaction {0} is no longer active")]
    TransactionInactive(u64),

    #[error("cache: transaction log is full ({limit} entries)")]
    TransactionLogFull { limit: usize },

    #[error(
        "cache: {} of transaction {} incomplete, {} command(s) failed",
        .0.kind,
        .0.transaction,
        .0.failures.len()
    )]
    ReplayIncomplete(Box<ReplayReport>),

    #[error("cache: serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    /// Wrap an unexpected store failure with context
    pub fn internal(context: impl Into<String>, source: StoreError) -> Self {
        CacheError::Internal {
            context: context.into(),
            source,
        }
    }

    pub fn is_value_nil(&self) -> bool {
        matches!(self, CacheError::ValueNil)
    }

    /// Replay report attached to a failed commit or rollback
    pub fn replay_report(&self) -> Option<&ReplayReport> {
        match self {
            CacheError::ReplayIncomplete(report) => Some(report),
            _ => None,
        }
    }
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => CacheError::ValueNil,
            other => CacheError::Store(other),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_value_nil() {
        let err: CacheError = StoreError::NotFound.into();
        assert!(err.is_value_nil());
    }

    #[test]
    fn test_store_errors_pass_through_unchanged() {
        let err: CacheError = StoreError::backend("connection reset").into();
        assert_eq!(err.to_string(), "connection reset");
        assert!(matches!(err, CacheError::Store(StoreError::Backend(_))));
    }

    #[test]
    fn test_internal_error_carries_context() {
        let err = CacheError::internal("mget returned not-found", StoreError::NotFound);
        assert_eq!(
            err.to_string(),
            "cache: internal error (mget returned not-found): value not found"
        );
    }
}
