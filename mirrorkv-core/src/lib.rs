//! MirrorKV Core - Write-through cache coordinator
//!
//! This crate provides:
//! - A local mirror of a remote key/hash store with negative caching
//! - Session transactions with deferred and compensating log entries
//! - The backing store contract and an in-process reference store
//! - Configuration and logging setup

pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod mirror;
pub mod store;
pub mod transaction;
pub mod value;

pub use config::*;
pub use coordinator::*;
pub use error::*;
pub use logging::*;
pub use mirror::*;
pub use store::*;
pub use transaction::*;
pub use value::*;
