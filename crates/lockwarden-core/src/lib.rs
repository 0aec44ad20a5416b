//! Lockwarden Core Library
//!
//! This crate provides in-process locking of named resources, including:
//! - Non-blocking and queued (FIFO) lock acquisition
//! - Lock expiry and keep-alive renewal
//! - Force unlock with optional clearing of queued requests
//! - Filtered, sorted and paged queries over the lock table
//! - Background eviction of inactive lock records
//! - File-backed configuration

pub mod config;
pub mod error;
pub mod locking;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::locking::{
        AcquiredLock, CleanupMethod, LockConfig, LockError, LockOptions, LockProvider, LockQuery,
        LockRecord, MemoryLockManager, SortField, TryLockOutcome,
    };
}
