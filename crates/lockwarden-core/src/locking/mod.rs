//! Named-resource locking for concurrent callers
//!
//! This module arbitrates exclusive access to resources identified by a
//! string name. Callers either try once or queue; queued requests are served
//! strictly in arrival order per resource.
//!
//! # Architecture
//!
//! - **Records**: `LockRecord` snapshots, `LockRequest` queue entries
//! - **Provider**: the `LockProvider` trait and its in-memory implementation
//!   `MemoryLockManager`, which owns the lock table and wait queues
//! - **Handles**: `AcquiredLock`, released on `unlock()` or drop
//! - **Leases**: background expiry and keep-alive renewal per acquisition
//! - **Cleanup**: periodic eviction of inactive records
//! - **Queries**: filtering, sorting and paging over the lock table
//!
//! # Example
//!
//! ```ignore
//! use lockwarden_core::locking::{LockConfig, LockOptions, LockProvider, MemoryLockManager};
//!
//! let manager = MemoryLockManager::new(LockConfig::default())?;
//!
//! // Wait up to five seconds for the lock, holding it for at most thirty
//! let lock = manager
//!     .lock(
//!         "billing.invoice-42",
//!         "worker-1",
//!         LockOptions::new()
//!             .expiry(Duration::from_secs(30))
//!             .timeout(Duration::from_secs(5)),
//!     )
//!     .await?;
//!
//! // Do work with the resource...
//!
//! lock.unlock();
//! ```

pub mod cleanup;
pub mod event;
pub mod guard;
pub mod lease;
pub mod manager;
pub mod provider;
pub mod query;
pub mod record;
pub mod types;

// Re-export main types
pub use event::{LockEvent, LockEventType};
pub use guard::AcquiredLock;
pub use manager::MemoryLockManager;
pub use provider::{LockOptions, LockProvider, TryLockOutcome};
pub use query::{LockQuery, QueryPage, SortField};
pub use record::{LockRecord, LockRequest};
pub use types::{CleanupMethod, LockConfig, LockError, LockResult};
