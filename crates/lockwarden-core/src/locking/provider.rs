//! Lock provider abstraction
//!
//! [`LockProvider`] is the surface callers program against. The in-memory
//! [`MemoryLockManager`](super::manager::MemoryLockManager) is the only
//! implementation in this crate; callers can hold an `Arc<dyn LockProvider>`
//! so another backend can be swapped in.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::guard::AcquiredLock;
use super::query::{LockQuery, QueryPage};
use super::record::{LockRecord, LockRequest};
use super::types::LockResult;

/// Outcome of a non-blocking lock attempt
#[derive(Debug)]
pub enum TryLockOutcome {
    /// The lock was acquired, or was already held by the same requester
    Acquired(AcquiredLock),
    /// Another requester holds the lock or is queued for it
    Denied {
        /// Lock state at the time of the attempt
        current: LockRecord,
    },
}

impl TryLockOutcome {
    /// Whether the attempt succeeded
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }

    /// Borrow the acquired lock, if any
    pub fn lock(&self) -> Option<&AcquiredLock> {
        match self {
            Self::Acquired(lock) => Some(lock),
            Self::Denied { .. } => None,
        }
    }

    /// Take the acquired lock, if any
    pub fn into_lock(self) -> Option<AcquiredLock> {
        match self {
            Self::Acquired(lock) => Some(lock),
            Self::Denied { .. } => None,
        }
    }
}

/// Options for a blocking lock request
#[derive(Debug, Clone, Default)]
pub struct LockOptions {
    /// Lock duration once granted (None = until released)
    pub expiry: Option<Duration>,

    /// Renew the expiry until the lock is released
    pub keep_alive: bool,

    /// How long to wait in the queue (None = forever)
    pub timeout: Option<Duration>,

    /// Cancels the request while it is queued
    pub cancellation: Option<CancellationToken>,
}

impl LockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Arbitrates exclusive access to named resources
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Attempt to lock `resource` for `requester` without waiting.
    ///
    /// A requester that already holds the lock gets a handle to the existing
    /// acquisition; its timers are not reset.
    async fn try_lock(
        &self,
        resource: &str,
        requester: &str,
        expiry: Option<Duration>,
        keep_alive: bool,
    ) -> LockResult<TryLockOutcome>;

    /// Lock `resource` for `requester`, queueing behind earlier requests.
    ///
    /// # Errors
    /// * `LockError::Timeout` - not granted within `options.timeout`
    /// * `LockError::Cancelled` - `options.cancellation` fired while queued
    /// * `LockError::ForceUnlocked` - the queue was cleared by a force unlock
    async fn lock(
        &self,
        resource: &str,
        requester: &str,
        options: LockOptions,
    ) -> LockResult<AcquiredLock>;

    /// Clear the lock regardless of holder. Returns whether it was held.
    ///
    /// With `clear_pending_requests` every queued request fails with
    /// `LockError::ForceUnlocked`; otherwise the head of the queue is granted.
    async fn force_unlock(&self, resource: &str, clear_pending_requests: bool) -> LockResult<bool>;

    /// Snapshot of a resource. Unknown resources report a free record.
    async fn get(&self, resource: &str) -> LockResult<LockRecord>;

    /// Queued requests for a resource, oldest first
    async fn get_pending_requests(&self, resource: &str) -> LockResult<Vec<LockRequest>>;

    /// Filter, sort and page over every known resource
    async fn query(&self, query: &LockQuery) -> LockResult<QueryPage>;

    /// Stop background work and fail queued requests. Safe to call twice.
    async fn shutdown(&self);
}
