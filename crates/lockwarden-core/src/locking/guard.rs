//! Handles for acquired locks
//!
//! An [`AcquiredLock`] is returned for every successful acquisition. It only
//! remembers the resource name and acquisition id; releasing calls back into
//! the manager, which owns the lock table. Dropping the handle releases the
//! lock, the same as calling [`AcquiredLock::unlock`].

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Weak;
use uuid::Uuid;

use super::record::Grant;

/// Callback used by handles to release the acquisition they stand for
pub(crate) trait LockReleaser: Send + Sync {
    /// Release `lock_id` on `resource`. Returns false if that acquisition is
    /// no longer the current holder.
    fn release(&self, resource: &str, lock_id: Uuid) -> bool;
}

/// A held lock on a named resource
pub struct AcquiredLock {
    resource: String,
    locked_by: String,
    locked_at: DateTime<Utc>,
    expiry_date: Option<DateTime<Utc>>,
    lock_id: Uuid,
    releaser: Option<Weak<dyn LockReleaser>>,
    released: bool,
}

impl AcquiredLock {
    pub(crate) fn new(resource: &str, grant: Grant, releaser: Weak<dyn LockReleaser>) -> Self {
        Self {
            resource: resource.to_string(),
            locked_by: grant.requester,
            locked_at: grant.locked_at,
            expiry_date: grant.expiry_date,
            lock_id: grant.lock_id,
            releaser: Some(releaser),
            released: false,
        }
    }

    /// Create a handle that is not attached to any manager (for testing)
    #[cfg(test)]
    pub(crate) fn new_detached(resource: &str, grant: Grant) -> Self {
        Self {
            resource: resource.to_string(),
            locked_by: grant.requester,
            locked_at: grant.locked_at,
            expiry_date: grant.expiry_date,
            lock_id: grant.lock_id,
            releaser: None,
            released: false,
        }
    }

    /// The locked resource
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The requester holding the lock
    pub fn locked_by(&self) -> &str {
        &self.locked_by
    }

    /// When the hold began
    pub fn locked_at(&self) -> DateTime<Utc> {
        self.locked_at
    }

    /// Expiry date at the time the lock was granted
    ///
    /// Keep-alive renewals move the live expiry forward; query the manager
    /// for the current value.
    pub fn expiry_date(&self) -> Option<DateTime<Utc>> {
        self.expiry_date
    }

    /// Identifier of this acquisition
    pub fn lock_id(&self) -> Uuid {
        self.lock_id
    }

    /// Whether this handle has already released its lock
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the lock
    ///
    /// Returns true if this call released it. Unlocking a lock that already
    /// expired, was force-unlocked or was released through another handle is
    /// a no-op returning false.
    pub fn unlock(mut self) -> bool {
        self.do_release()
    }

    fn do_release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        match self.releaser.take().and_then(|weak| weak.upgrade()) {
            Some(releaser) => releaser.release(&self.resource, self.lock_id),
            None => false,
        }
    }
}

impl Drop for AcquiredLock {
    fn drop(&mut self) {
        self.do_release();
    }
}

impl fmt::Debug for AcquiredLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquiredLock")
            .field("resource", &self.resource)
            .field("locked_by", &self.locked_by)
            .field("locked_at", &self.locked_at)
            .field("expiry_date", &self.expiry_date)
            .field("lock_id", &self.lock_id)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for AcquiredLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lock[{} by {}]", self.resource, self.locked_by)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingReleaser {
        calls: AtomicUsize,
    }

    impl LockReleaser for CountingReleaser {
        fn release(&self, _resource: &str, _lock_id: Uuid) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn test_grant(requester: &str) -> Grant {
        Grant {
            lock_id: Uuid::new_v4(),
            requester: requester.to_string(),
            locked_at: Utc::now(),
            expiry_date: None,
        }
    }

    fn attached(releaser: &Arc<CountingReleaser>) -> AcquiredLock {
        let as_dyn: Arc<dyn LockReleaser> = releaser.clone();
        AcquiredLock::new("orders", test_grant("worker-1"), Arc::downgrade(&as_dyn))
    }

    #[test]
    fn test_unlock_releases_once() {
        let releaser = Arc::new(CountingReleaser::default());
        let lock = attached(&releaser);

        assert_eq!(lock.resource(), "orders");
        assert_eq!(lock.locked_by(), "worker-1");
        assert!(!lock.is_released());

        assert!(lock.unlock());
        assert_eq!(releaser.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let releaser = Arc::new(CountingReleaser::default());
        {
            let _lock = attached(&releaser);
        }
        assert_eq!(releaser.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detached_unlock_is_noop() {
        let lock = AcquiredLock::new_detached("orders", test_grant("worker-1"));
        assert!(!lock.unlock());
    }

    #[test]
    fn test_display() {
        let lock = AcquiredLock::new_detached("orders", test_grant("worker-1"));
        let display = format!("{}", lock);
        assert!(display.contains("orders"));
        assert!(display.contains("worker-1"));
    }
}
