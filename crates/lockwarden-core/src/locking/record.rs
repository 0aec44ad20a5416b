//! Lock records and per-resource wait queues
//!
//! [`LockRecord`] and [`LockRequest`] are the read-only views handed to
//! callers. [`ResourceState`] is the mutable state the manager keeps per
//! resource name: the current holder, the FIFO wait queue and the time of
//! the last successful acquisition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{LockError, LockResult};

/// Snapshot of a resource's lock state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Resource name
    pub resource: String,

    /// Current holder (None = free)
    pub locked_by: Option<String>,

    /// When the current hold began
    pub locked_at: Option<DateTime<Utc>>,

    /// When the current hold expires (None = never)
    pub expiry_date: Option<DateTime<Utc>>,

    /// Most recent successful acquisition, kept after unlock
    pub last_lock_date: Option<DateTime<Utc>>,

    /// Number of queued waiters
    pub pending_requests: usize,
}

impl LockRecord {
    /// A record for a resource with no lock history
    pub fn free(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            locked_by: None,
            locked_at: None,
            expiry_date: None,
            last_lock_date: None,
            pending_requests: 0,
        }
    }

    /// Check if the resource is currently held
    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }
}

/// A queued lock request, as reported by `get_pending_requests`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    pub resource: String,
    pub requester: String,

    /// Lock duration applied once granted
    pub expiry_time: Option<Duration>,

    /// How long the requester waits in the queue
    pub timeout: Option<Duration>,

    /// Renew the granted lock until it is released
    pub keep_alive: bool,

    /// When the request joined the queue
    pub requested_at: DateTime<Utc>,
}

/// Lock details delivered to a queued waiter when it is promoted
#[derive(Debug, Clone)]
pub(crate) struct Grant {
    pub lock_id: Uuid,
    pub requester: String,
    pub locked_at: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// The current holder of a resource
#[derive(Debug)]
pub(crate) struct Holder {
    pub lock_id: Uuid,
    pub requester: String,
    pub locked_at: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub expiry: Option<Duration>,
    pub keep_alive: bool,
    /// Stops the lease task watching this acquisition
    pub lease: Option<CancellationToken>,
}

impl Holder {
    pub fn grant(&self) -> Grant {
        Grant {
            lock_id: self.lock_id,
            requester: self.requester.clone(),
            locked_at: self.locked_at,
            expiry_date: self.expiry_date,
        }
    }

    /// Whether the hold has run past its expiry date plus `offset`
    pub fn is_expired_at(&self, now: DateTime<Utc>, offset: Duration) -> bool {
        match self.expiry_date {
            // A deadline past the representable range is never reached
            Some(expiry) => offset_by(expiry, offset).is_some_and(|deadline| now >= deadline),
            None => false,
        }
    }
}

/// A request parked in a wait queue
#[derive(Debug)]
pub(crate) struct Waiter {
    pub id: Uuid,
    pub request: LockRequest,
    pub tx: oneshot::Sender<LockResult<Grant>>,
}

/// Per-resource state owned by the manager
#[derive(Debug)]
pub(crate) struct ResourceState {
    pub resource: String,
    pub holder: Option<Holder>,
    pub last_lock_date: Option<DateTime<Utc>>,
    pub queue: VecDeque<Waiter>,
}

impl ResourceState {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            holder: None,
            last_lock_date: None,
            queue: VecDeque::new(),
        }
    }

    pub fn snapshot(&self) -> LockRecord {
        LockRecord {
            resource: self.resource.clone(),
            locked_by: self.holder.as_ref().map(|h| h.requester.clone()),
            locked_at: self.holder.as_ref().map(|h| h.locked_at),
            expiry_date: self.holder.as_ref().and_then(|h| h.expiry_date),
            last_lock_date: self.last_lock_date,
            pending_requests: self.queue.len(),
        }
    }

    pub fn pending(&self) -> Vec<LockRequest> {
        self.queue.iter().map(|w| w.request.clone()).collect()
    }

    /// Neither held nor waited on
    pub fn is_inactive(&self) -> bool {
        self.holder.is_none() && self.queue.is_empty()
    }

    /// Make `requester` the holder, stamping the acquisition times
    pub fn install(
        &mut self,
        requester: &str,
        expiry: Option<Duration>,
        keep_alive: bool,
        now: DateTime<Utc>,
    ) -> &mut Holder {
        self.last_lock_date = Some(now);
        self.holder.insert(Holder {
            lock_id: Uuid::new_v4(),
            requester: requester.to_string(),
            locked_at: now,
            expiry_date: expiry.map(|d| offset_by(now, d).unwrap_or(DateTime::<Utc>::MAX_UTC)),
            expiry,
            keep_alive,
            lease: None,
        })
    }

    /// Clear the holder and stop its lease task
    pub fn take_holder(&mut self) -> Option<Holder> {
        let holder = self.holder.take();
        if let Some(token) = holder.as_ref().and_then(|h| h.lease.as_ref()) {
            token.cancel();
        }
        holder
    }

    pub fn remove_waiter(&mut self, id: Uuid) -> Option<Waiter> {
        let index = self.queue.iter().position(|w| w.id == id)?;
        self.queue.remove(index)
    }
}

/// `at + duration`, or None past the representable range
pub(crate) fn offset_by(at: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
}

/// `at - duration`, or None past the representable range
pub(crate) fn rewind_by(at: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_sub_signed(delta))
}

/// Reject durations that cannot be added to the current time
pub(crate) fn check_duration(name: &str, duration: Option<Duration>) -> LockResult<()> {
    let Some(duration) = duration else {
        return Ok(());
    };
    offset_by(Utc::now(), duration)
        .map(|_| ())
        .ok_or_else(|| LockError::InvalidInput(format!("{} of {:?} is out of range", name, duration)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_record() {
        let record = LockRecord::free("System.Monitor");

        assert_eq!(record.resource, "System.Monitor");
        assert!(!record.is_locked());
        assert!(record.locked_at.is_none());
        assert!(record.expiry_date.is_none());
        assert!(record.last_lock_date.is_none());
        assert_eq!(record.pending_requests, 0);
    }

    #[test]
    fn test_install_and_take_holder() {
        let mut state = ResourceState::new("orders");
        let now = Utc::now();
        let token = CancellationToken::new();

        let holder = state.install("worker-1", Some(Duration::from_secs(5)), false, now);
        holder.lease = Some(token.clone());

        let record = state.snapshot();
        assert_eq!(record.locked_by.as_deref(), Some("worker-1"));
        assert_eq!(record.locked_at, Some(now));
        assert_eq!(record.expiry_date, Some(now + chrono::Duration::seconds(5)));
        assert_eq!(record.last_lock_date, Some(now));

        let taken = state.take_holder().expect("holder present");
        assert_eq!(taken.requester, "worker-1");
        assert!(token.is_cancelled());

        let record = state.snapshot();
        assert!(record.locked_by.is_none());
        assert!(record.expiry_date.is_none());
        assert_eq!(record.last_lock_date, Some(now));
        assert!(state.is_inactive());
    }

    #[test]
    fn test_expiry_honours_offset() {
        let mut state = ResourceState::new("orders");
        let now = Utc::now();
        let holder = state.install("worker-1", Some(Duration::from_millis(100)), false, now);

        let later = now + chrono::Duration::milliseconds(150);
        assert!(holder.is_expired_at(later, Duration::ZERO));
        assert!(!holder.is_expired_at(later, Duration::from_millis(100)));
    }

    #[test]
    fn test_unrepresentable_offset_never_expires() {
        let mut state = ResourceState::new("orders");
        let now = Utc::now();
        let holder = state.install("worker-1", Some(Duration::from_secs(1)), false, now);

        let huge = Duration::from_secs(10_000_000_000_000);
        assert!(!holder.is_expired_at(now + chrono::Duration::days(365), huge));
    }

    #[test]
    fn test_offset_and_rewind_saturate_to_none() {
        let now = Utc::now();
        let huge = Duration::from_secs(10_000_000_000_000);

        assert!(offset_by(now, huge).is_none());
        assert!(rewind_by(now, huge).is_none());
        assert_eq!(
            offset_by(now, Duration::from_secs(1)),
            Some(now + chrono::Duration::seconds(1))
        );
        assert!(check_duration("expiry", Some(huge)).is_err());
    }

    #[test]
    fn test_no_expiry_never_expires() {
        let mut state = ResourceState::new("orders");
        let now = Utc::now();
        let holder = state.install("worker-1", None, false, now);

        assert!(!holder.is_expired_at(now + chrono::Duration::days(365), Duration::ZERO));
    }

    #[test]
    fn test_remove_waiter_keeps_order() {
        let mut state = ResourceState::new("orders");
        let mut ids = Vec::new();
        for i in 0..3 {
            let (tx, _rx) = oneshot::channel();
            let id = Uuid::new_v4();
            ids.push(id);
            state.queue.push_back(Waiter {
                id,
                request: LockRequest {
                    resource: "orders".to_string(),
                    requester: format!("Requester.{}", i),
                    expiry_time: None,
                    timeout: None,
                    keep_alive: false,
                    requested_at: Utc::now(),
                },
                tx,
            });
        }

        assert!(state.remove_waiter(ids[1]).is_some());
        assert!(state.remove_waiter(ids[1]).is_none());

        let requesters: Vec<_> = state.pending().into_iter().map(|r| r.requester).collect();
        assert_eq!(requesters, vec!["Requester.0", "Requester.2"]);
        assert_eq!(state.snapshot().pending_requests, 2);
    }

    #[test]
    fn test_check_duration_rejects_overflow() {
        assert!(check_duration("expiry", None).is_ok());
        assert!(check_duration("expiry", Some(Duration::from_secs(30))).is_ok());
        assert!(check_duration("expiry", Some(Duration::from_secs(u64::MAX))).is_err());
    }
}
