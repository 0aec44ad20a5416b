//! In-memory lock manager
//!
//! The manager owns one table mapping resource names to their lock state and
//! wait queue. Every mutation happens under the table mutex, which is never
//! held across an `.await`; queued callers wait on a oneshot channel instead,
//! so no worker thread is blocked while a request sits in a queue.
//!
//! It handles:
//! - Immediate acquisition and same-requester re-entry
//! - FIFO wait queues with timeout and cancellation
//! - Lazy expiry plus a lease task per expiring acquisition
//! - Keep-alive renewal
//! - Periodic eviction of inactive records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cleanup::{self, Candidate};
use super::event::LockEvent;
use super::guard::{AcquiredLock, LockReleaser};
use super::lease;
use super::provider::{LockOptions, LockProvider, TryLockOutcome};
use super::query::{LockQuery, QueryPage};
use super::record::{
    check_duration, offset_by, Grant, LockRecord, LockRequest, ResourceState, Waiter,
};
use super::types::{CleanupMethod, LockConfig, LockError, LockResult};

type LockTable = BTreeMap<String, ResourceState>;

/// In-memory lock manager
///
/// Cloning is cheap and every clone shares the same lock table. Background
/// work stops on [`shutdown`](LockProvider::shutdown) or when the last
/// clone is dropped.
#[derive(Clone)]
pub struct MemoryLockManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    config: LockConfig,
    table: Mutex<LockTable>,
    events: broadcast::Sender<LockEvent>,
    running_cleanup: AtomicBool,
    closed: AtomicBool,
    shutdown: CancellationToken,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
    self_ref: Weak<ManagerInner>,
}

impl MemoryLockManager {
    /// Create a new lock manager and start its cleanup loop
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: LockConfig) -> LockResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            LockError::InvalidConfig("lock manager must be created inside a Tokio runtime".to_string())
        })?;
        let (events, _) = broadcast::channel(config.event_capacity);

        let inner = Arc::new_cyclic(|self_ref| ManagerInner {
            config,
            table: Mutex::new(BTreeMap::new()),
            events,
            running_cleanup: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            cleanup_task: Mutex::new(None),
            runtime,
            self_ref: self_ref.clone(),
        });

        let task = cleanup::spawn_cleanup_loop(
            &inner.runtime,
            Arc::downgrade(&inner),
            inner.config.cleanup_interval,
            inner.shutdown.child_token(),
        );
        *lock_ignoring_poison(&inner.cleanup_task) = Some(task);

        info!(
            cleanup_method = %inner.config.cleanup_method,
            cleanup_interval_ms = inner.config.cleanup_interval.as_millis() as u64,
            "Lock manager started"
        );
        Ok(Self { inner })
    }

    /// Create a lock manager with default configuration
    pub fn with_defaults() -> LockResult<Self> {
        Self::new(LockConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    /// Subscribe to lock events
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a cleanup pass is in progress
    pub fn is_running_cleanup(&self) -> bool {
        self.inner.running_cleanup.load(Ordering::SeqCst)
    }

    /// Run one cleanup pass now. Returns the number of evicted records.
    ///
    /// Returns zero without doing anything if a pass is already running.
    pub fn run_cleanup(&self) -> usize {
        self.inner.run_cleanup_pass()
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for MemoryLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLockManager")
            .field("config", &self.inner.config)
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LockProvider for MemoryLockManager {
    async fn try_lock(
        &self,
        resource: &str,
        requester: &str,
        expiry: Option<Duration>,
        keep_alive: bool,
    ) -> LockResult<TryLockOutcome> {
        self.inner.try_lock(resource, requester, expiry, keep_alive)
    }

    async fn lock(
        &self,
        resource: &str,
        requester: &str,
        options: LockOptions,
    ) -> LockResult<AcquiredLock> {
        self.inner.lock(resource, requester, options).await
    }

    async fn force_unlock(&self, resource: &str, clear_pending_requests: bool) -> LockResult<bool> {
        self.inner.force_unlock(resource, clear_pending_requests)
    }

    async fn get(&self, resource: &str) -> LockResult<LockRecord> {
        Ok(self.inner.get(resource))
    }

    async fn get_pending_requests(&self, resource: &str) -> LockResult<Vec<LockRequest>> {
        Ok(self.inner.pending_requests(resource))
    }

    async fn query(&self, query: &LockQuery) -> LockResult<QueryPage> {
        let snapshot = self.inner.snapshot_all();
        Ok(query.apply(snapshot))
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

/// Why a queued request stopped waiting
enum WaitEnd {
    Delivered(LockResult<Grant>),
    Cancelled,
    TimedOut(Duration),
}

impl ManagerInner {
    fn table(&self) -> MutexGuard<'_, LockTable> {
        lock_ignoring_poison(&self.table)
    }

    fn publish(&self, event: LockEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn ensure_open(&self) -> LockResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LockError::ShuttingDown);
        }
        Ok(())
    }

    fn handle(&self, resource: &str, grant: Grant) -> AcquiredLock {
        let releaser: Weak<dyn LockReleaser> = self.self_ref.clone();
        AcquiredLock::new(resource, grant, releaser)
    }

    fn try_lock(
        &self,
        resource: &str,
        requester: &str,
        expiry: Option<Duration>,
        keep_alive: bool,
    ) -> LockResult<TryLockOutcome> {
        validate_names(resource, requester)?;
        check_duration("expiry", expiry)?;

        let now = Utc::now();
        let mut table = self.table();
        self.ensure_open()?;
        let state = table
            .entry(resource.to_string())
            .or_insert_with(|| ResourceState::new(resource));
        self.expire_if_due(state, now);
        // Queued requests go first
        if state.holder.is_none() && !state.queue.is_empty() {
            self.promote(state, now);
        }

        match &state.holder {
            Some(holder) if holder.requester == requester => {
                let grant = holder.grant();
                debug!(resource = %resource, requester = %requester, "Lock re-entered");
                self.publish(LockEvent::reentered(resource, requester));
                Ok(TryLockOutcome::Acquired(self.handle(resource, grant)))
            }
            Some(_) => {
                debug!(resource = %resource, requester = %requester, "Lock busy");
                Ok(TryLockOutcome::Denied {
                    current: state.snapshot(),
                })
            }
            None => {
                let grant = self.install(state, requester, expiry, keep_alive, now);
                info!(resource = %resource, requester = %requester, "Lock acquired");
                self.publish(LockEvent::acquired(resource, requester, grant.lock_id));
                Ok(TryLockOutcome::Acquired(self.handle(resource, grant)))
            }
        }
    }

    async fn lock(
        &self,
        resource: &str,
        requester: &str,
        options: LockOptions,
    ) -> LockResult<AcquiredLock> {
        validate_names(resource, requester)?;
        check_duration("expiry", options.expiry)?;
        check_duration("timeout", options.timeout)?;
        if options.cancellation.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(LockError::Cancelled {
                resource: resource.to_string(),
                requester: requester.to_string(),
            });
        }

        let (waiter_id, rx) = {
            let now = Utc::now();
            let mut table = self.table();
            // Checked under the table lock so nothing is queued after the shutdown drain
            self.ensure_open()?;
            let state = table
                .entry(resource.to_string())
                .or_insert_with(|| ResourceState::new(resource));
            self.expire_if_due(state, now);

            if let Some(holder) = &state.holder {
                if holder.requester == requester {
                    let grant = holder.grant();
                    debug!(resource = %resource, requester = %requester, "Lock re-entered");
                    self.publish(LockEvent::reentered(resource, requester));
                    return Ok(self.handle(resource, grant));
                }
            } else if state.queue.is_empty() {
                let grant =
                    self.install(state, requester, options.expiry, options.keep_alive, now);
                info!(resource = %resource, requester = %requester, "Lock acquired");
                self.publish(LockEvent::acquired(resource, requester, grant.lock_id));
                return Ok(self.handle(resource, grant));
            }

            let (tx, rx) = oneshot::channel();
            let waiter_id = Uuid::new_v4();
            state.queue.push_back(Waiter {
                id: waiter_id,
                request: LockRequest {
                    resource: resource.to_string(),
                    requester: requester.to_string(),
                    expiry_time: options.expiry,
                    timeout: options.timeout,
                    keep_alive: options.keep_alive,
                    requested_at: now,
                },
                tx,
            });
            let position = state.queue.len();
            info!(
                resource = %resource,
                requester = %requester,
                position,
                "Lock busy, request queued"
            );
            self.publish(LockEvent::queued(resource, requester, position));

            // Nothing is held, e.g. the only other waiters gave up
            if state.holder.is_none() {
                self.promote(state, now);
            }
            (waiter_id, rx)
        };

        let mut wait = PendingWait {
            manager: self.self_ref.clone(),
            resource: resource.to_string(),
            waiter_id,
            rx,
            settled: false,
        };

        let end = tokio::select! {
            delivered = &mut wait.rx => {
                WaitEnd::Delivered(delivered.unwrap_or(Err(LockError::ShuttingDown)))
            }
            _ = cancelled(options.cancellation.as_ref()) => WaitEnd::Cancelled,
            _ = elapsed(options.timeout) => {
                WaitEnd::TimedOut(options.timeout.unwrap_or_default())
            }
        };

        let delivered = match end {
            WaitEnd::Delivered(result) => result,
            WaitEnd::Cancelled => self.give_up(&mut wait, requester, None),
            WaitEnd::TimedOut(timeout) => self.give_up(&mut wait, requester, Some(timeout)),
        };
        wait.settled = true;
        delivered.map(|grant| self.handle(resource, grant))
    }

    /// Leave the queue after a timeout or cancellation. A grant or failure
    /// delivered in the meantime wins over giving up.
    fn give_up(
        &self,
        wait: &mut PendingWait,
        requester: &str,
        timed_out: Option<Duration>,
    ) -> LockResult<Grant> {
        match self.withdraw(&wait.resource, wait.waiter_id) {
            Some(current) => Err(self.wait_failure(&wait.resource, requester, timed_out, current)),
            None => wait.rx.try_recv().unwrap_or(Err(LockError::ShuttingDown)),
        }
    }

    fn wait_failure(
        &self,
        resource: &str,
        requester: &str,
        timed_out: Option<Duration>,
        current: LockRecord,
    ) -> LockError {
        match timed_out {
            Some(timeout) => {
                info!(
                    resource = %resource,
                    requester = %requester,
                    timeout_ms = timeout.as_millis() as u64,
                    "Lock request timed out"
                );
                self.publish(LockEvent::timed_out(resource, requester, timeout));
                LockError::Timeout {
                    resource: resource.to_string(),
                    requester: requester.to_string(),
                    timeout,
                    current: Box::new(current),
                }
            }
            None => {
                info!(resource = %resource, requester = %requester, "Lock request cancelled");
                self.publish(LockEvent::cancelled(resource, requester));
                LockError::Cancelled {
                    resource: resource.to_string(),
                    requester: requester.to_string(),
                }
            }
        }
    }

    /// Remove a queued request. Returns the lock state afterwards, or None if
    /// the request had already left the queue.
    fn withdraw(&self, resource: &str, waiter_id: Uuid) -> Option<LockRecord> {
        let mut table = self.table();
        let state = table.get_mut(resource)?;
        state.remove_waiter(waiter_id)?;
        Some(state.snapshot())
    }

    /// Make `requester` the holder and start its lease task
    fn install(
        &self,
        state: &mut ResourceState,
        requester: &str,
        expiry: Option<Duration>,
        keep_alive: bool,
        now: DateTime<Utc>,
    ) -> Grant {
        let resource = state.resource.clone();
        let offset = self.config.expiry_offset;
        let holder = state.install(requester, expiry, keep_alive, now);

        if let Some(expiry) = holder.expiry {
            let token = self.shutdown.child_token();
            let first_wait = if keep_alive {
                lease::renew_interval(expiry)
            } else {
                expiry.saturating_add(offset)
            };
            lease::spawn_lease(
                &self.runtime,
                self.self_ref.clone(),
                resource,
                holder.lock_id,
                first_wait,
                token.clone(),
            );
            holder.lease = Some(token);
        }
        holder.grant()
    }

    /// Hand a free resource to the oldest live waiter
    fn promote(&self, state: &mut ResourceState, now: DateTime<Utc>) {
        while state.holder.is_none() {
            let Some(waiter) = state.queue.pop_front() else {
                break;
            };
            if waiter.tx.is_closed() {
                continue;
            }

            let request = waiter.request;
            let previous_lock_date = state.last_lock_date;
            let grant = self.install(
                state,
                &request.requester,
                request.expiry_time,
                request.keep_alive,
                now,
            );

            if waiter.tx.send(Ok(grant)).is_err() {
                // The waiter went away between the check and the send
                state.take_holder();
                state.last_lock_date = previous_lock_date;
                continue;
            }

            let waited = (now - request.requested_at).to_std().unwrap_or_default();
            info!(
                resource = %state.resource,
                requester = %request.requester,
                waited_ms = waited.as_millis() as u64,
                "Lock granted to queued request"
            );
            self.publish(LockEvent::granted_from_queue(
                &state.resource,
                &request.requester,
                waited,
            ));
        }
    }

    /// Release an expired hold and promote the next waiter
    fn expire_if_due(&self, state: &mut ResourceState, now: DateTime<Utc>) -> bool {
        let expired = state
            .holder
            .as_ref()
            .is_some_and(|h| h.is_expired_at(now, self.config.expiry_offset));
        if !expired {
            return false;
        }

        if let Some(holder) = state.take_holder() {
            info!(resource = %state.resource, requester = %holder.requester, "Lock expired");
            self.publish(LockEvent::expired(&state.resource, &holder.requester));
        }
        self.promote(state, now);
        true
    }

    /// Lease task callback. Returns how long to sleep before the next check,
    /// or None once the acquisition is gone.
    pub(crate) fn lease_tick(&self, resource: &str, lock_id: Uuid) -> Option<Duration> {
        let now = Utc::now();
        let mut table = self.table();
        let state = table.get_mut(resource)?;
        let offset = self.config.expiry_offset;
        let holder = state.holder.as_mut().filter(|h| h.lock_id == lock_id)?;

        if holder.keep_alive {
            let expiry = holder.expiry?;
            let renewed = offset_by(now, expiry).unwrap_or(DateTime::<Utc>::MAX_UTC);
            holder.expiry_date = Some(renewed);
            debug!(resource = %resource, requester = %holder.requester, "Lock renewed");
            let event = LockEvent::renewed(resource, &holder.requester, renewed);
            self.publish(event);
            return Some(lease::renew_interval(expiry));
        }

        // An unrepresentable deadline never arrives, so the lease has nothing to do
        let deadline = offset_by(holder.expiry_date?, offset)?;
        if now < deadline {
            return (deadline - now).to_std().ok();
        }
        self.expire_if_due(state, now);
        None
    }

    fn force_unlock(&self, resource: &str, clear_pending_requests: bool) -> LockResult<bool> {
        let now = Utc::now();
        let mut table = self.table();
        self.ensure_open()?;
        let Some(state) = table.get_mut(resource) else {
            return Ok(false);
        };

        let previous = state.take_holder();
        let mut cleared = 0;
        if clear_pending_requests {
            for waiter in state.queue.drain(..) {
                let _ = waiter.tx.send(Err(LockError::ForceUnlocked {
                    resource: resource.to_string(),
                    requester: waiter.request.requester,
                }));
                cleared += 1;
            }
        }

        let previous_holder = previous.as_ref().map(|h| h.requester.as_str());
        warn!(
            resource = %resource,
            previous_holder = previous_holder.unwrap_or("-"),
            cleared_requests = cleared,
            "Lock force-unlocked"
        );
        self.publish(LockEvent::force_unlocked(resource, previous_holder, cleared));

        if !clear_pending_requests {
            self.promote(state, now);
        }
        Ok(previous.is_some())
    }

    fn get(&self, resource: &str) -> LockRecord {
        let now = Utc::now();
        let mut table = self.table();
        match table.get_mut(resource) {
            Some(state) => {
                self.expire_if_due(state, now);
                state.snapshot()
            }
            None => LockRecord::free(resource),
        }
    }

    fn pending_requests(&self, resource: &str) -> Vec<LockRequest> {
        let table = self.table();
        table.get(resource).map(ResourceState::pending).unwrap_or_default()
    }

    fn snapshot_all(&self) -> Vec<LockRecord> {
        let now = Utc::now();
        let mut table = self.table();
        table
            .values_mut()
            .map(|state| {
                self.expire_if_due(state, now);
                state.snapshot()
            })
            .collect()
    }

    /// One cleanup pass under the table lock
    pub(crate) fn run_cleanup_pass(&self) -> usize {
        if self.running_cleanup.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let _running = RunningFlag(&self.running_cleanup);

        let resident_memory = match self.config.cleanup_method {
            CleanupMethod::ProcessMemory => cleanup::resident_memory_bytes(),
            _ => None,
        };

        let now = Utc::now();
        let mut table = self.table();
        let mut candidates = Vec::new();
        for state in table.values_mut() {
            self.expire_if_due(state, now);
            if state.is_inactive() {
                candidates.push(Candidate {
                    resource: state.resource.clone(),
                    last_lock_date: state.last_lock_date,
                });
            }
        }

        let evicted = cleanup::select_evictions(&self.config, &candidates, now, resident_memory);
        for resource in &evicted {
            table.remove(resource);
            self.publish(LockEvent::evicted(resource));
        }

        if !evicted.is_empty() {
            info!(
                method = %self.config.cleanup_method,
                evicted = evicted.len(),
                remaining = table.len(),
                "Evicted inactive lock records"
            );
        }
        evicted.len()
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();

        let task = lock_ignoring_poison(&self.cleanup_task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Cleanup loop ended abnormally");
            }
        }

        let mut failed = 0;
        {
            let mut table = self.table();
            for state in table.values_mut() {
                for waiter in state.queue.drain(..) {
                    let _ = waiter.tx.send(Err(LockError::ShuttingDown));
                    failed += 1;
                }
            }
        }
        info!(failed_requests = failed, "Lock manager shut down");
    }
}

impl LockReleaser for ManagerInner {
    fn release(&self, resource: &str, lock_id: Uuid) -> bool {
        let now = Utc::now();
        let mut table = self.table();
        let Some(state) = table.get_mut(resource) else {
            return false;
        };
        if !state.holder.as_ref().is_some_and(|h| h.lock_id == lock_id) {
            debug!(resource = %resource, "Release of a lock that is no longer held");
            return false;
        }

        if let Some(holder) = state.take_holder() {
            let held = (now - holder.locked_at).to_std().unwrap_or_default();
            info!(
                resource = %resource,
                requester = %holder.requester,
                held_ms = held.as_millis() as u64,
                "Lock released"
            );
            self.publish(LockEvent::released(resource, &holder.requester, held));
        }
        self.promote(state, now);
        true
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Clears the cleanup flag when a pass ends, even by panic
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A queued request that has not been settled yet
///
/// If the `lock` future is dropped mid-wait, the request is pulled from the
/// queue; a grant that already arrived is released again.
struct PendingWait {
    manager: Weak<ManagerInner>,
    resource: String,
    waiter_id: Uuid,
    rx: oneshot::Receiver<LockResult<Grant>>,
    settled: bool,
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        if manager.withdraw(&self.resource, self.waiter_id).is_some() {
            debug!(resource = %self.resource, "Dropped lock request removed from queue");
            return;
        }
        if let Ok(Ok(grant)) = self.rx.try_recv() {
            debug!(resource = %self.resource, "Releasing lock granted to a dropped request");
            manager.release(&self.resource, grant.lock_id);
        }
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn validate_names(resource: &str, requester: &str) -> LockResult<()> {
    if resource.is_empty() {
        return Err(LockError::InvalidInput("resource name must not be empty".to_string()));
    }
    if requester.is_empty() {
        return Err(LockError::InvalidInput("requester must not be empty".to_string()));
    }
    Ok(())
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn elapsed(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LockConfig {
        LockConfig::default()
            .with_cleanup_method(CleanupMethod::Always)
            .with_cleanup_interval(Duration::from_secs(3600))
    }

    async fn create_test_manager() -> MemoryLockManager {
        MemoryLockManager::new(test_config()).expect("Failed to create manager")
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let manager = create_test_manager().await;

        let lock = manager
            .try_lock("orders", "worker-1", None, false)
            .await
            .unwrap()
            .into_lock()
            .expect("lock should be acquired");

        let record = manager.get("orders").await.unwrap();
        assert_eq!(record.locked_by.as_deref(), Some("worker-1"));
        assert!(record.locked_at.is_some());
        assert!(record.expiry_date.is_none());
        let last_lock_date = record.last_lock_date;
        assert!(last_lock_date.is_some());

        assert!(lock.unlock());

        let record = manager.get("orders").await.unwrap();
        assert!(record.locked_by.is_none());
        assert!(record.locked_at.is_none());
        assert_eq!(record.last_lock_date, last_lock_date);
    }

    #[tokio::test]
    async fn test_try_lock_denied_for_other_requester() {
        let manager = create_test_manager().await;

        let _held = manager.try_lock("orders", "worker-1", None, false).await.unwrap();
        let outcome = manager.try_lock("orders", "worker-2", None, false).await.unwrap();

        match outcome {
            TryLockOutcome::Denied { current } => {
                assert_eq!(current.locked_by.as_deref(), Some("worker-1"));
            }
            TryLockOutcome::Acquired(_) => panic!("second requester must be denied"),
        }
        assert!(manager.get_pending_requests("orders").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reentry_keeps_timers() {
        let manager = create_test_manager().await;

        let first = manager
            .try_lock("orders", "worker-1", Some(Duration::from_secs(60)), false)
            .await
            .unwrap()
            .into_lock()
            .unwrap();
        let second = manager
            .try_lock("orders", "worker-1", Some(Duration::from_secs(600)), false)
            .await
            .unwrap()
            .into_lock()
            .unwrap();

        assert_eq!(first.lock_id(), second.lock_id());
        assert_eq!(first.locked_at(), second.locked_at());
        assert_eq!(first.expiry_date(), second.expiry_date());
    }

    #[tokio::test]
    async fn test_stale_handle_does_not_release_new_holder() {
        let manager = create_test_manager().await;

        let stale = manager
            .try_lock("orders", "worker-1", None, false)
            .await
            .unwrap()
            .into_lock()
            .unwrap();
        assert!(manager.force_unlock("orders", false).await.unwrap());

        let _fresh = manager
            .try_lock("orders", "worker-1", None, false)
            .await
            .unwrap()
            .into_lock()
            .unwrap();

        assert!(!stale.unlock());
        let record = manager.get("orders").await.unwrap();
        assert_eq!(record.locked_by.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn test_empty_names_rejected() {
        let manager = create_test_manager().await;

        let err = manager.try_lock("", "worker-1", None, false).await.unwrap_err();
        assert!(matches!(err, LockError::InvalidInput(_)));

        let err = manager
            .lock("orders", "", LockOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unknown_resource_is_free() {
        let manager = create_test_manager().await;

        let record = manager.get("never-locked").await.unwrap();
        assert_eq!(record, LockRecord::free("never-locked"));
        assert!(manager
            .get_pending_requests("never-locked")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_dropped_wait_leaves_queue() {
        let manager = create_test_manager().await;
        let _held = manager.try_lock("orders", "worker-1", None, false).await.unwrap();

        let waiting = manager.lock("orders", "worker-2", LockOptions::new());
        let result = tokio::time::timeout(Duration::from_millis(50), waiting).await;
        assert!(result.is_err(), "request should still be waiting");

        assert!(manager.get_pending_requests("orders").await.unwrap().is_empty());
        assert_eq!(manager.get("orders").await.unwrap().pending_requests, 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_token() {
        let manager = create_test_manager().await;
        let token = CancellationToken::new();
        token.cancel();

        let err = manager
            .lock("orders", "worker-1", LockOptions::new().cancellation(token))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Cancelled { .. }));
        assert!(!manager.get("orders").await.unwrap().is_locked());
    }

    #[tokio::test]
    async fn test_operations_fail_after_shutdown() {
        let manager = create_test_manager().await;

        manager.shutdown().await;
        manager.shutdown().await;
        assert!(manager.is_shut_down());

        let err = manager.try_lock("orders", "worker-1", None, false).await.unwrap_err();
        assert!(matches!(err, LockError::ShuttingDown));
        let err = manager
            .lock("orders", "worker-1", LockOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::ShuttingDown));
        assert!(manager.get_pending_requests("orders").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_racing_shutdown_never_hangs() {
        for round in 0..50 {
            let manager = create_test_manager().await;
            let _held = manager
                .try_lock("orders", "holder", None, false)
                .await
                .unwrap()
                .into_lock()
                .unwrap();

            let waiters: Vec<_> = (0..8)
                .map(|i| {
                    let manager = manager.clone();
                    tokio::spawn(async move {
                        let requester = format!("worker-{}", i);
                        tokio::time::timeout(
                            Duration::from_secs(2),
                            manager.lock("orders", &requester, LockOptions::new()),
                        )
                        .await
                    })
                })
                .collect();
            if round % 2 == 0 {
                tokio::task::yield_now().await;
            }
            manager.shutdown().await;

            for waiter in waiters {
                let result = waiter.await.unwrap();
                let err = result
                    .unwrap_or_else(|_| panic!("lock call hung past shutdown in round {}", round))
                    .unwrap_err();
                assert!(matches!(err, LockError::ShuttingDown));
            }
            assert!(manager.get_pending_requests("orders").await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_events_published() {
        let manager = create_test_manager().await;
        let mut events = manager.subscribe();

        let lock = manager
            .try_lock("orders", "worker-1", None, false)
            .await
            .unwrap()
            .into_lock()
            .unwrap();
        lock.unlock();

        let first = events.recv().await.unwrap();
        assert_eq!(first.event_type, crate::locking::LockEventType::Acquired);
        let second = events.recv().await.unwrap();
        assert_eq!(second.event_type, crate::locking::LockEventType::Released);
        assert_eq!(second.requester.as_deref(), Some("worker-1"));
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let err = MemoryLockManager::new(test_config()).unwrap_err();
        assert!(matches!(err, LockError::InvalidConfig(_)));
    }
}
