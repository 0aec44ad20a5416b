//! Expiry and keep-alive tasks
//!
//! Every acquisition with an expiry gets one lease task. Without keep-alive
//! the task sleeps until the expiry date (plus the configured offset) and
//! then releases the lock, promoting the next waiter. With keep-alive it
//! pushes the expiry date forward every half period instead.
//!
//! The task only ever acts on the acquisition id it was started for, and
//! all checks happen under the manager's table lock, so a lease can never
//! renew or expire a lock that was released and granted to someone else.

use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::manager::ManagerInner;

/// Shortest sleep between lease checks
const MIN_LEASE_WAIT: Duration = Duration::from_millis(1);

/// How often a keep-alive lease renews a lock of duration `expiry`
pub(crate) fn renew_interval(expiry: Duration) -> Duration {
    (expiry / 2).max(MIN_LEASE_WAIT)
}

/// Start the lease task for one acquisition
pub(crate) fn spawn_lease(
    runtime: &Handle,
    manager: Weak<ManagerInner>,
    resource: String,
    lock_id: Uuid,
    first_wait: Duration,
    token: CancellationToken,
) {
    runtime.spawn(async move {
        let mut wait = first_wait;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait.max(MIN_LEASE_WAIT)) => {}
            }

            let Some(manager) = manager.upgrade() else {
                break;
            };
            match manager.lease_tick(&resource, lock_id) {
                Some(next) => wait = next,
                None => break,
            }
        }
        debug!(resource = %resource, lock_id = %lock_id, "Lease task stopped");
    });
}
