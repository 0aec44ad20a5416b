//! Background cleanup of inactive lock records
//!
//! A record is inactive when nobody holds the lock and nobody is queued for
//! it. Only inactive records are ever evicted; which of them go depends on
//! the configured [`CleanupMethod`].

use chrono::{DateTime, Utc};
use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::manager::ManagerInner;
use super::record::rewind_by;
use super::types::{CleanupMethod, LockConfig};

/// An inactive record considered for eviction
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub resource: String,
    pub last_lock_date: Option<DateTime<Utc>>,
}

/// Pick the candidates to evict under the configured method
///
/// * `Always` evicts every candidate.
/// * `Amount` keeps the `cleanup_amount` most recently locked candidates.
/// * `Time` evicts candidates last locked at least `cleanup_max_age` ago;
///   candidates that were never locked count as infinitely old.
/// * `ProcessMemory` evicts every candidate while resident memory is above
///   the threshold, or when resident memory cannot be measured.
pub(crate) fn select_evictions(
    config: &LockConfig,
    candidates: &[Candidate],
    now: DateTime<Utc>,
    resident_memory: Option<u64>,
) -> Vec<String> {
    match config.cleanup_method {
        CleanupMethod::Always => candidates.iter().map(|c| c.resource.clone()).collect(),
        CleanupMethod::Amount => {
            if candidates.len() <= config.cleanup_amount {
                return Vec::new();
            }
            let mut oldest_first: Vec<&Candidate> = candidates.iter().collect();
            oldest_first.sort_by(|a, b| {
                a.last_lock_date
                    .cmp(&b.last_lock_date)
                    .then_with(|| a.resource.cmp(&b.resource))
            });
            let excess = candidates.len() - config.cleanup_amount;
            oldest_first
                .into_iter()
                .take(excess)
                .map(|c| c.resource.clone())
                .collect()
        }
        CleanupMethod::Time => {
            // None when the age reaches before the representable range
            let cutoff = rewind_by(now, config.cleanup_max_age);
            candidates
                .iter()
                .filter(|c| {
                    c.last_lock_date
                        .is_none_or(|last| cutoff.is_some_and(|cutoff| last <= cutoff))
                })
                .map(|c| c.resource.clone())
                .collect()
        }
        CleanupMethod::ProcessMemory => {
            let under_pressure =
                resident_memory.is_none_or(|bytes| bytes > config.memory_threshold_bytes);
            if under_pressure {
                candidates.iter().map(|c| c.resource.clone()).collect()
            } else {
                Vec::new()
            }
        }
    }
}

/// Resident set size of this process, where the platform exposes it
pub(crate) fn resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line
        .trim_start_matches("VmRSS:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()?;
    Some(kib * 1024)
}

/// Start the periodic cleanup loop
///
/// Each pass runs in its own task so a panicking pass is logged and the
/// loop carries on with the next tick.
pub(crate) fn spawn_cleanup_loop(
    runtime: &Handle,
    manager: Weak<ManagerInner>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let pass_runtime = runtime.clone();
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(manager) = manager.upgrade() else {
                break;
            };
            match pass_runtime.spawn(async move { manager.run_cleanup_pass() }).await {
                Ok(evicted) => debug!(evicted, "Cleanup pass finished"),
                Err(e) => warn!(error = %e, "Cleanup pass failed"),
            }
        }
        debug!("Cleanup loop stopped");
    })
}
