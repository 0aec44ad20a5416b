//! Lock events
//!
//! The manager publishes one event per state transition on a broadcast
//! channel. Subscribers that fall behind lose the oldest events; publishing
//! never waits on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Type of lock event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockEventType {
    /// A free resource was locked directly
    Acquired,
    /// The holder locked its own resource again
    Reentered,
    /// A request joined a wait queue
    Queued,
    /// The head of a wait queue was promoted to holder
    GrantedFromQueue,
    /// The holder released the lock
    Released,
    /// The hold ran past its expiry date
    Expired,
    /// A keep-alive lease pushed the expiry date forward
    Renewed,
    /// A queued request gave up waiting
    TimedOut,
    /// A queued request was cancelled by its caller
    Cancelled,
    /// The lock was cleared administratively
    ForceUnlocked,
    /// An inactive record was removed by a cleanup pass
    Evicted,
}

impl LockEventType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::Reentered => "reentered",
            Self::Queued => "queued",
            Self::GrantedFromQueue => "granted_from_queue",
            Self::Released => "released",
            Self::Expired => "expired",
            Self::Renewed => "renewed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::ForceUnlocked => "force_unlocked",
            Self::Evicted => "evicted",
        }
    }
}

impl std::fmt::Display for LockEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lock event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// The resource the event concerns
    pub resource: String,
    /// The requester involved, when there is one
    pub requester: Option<String>,
    /// Type of event
    pub event_type: LockEventType,
    /// Event data
    pub data: Option<serde_json::Value>,
    /// When the event occurred
    pub created_at: DateTime<Utc>,
}

impl LockEvent {
    /// Create a new lock event
    pub fn new(
        resource: &str,
        requester: Option<&str>,
        event_type: LockEventType,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource: resource.to_string(),
            requester: requester.map(str::to_string),
            event_type,
            data,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn acquired(resource: &str, requester: &str, lock_id: Uuid) -> Self {
        let data = serde_json::json!({ "lock_id": lock_id });
        Self::new(resource, Some(requester), LockEventType::Acquired, Some(data))
    }

    pub(crate) fn reentered(resource: &str, requester: &str) -> Self {
        Self::new(resource, Some(requester), LockEventType::Reentered, None)
    }

    pub(crate) fn queued(resource: &str, requester: &str, position: usize) -> Self {
        let data = serde_json::json!({ "position": position });
        Self::new(resource, Some(requester), LockEventType::Queued, Some(data))
    }

    pub(crate) fn granted_from_queue(resource: &str, requester: &str, waited: Duration) -> Self {
        let data = serde_json::json!({ "waited_ms": waited.as_millis() as u64 });
        Self::new(resource, Some(requester), LockEventType::GrantedFromQueue, Some(data))
    }

    pub(crate) fn released(resource: &str, requester: &str, held: Duration) -> Self {
        let data = serde_json::json!({ "held_ms": held.as_millis() as u64 });
        Self::new(resource, Some(requester), LockEventType::Released, Some(data))
    }

    pub(crate) fn expired(resource: &str, requester: &str) -> Self {
        Self::new(resource, Some(requester), LockEventType::Expired, None)
    }

    pub(crate) fn renewed(resource: &str, requester: &str, expiry_date: DateTime<Utc>) -> Self {
        let data = serde_json::json!({ "expiry_date": expiry_date });
        Self::new(resource, Some(requester), LockEventType::Renewed, Some(data))
    }

    pub(crate) fn timed_out(resource: &str, requester: &str, timeout: Duration) -> Self {
        let data = serde_json::json!({ "timeout_ms": timeout.as_millis() as u64 });
        Self::new(resource, Some(requester), LockEventType::TimedOut, Some(data))
    }

    pub(crate) fn cancelled(resource: &str, requester: &str) -> Self {
        Self::new(resource, Some(requester), LockEventType::Cancelled, None)
    }

    pub(crate) fn force_unlocked(
        resource: &str,
        previous_holder: Option<&str>,
        cleared_requests: usize,
    ) -> Self {
        let data = serde_json::json!({ "cleared_requests": cleared_requests });
        Self::new(resource, previous_holder, LockEventType::ForceUnlocked, Some(data))
    }

    pub(crate) fn evicted(resource: &str) -> Self {
        Self::new(resource, None, LockEventType::Evicted, None)
    }
}
