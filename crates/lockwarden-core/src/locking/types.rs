//! Lock types, options and error definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use super::record::{offset_by, rewind_by, LockRecord};

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Lock errors
///
/// Contention is not represented here: a denied `try_lock` is a normal
/// outcome, see [`TryLockOutcome`](super::provider::TryLockOutcome).
#[derive(Error, Debug, Clone)]
pub enum LockError {
    /// A queued request was not granted within its wait budget
    #[error(
        "Lock timeout: '{requester}' waited {timeout:?} for resource '{resource}' (held by {holder})",
        holder = .current.locked_by.as_deref().unwrap_or("nobody")
    )]
    Timeout {
        resource: String,
        requester: String,
        timeout: Duration,
        /// Lock state observed when the request gave up
        current: Box<LockRecord>,
    },

    /// The caller's cancellation token fired while the request was queued
    #[error("Lock request for resource '{resource}' by '{requester}' was cancelled")]
    Cancelled { resource: String, requester: String },

    /// The request was drained from the queue by a force unlock
    #[error("Lock request for resource '{resource}' by '{requester}' was cleared by a force unlock")]
    ForceUnlocked { resource: String, requester: String },

    /// The manager has been shut down
    #[error("Lock manager is shutting down")]
    ShuttingDown,

    /// Invalid lock manager configuration
    #[error("Invalid lock configuration: {0}")]
    InvalidConfig(String),

    /// Invalid argument passed to a lock operation
    #[error("Invalid lock input: {0}")]
    InvalidInput(String),
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "E300",
            Self::Cancelled { .. } => "E301",
            Self::ForceUnlocked { .. } => "E302",
            Self::ShuttingDown => "E303",
            Self::InvalidConfig(_) => "E304",
            Self::InvalidInput(_) => "E305",
        }
    }

    /// Hint for resolving the error, if there is one
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Timeout { .. } => Some("Retry with a longer timeout".to_string()),
            Self::InvalidConfig(_) => Some("lockwarden config list".to_string()),
            _ => None,
        }
    }

    /// Whether the error came from a queued request being removed
    pub fn is_wait_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Cancelled { .. } | Self::ForceUnlocked { .. }
        )
    }
}

/// Policy used by the background cleanup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupMethod {
    /// Evict every inactive record on every pass
    Always,
    /// Keep at most `cleanup_amount` inactive records, evicting the oldest
    Amount,
    /// Evict inactive records whose last lock is older than `cleanup_max_age`
    #[default]
    Time,
    /// Evict every inactive record while process memory is above the threshold
    ProcessMemory,
}

impl CleanupMethod {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Amount => "amount",
            Self::Time => "time",
            Self::ProcessMemory => "process_memory",
        }
    }
}

impl fmt::Display for CleanupMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CleanupMethod {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "amount" => Ok(Self::Amount),
            "time" => Ok(Self::Time),
            "process_memory" | "processmemory" | "memory" => Ok(Self::ProcessMemory),
            other => Err(LockError::InvalidConfig(format!(
                "unknown cleanup method '{}' (expected always, amount, time or process_memory)",
                other
            ))),
        }
    }
}

/// Configuration for the lock manager
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Eviction policy for inactive records
    pub cleanup_method: CleanupMethod,

    /// How often the cleanup pass runs
    pub cleanup_interval: Duration,

    /// Inactive records retained under [`CleanupMethod::Amount`]
    pub cleanup_amount: usize,

    /// Age threshold under [`CleanupMethod::Time`]
    pub cleanup_max_age: Duration,

    /// Resident memory above which [`CleanupMethod::ProcessMemory`] evicts
    pub memory_threshold_bytes: u64,

    /// Grace period added to an expiry date before the lock counts as expired
    pub expiry_offset: Duration,

    /// Capacity of the lock event broadcast channel
    pub event_capacity: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            cleanup_method: CleanupMethod::Time,
            cleanup_interval: Duration::from_secs(60),
            cleanup_amount: 1000,
            cleanup_max_age: Duration::from_secs(600), // 10 minutes
            memory_threshold_bytes: 512 * 1024 * 1024,
            expiry_offset: Duration::ZERO,
            event_capacity: 256,
        }
    }
}

impl LockConfig {
    /// Set the cleanup method
    pub fn with_cleanup_method(mut self, method: CleanupMethod) -> Self {
        self.cleanup_method = method;
        self
    }

    /// Set the cleanup interval
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the number of inactive records kept by [`CleanupMethod::Amount`]
    pub fn with_cleanup_amount(mut self, amount: usize) -> Self {
        self.cleanup_amount = amount;
        self
    }

    /// Set the age threshold used by [`CleanupMethod::Time`]
    pub fn with_cleanup_max_age(mut self, age: Duration) -> Self {
        self.cleanup_max_age = age;
        self
    }

    /// Set the memory threshold used by [`CleanupMethod::ProcessMemory`]
    pub fn with_memory_threshold(mut self, bytes: u64) -> Self {
        self.memory_threshold_bytes = bytes;
        self
    }

    /// Set the expiry grace period
    pub fn with_expiry_offset(mut self, offset: Duration) -> Self {
        self.expiry_offset = offset;
        self
    }

    /// Check the options before a manager is built from them
    pub fn validate(&self) -> LockResult<()> {
        if self.cleanup_interval.is_zero() {
            return Err(LockError::InvalidConfig(
                "cleanup interval must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(LockError::InvalidConfig(
                "event capacity must be greater than zero".to_string(),
            ));
        }
        // Both are added to and subtracted from timestamps near now
        let now = chrono::Utc::now();
        for (name, duration) in [
            ("cleanup max age", self.cleanup_max_age),
            ("expiry offset", self.expiry_offset),
        ] {
            if offset_by(now, duration).is_none() || rewind_by(now, duration).is_none() {
                return Err(LockError::InvalidConfig(format!(
                    "{} of {:?} is out of range",
                    name, duration
                )));
            }
        }
        Ok(())
    }
}
