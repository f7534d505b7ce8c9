//! Cached device status
//!
//! A gateway publishes the outcome of its most recent device operation
//! through a [`StatusCell`]. Readers never touch the gateway's exclusive
//! I/O lock: the cell is a `watch` channel whose value is replaced after
//! every operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Reason attached to a [`Status::Bad`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadReason {
    DecodingError,
    UnknownResponse,
    InternalError,
    Timeout,
    NotConnected,
}

impl BadReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BadReason::DecodingError => "decoding_error",
            BadReason::UnknownResponse => "unknown_response",
            BadReason::InternalError => "internal_error",
            BadReason::Timeout => "timeout",
            BadReason::NotConnected => "not_connected",
        }
    }
}

/// Outcome of the most recent device operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Status {
    Good,
    /// Not yet attempted, or an operation is in flight
    Uncertain,
    Bad(BadReason),
}

impl Status {
    pub fn is_good(&self) -> bool {
        matches!(self, Status::Good)
    }

    pub fn is_bad(&self) -> bool {
        matches!(self, Status::Bad(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Good => write!(f, "Good"),
            Status::Uncertain => write!(f, "Uncertain"),
            Status::Bad(reason) => write!(f, "Bad({})", reason.as_str()),
        }
    }
}

/// Status plus bookkeeping, as exposed to health checks and the HTTP API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: Status,
    /// When `status` last changed value
    pub since: DateTime<Utc>,
    /// When the snapshot was last written
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub total_operations: u64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            status: Status::Uncertain,
            since: now,
            updated_at: now,
            last_error: None,
            consecutive_failures: 0,
            total_operations: 0,
        }
    }
}

/// Single-writer, many-reader holder of a gateway's status
#[derive(Debug)]
pub struct StatusCell {
    tx: watch::Sender<StatusSnapshot>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::default());
        Self { tx }
    }

    /// Current status; never blocks on device I/O
    pub fn current(&self) -> Status {
        self.tx.borrow().status
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    /// Mark an operation as in flight
    pub fn begin(&self) {
        self.tx.send_modify(|s| {
            Self::transition(s, Status::Uncertain);
        });
    }

    /// Record a successful operation
    pub fn succeed(&self) {
        self.tx.send_modify(|s| {
            Self::transition(s, Status::Good);
            s.last_error = None;
            s.consecutive_failures = 0;
            s.total_operations = s.total_operations.saturating_add(1);
        });
    }

    /// Record a failed operation
    pub fn fail(&self, reason: BadReason, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|s| {
            Self::transition(s, Status::Bad(reason));
            s.last_error = Some(message);
            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
            s.total_operations = s.total_operations.saturating_add(1);
        });
    }

    /// Force a status without counting an operation (startup, shutdown)
    pub fn set(&self, status: Status) {
        self.tx.send_modify(|s| Self::transition(s, status));
    }

    fn transition(s: &mut StatusSnapshot, next: Status) {
        let now = Utc::now();
        if s.status != next {
            s.since = now;
        }
        s.status = next;
        s.updated_at = now;
    }
}
