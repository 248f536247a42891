//! # Runtime events emitted by the dispatcher.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Lifecycle events**: shutdown, pause, resume
//! - **Audit events**: the periodic target/in-flight consistency check
//! - **Capacity events**: requests made to the attached rate limiter
//! - **Flush events**: per-flush and per-batch markers (testing only)
//!
//! The [`Event`] struct carries a numeric value, a message, and for
//! `Batch` events the dispatched operations themselves.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so events can be ordered correctly even when delivered
//! out-of-order through async channels.
//!
//! ## Example
//! ```rust
//! use batchvisor::{Event, EventKind};
//!
//! let ev = Event::now(EventKind::Request).with_value(250);
//!
//! assert_eq!(ev.kind, EventKind::Request);
//! assert_eq!(ev.value, Some(250));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::ops::Operation;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Message attached to an audit failure where both counters were dirty.
pub const AUDIT_MSG_TARGET_AND_INFLIGHT: &str =
    "an audit revealed that the target and inflight should both be zero but neither was";

/// Message attached to an audit failure where only the target was dirty.
pub const AUDIT_MSG_TARGET: &str =
    "an audit revealed that the target should be zero but was not";

/// Message attached to an audit failure where only inflight was dirty.
pub const AUDIT_MSG_INFLIGHT: &str =
    "an audit revealed that inflight should be zero but was not";

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Lifecycle events ===
    /// The dispatcher has torn down; the buffer was cleared. Emitted
    /// exactly once, as the last event of the engine's life.
    Shutdown,
    /// The dispatcher is about to sleep for the pause dwell time.
    /// `value` carries the dwell in milliseconds.
    Pause,
    /// The pause dwell elapsed and the dispatcher resumed.
    Resume,

    // === Audit events ===
    /// The idle-engine audit found target and in-flight both zero.
    AuditPass,
    /// The audit did not run because the engine was not quiescent
    /// (buffer non-empty or a recent flush).
    AuditSkip,
    /// The audit found a non-zero target and reset it.
    AuditFailTarget,
    /// The audit found residual in-flight reservations and drained them.
    AuditFailInflight,
    /// The audit found both counters dirty and reset both.
    AuditFailTargetAndInflight,

    // === Capacity events ===
    /// Capacity was requested from the rate limiter. `value` carries the
    /// requested amount.
    Request,

    // === Flush events (testing only) ===
    /// A flush pass began.
    FlushStart,
    /// A flush pass completed.
    FlushDone,
    /// A batch was dispatched. `value` carries the batch size and
    /// `batch` the operations themselves.
    Batch,
}

/// Runtime event with optional metadata.
///
/// ## Fields
/// - `seq`: Unique sequence number for ordering (monotonically increasing)
/// - `at`: Wall-clock timestamp (may go backwards due to NTP, use for logging only)
/// - `kind`: Event classification
/// - `value`, `message`, `batch`: Optional payload
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Numeric payload: pause dwell in ms, requested capacity, batch size.
    pub value: Option<u64>,
    /// Human-readable detail, e.g. the audit failure messages.
    pub message: Option<String>,
    /// Dispatched operations, populated for `Batch` events.
    pub batch: Option<Vec<Operation>>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp
    /// and next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            value: None,
            message: None,
            batch: None,
        }
    }

    /// Attaches a numeric value.
    pub fn with_value(mut self, value: u64) -> Self {
        self.value = Some(value);
        self
    }

    /// Attaches a message.
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Attaches the dispatched operations.
    pub fn with_batch(mut self, batch: Vec<Operation>) -> Self {
        self.batch = Some(batch);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_attach_payload() {
        let ev = Event::now(EventKind::AuditFailTarget)
            .with_value(7)
            .with_message(AUDIT_MSG_TARGET);
        assert_eq!(ev.kind, EventKind::AuditFailTarget);
        assert_eq!(ev.value, Some(7));
        assert_eq!(ev.message.as_deref(), Some(AUDIT_MSG_TARGET));
        assert!(ev.batch.is_none());
    }

    #[test]
    fn seq_is_monotonic() {
        let a = Event::now(EventKind::FlushStart);
        let b = Event::now(EventKind::FlushDone);
        assert!(b.seq > a.seq);
    }
}
