//! # Error types surfaced by the batching engine.
//!
//! [`BatcherError`] covers every failure a producer or embedder can see:
//! enqueue rejections (`TooExpensive`, `TooManyAttempts`, `BufferFull`)
//! and lifecycle misuse (`ImproperOrder`, `BufferNotAllocated`).
//!
//! The engine never retries on behalf of the producer; every error is
//! terminal at its call site and it is up to the caller to re-submit.
//! Audit failures are not errors: they are signaled via events and
//! self-corrected.

use thiserror::Error;

/// # Errors produced by the batching engine.
///
/// Enqueue rejections leave the engine running; lifecycle errors indicate
/// the caller used the API out of order.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BatcherError {
    /// The operation's cost exceeds the rate limiter's absolute ceiling;
    /// it could never be dispatched.
    #[error("operation cost {cost} exceeds the rate limiter max capacity {max}")]
    TooExpensive {
        /// Cost declared by the rejected operation.
        cost: u32,
        /// The rate limiter's `max_capacity()`.
        max: u32,
    },

    /// The operation has already been attempted as many times as its
    /// watcher allows.
    #[error("operation attempted {attempt} times; watcher allows {max}")]
    TooManyAttempts {
        /// Attempts recorded on the rejected operation.
        attempt: u32,
        /// The watcher's `max_attempts()`.
        max: u32,
    },

    /// The buffer is at capacity and the engine was configured with
    /// [`Config::error_on_full_buffer`](crate::Config::error_on_full_buffer).
    #[error("the buffer is full")]
    BufferFull,

    /// `start` was called when the engine was not in the uninitialized
    /// phase. The engine cannot be started twice or restarted after stop.
    #[error("start called out of order; the engine was already started or stopped")]
    ImproperOrder,

    /// `start` was called with an absent or zero-capacity buffer.
    #[error("the buffer was not allocated; a non-zero buffer capacity is required")]
    BufferNotAllocated,

    /// A panic elsewhere poisoned one of the engine's internal locks;
    /// the state behind it can no longer be trusted.
    #[error("engine lock '{what}' was poisoned")]
    Poisoned {
        /// Which lock was found poisoned.
        what: &'static str,
    },
}

impl BatcherError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BatcherError::TooExpensive { .. } => "enqueue_too_expensive",
            BatcherError::TooManyAttempts { .. } => "enqueue_too_many_attempts",
            BatcherError::BufferFull => "enqueue_buffer_full",
            BatcherError::ImproperOrder => "start_improper_order",
            BatcherError::BufferNotAllocated => "start_buffer_not_allocated",
            BatcherError::Poisoned { .. } => "engine_lock_poisoned",
        }
    }
}
