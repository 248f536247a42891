//! # Watcher abstraction for batch processing.
//!
//! Defines the core [`Watcher`] trait for the short-lived receivers that
//! process dispatched batches.
//!
//! - **[`Watcher`]** — trait implemented by batch handlers
//! - **[`WatcherRef`]** — shared handle (`Arc<dyn Watcher>`) for passing watchers across the engine
//! - **[`WatcherFn`]** — function-backed implementation that wraps closures as watchers
//!
//! ## Rules
//! - `process_batch` is invoked **once per dispatched batch**, on its own task.
//! - The engine does not interrupt a handler that outlives its timeout;
//!   it only stops accounting for it.
//! - One watcher instance is one batching identity: operations are grouped
//!   per watcher *instance*, so producers targeting the same backend must
//!   share the same `WatcherRef`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::operation::Operation;

/// Shared handle to a watcher object.
///
/// Type alias for `Arc<dyn Watcher>`, used throughout the engine for:
/// - Binding operations to their handler at construction
/// - Grouping operations into per-watcher batches
/// - Cloning watcher references cheaply into dispatched tasks
pub type WatcherRef = Arc<dyn Watcher>;

/// Receiver of dispatched batches.
///
/// A `Watcher` describes both the handler (`process_batch`) and the
/// batching limits the engine honors when forming batches for it.
#[async_trait]
pub trait Watcher: Send + Sync + 'static {
    /// Processes one dispatched batch.
    ///
    /// Runs on a dedicated task. The engine waits for completion or for
    /// the effective timeout, whichever comes first; on timeout the
    /// handler keeps running but its cost is reclaimed.
    async fn process_batch(&self, batch: Vec<Operation>);

    /// Maximum number of operations per batch. `0` means unlimited.
    fn max_batch_size(&self) -> u32 {
        0
    }

    /// Maximum number of dispatch attempts per operation before enqueue
    /// rejects it. `0` means unlimited.
    fn max_attempts(&self) -> u32 {
        0
    }

    /// Per-batch timeout for this watcher. Zero means "use the engine's
    /// [`Config::max_operation_time`](crate::Config::max_operation_time)".
    fn max_operation_time(&self) -> Duration {
        Duration::ZERO
    }
}

/// Function-backed watcher implementation.
///
/// Wraps a closure that *creates* a new future per batch, so there is no
/// shared mutable state between invocations; share state explicitly with
/// an `Arc` inside the closure when needed.
///
/// ## Example
/// ```rust
/// use batchvisor::{Operation, WatcherFn, WatcherRef};
///
/// let w: WatcherRef = WatcherFn::new(|batch: Vec<Operation>| async move {
///     for op in &batch {
///         // write op.payload() to the datastore...
///         let _ = op.cost();
///     }
/// })
/// .with_max_batch_size(25)
/// .arced();
///
/// assert_eq!(w.max_batch_size(), 25);
/// ```
pub struct WatcherFn<F> {
    f: F,
    max_batch_size: u32,
    max_attempts: u32,
    max_operation_time: Duration,
}

impl<F> WatcherFn<F> {
    /// Creates a new function-backed watcher with no batching limits.
    pub fn new(f: F) -> Self {
        Self {
            f,
            max_batch_size: 0,
            max_attempts: 0,
            max_operation_time: Duration::ZERO,
        }
    }

    /// Creates the watcher and returns it as a shared handle.
    ///
    /// Shorthand for `WatcherFn::new(f).arced()` when no limits are set.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }

    /// Caps the number of operations per batch (`0` = unlimited).
    pub fn with_max_batch_size(mut self, val: u32) -> Self {
        self.max_batch_size = val;
        self
    }

    /// Caps dispatch attempts per operation (`0` = unlimited).
    pub fn with_max_attempts(mut self, val: u32) -> Self {
        self.max_attempts = val;
        self
    }

    /// Overrides the engine's default per-batch timeout for this watcher.
    pub fn with_max_operation_time(mut self, val: Duration) -> Self {
        self.max_operation_time = val;
        self
    }

    /// Wraps the watcher in an `Arc`, ready to bind to operations.
    pub fn arced(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl<F, Fut> Watcher for WatcherFn<F>
where
    F: Fn(Vec<Operation>) -> Fut + Send + Sync + 'static, // Fn, not FnMut
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn process_batch(&self, batch: Vec<Operation>) {
        (self.f)(batch).await;
    }

    fn max_batch_size(&self) -> u32 {
        self.max_batch_size
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn max_operation_time(&self) -> Duration {
        self.max_operation_time
    }
}
