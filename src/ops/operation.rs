//! # The unit of work submitted to the engine.
//!
//! An [`Operation`] bundles a cost, a batchable flag, an opaque payload,
//! and a handle to the [`Watcher`](crate::Watcher) that will process it.
//! Operations are immutable after enqueue with one exception: the attempt
//! counter is incremented exactly once when the batch containing the
//! operation is dispatched.
//!
//! `Operation` is a cheap-to-clone handle over shared state, so the same
//! operation can sit in the buffer, travel inside a dispatched batch, and
//! appear in a `Batch` event without copying its payload.
//!
//! ## Example
//! ```rust
//! use batchvisor::{Operation, WatcherFn};
//!
//! let watcher = WatcherFn::arc(|_batch: Vec<Operation>| async {});
//! let op = Operation::new(watcher, 5, "row-17", true);
//!
//! assert_eq!(op.cost(), 5);
//! assert!(op.is_batchable());
//! assert_eq!(op.attempt(), 0);
//! assert_eq!(op.payload().downcast_ref::<&str>(), Some(&"row-17"));
//! ```

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

use super::watcher::WatcherRef;

/// A unit of work with a cost and a target watcher.
///
/// Cloning an `Operation` clones a handle; all clones share the same
/// attempt counter and payload.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationInner>,
}

struct OperationInner {
    cost: u32,
    batchable: bool,
    attempt: AtomicU32,
    watcher: WatcherRef,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Operation {
    /// Creates a new operation bound to a watcher.
    ///
    /// ### Parameters
    /// - `watcher`: handler that will receive the batch containing this operation
    /// - `cost`: scalar cost counted against the capacity budget
    /// - `payload`: opaque value the watcher downcasts in `process_batch`
    /// - `batchable`: whether the operation may share a batch with others
    pub fn new(
        watcher: WatcherRef,
        cost: u32,
        payload: impl Any + Send + Sync,
        batchable: bool,
    ) -> Self {
        Self {
            inner: Arc::new(OperationInner {
                cost,
                batchable,
                attempt: AtomicU32::new(0),
                watcher,
                payload: Arc::new(payload),
            }),
        }
    }

    /// Scalar cost of the operation.
    pub fn cost(&self) -> u32 {
        self.inner.cost
    }

    /// Whether the operation may be grouped with others for its watcher.
    pub fn is_batchable(&self) -> bool {
        self.inner.batchable
    }

    /// How many times the operation has been dispatched as part of a batch.
    pub fn attempt(&self) -> u32 {
        self.inner.attempt.load(AtomicOrdering::Acquire)
    }

    /// The watcher that processes batches containing this operation.
    pub fn watcher(&self) -> &WatcherRef {
        &self.inner.watcher
    }

    /// The opaque payload; watchers downcast it to their concrete type.
    pub fn payload(&self) -> &(dyn Any + Send + Sync) {
        self.inner.payload.as_ref()
    }

    /// Records one dispatch attempt. Called once per dispatched batch.
    pub(crate) fn make_attempt(&self) {
        self.inner.attempt.fetch_add(1, AtomicOrdering::AcqRel);
    }

    /// Stable key identifying the watcher instance, used to group
    /// operations into per-watcher batches during a flush pass.
    pub(crate) fn watcher_key(&self) -> usize {
        Arc::as_ptr(&self.inner.watcher) as *const () as usize
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("cost", &self.cost())
            .field("batchable", &self.is_batchable())
            .field("attempt", &self.attempt())
            .finish_non_exhaustive()
    }
}
