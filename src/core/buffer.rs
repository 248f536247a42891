//! # Bounded intake buffer with cursor traversal.
//!
//! The buffer is a FIFO of [`Operation`]s with two unusual requirements:
//!
//! - **Backpressure on enqueue**: producers either wait for space
//!   (semaphore permits) or get [`BatcherError::BufferFull`].
//! - **Cursor traversal**: the flush pass walks the buffer making
//!   per-item decisions. [`top`](Buffer::top) resets the cursor to the
//!   head; [`remove`](Buffer::remove) drops the cursor element and
//!   advances; [`skip`](Buffer::skip) advances without dropping, leaving
//!   the element for a later flush. There is exactly one logical cursor;
//!   `remove`/`skip` are only meaningful after `top`.
//!
//! Skipping is what lets the dispatcher pass over operations whose
//! watcher has no admission slot without losing them or stalling the
//! rest of the pass.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Semaphore;

use crate::error::BatcherError;
use crate::ops::Operation;

/// Bounded FIFO of operations with cursor-based traversal.
///
/// Individually thread-safe: producers enqueue concurrently while the
/// dispatcher walks the cursor.
pub(crate) struct Buffer {
    max: u32,
    space: Semaphore,
    inner: Mutex<Inner>,
}

struct Inner {
    items: VecDeque<Operation>,
    cursor: usize,
}

impl Buffer {
    pub(crate) fn new(max: u32) -> Self {
        Self {
            max,
            space: Semaphore::new(max as usize),
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                cursor: 0,
            }),
        }
    }

    /// Inserts at the tail.
    ///
    /// With `error_on_full` the call fails fast on a full buffer;
    /// otherwise it waits until a slot frees up.
    pub(crate) async fn enqueue(
        &self,
        op: Operation,
        error_on_full: bool,
    ) -> Result<(), BatcherError> {
        let permit = if error_on_full {
            self.space
                .try_acquire()
                .map_err(|_| BatcherError::BufferFull)?
        } else {
            // the semaphore is never closed, so acquire can only succeed
            self.space
                .acquire()
                .await
                .map_err(|_| BatcherError::BufferFull)?
        };
        // the permit is restored on remove()/clear()
        permit.forget();

        self.locked().items.push_back(op);
        Ok(())
    }

    /// Resets the cursor to the head and returns the head element.
    pub(crate) fn top(&self) -> Option<Operation> {
        let mut inner = self.locked();
        inner.cursor = 0;
        inner.items.front().cloned()
    }

    /// Drops the cursor element, advances, and returns the new cursor
    /// element.
    pub(crate) fn remove(&self) -> Option<Operation> {
        let mut inner = self.locked();
        let cursor = inner.cursor;
        if cursor < inner.items.len() {
            inner.items.remove(cursor);
            self.space.add_permits(1);
        }
        inner.items.get(inner.cursor).cloned()
    }

    /// Advances past the cursor element without dropping it and returns
    /// the new cursor element.
    pub(crate) fn skip(&self) -> Option<Operation> {
        let mut inner = self.locked();
        if inner.cursor < inner.items.len() {
            inner.cursor += 1;
        }
        inner.items.get(inner.cursor).cloned()
    }

    /// Number of operations currently buffered.
    pub(crate) fn size(&self) -> u32 {
        self.locked().items.len() as u32
    }

    /// Discards all items and invalidates the cursor.
    pub(crate) fn clear(&self) {
        let mut inner = self.locked();
        let drained = inner.items.len();
        inner.items.clear();
        inner.cursor = 0;
        self.space.add_permits(drained);
    }

    /// No code path panics while the buffer lock is held (plain
    /// `VecDeque` edits and cursor arithmetic; allocation failure aborts
    /// rather than unwinds), so a poisoned guard still holds consistent
    /// state. Recover it instead of killing the dispatcher.
    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configured capacity.
    pub(crate) fn max(&self) -> u32 {
        self.max
    }
}
