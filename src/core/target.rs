//! # Outstanding-cost target.
//!
//! The target is the engine's running estimate of how much capacity it
//! needs: the summed cost of everything buffered plus everything in
//! flight. Enqueue increments it; batch completion (or timeout)
//! decrements it; the capacity tick reports it to the rate limiter.
//!
//! Underflow saturates at zero instead of panicking; a leaked
//! completion is preferred over a negative outstanding cost, and the
//! audit resets any residue via [`confirm_zero`](Target::confirm_zero).

use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

/// Saturating, thread-safe accumulator of outstanding cost.
pub(crate) struct Target(AtomicI64);

impl Target {
    pub(crate) fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    /// Adds `delta` (which may be negative), clamping at zero.
    pub(crate) fn add(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        // fetch_update loops on contention; the closure stays pure
        let _ = self.0.fetch_update(
            AtomicOrdering::AcqRel,
            AtomicOrdering::Acquire,
            |cur| Some((cur + delta).max(0)),
        );
    }

    /// Current target, for `needs_capacity()` and the capacity tick.
    pub(crate) fn get(&self) -> u32 {
        self.0.load(AtomicOrdering::Acquire).max(0) as u32
    }

    /// Returns true iff the target was already zero; otherwise resets it
    /// to zero and returns false. The audit's corrective action.
    pub(crate) fn confirm_zero(&self) -> bool {
        self.0.swap(0, AtomicOrdering::AcqRel) == 0
    }
}
