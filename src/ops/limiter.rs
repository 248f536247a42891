//! # Rate-limiter capability.
//!
//! The engine is datastore-agnostic: it does not know how capacity is
//! provisioned or shared, only how to ask for it. A [`RateLimiter`]
//! supplies three answers:
//!
//! - [`max_capacity`](RateLimiter::max_capacity) — the absolute ceiling;
//!   enqueue rejects any operation whose cost exceeds it.
//! - [`capacity`](RateLimiter::capacity) — the per-second capacity
//!   currently granted; each flush pass works with a slice of it
//!   proportional to the flush interval.
//! - [`give_me`](RateLimiter::give_me) — a non-blocking hint, called on
//!   the capacity tick with the engine's outstanding-cost target.
//!
//! Lifecycle ([`start`](RateLimiter::start)/[`stop`](RateLimiter::stop))
//! belongs to the embedding application; the engine never calls either.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared handle to a rate limiter.
pub type RateLimiterRef = Arc<dyn RateLimiter>;

/// Source of per-second capacity shared with (or granted to) the engine.
///
/// Attach one via [`Batcher::with_rate_limiter`](crate::Batcher::with_rate_limiter)
/// before starting the engine. Without a limiter every flush pass tries
/// to empty the buffer.
#[async_trait]
pub trait RateLimiter: Send + Sync + 'static {
    /// Absolute capacity ceiling. Operations costing more than this are
    /// rejected at enqueue.
    fn max_capacity(&self) -> u32;

    /// Per-second capacity currently available to the engine.
    fn capacity(&self) -> u32;

    /// Non-blocking request for `target` capacity over the next interval.
    fn give_me(&self, target: u32);

    /// Starts any background work the limiter needs (lease renewal,
    /// coordination). Managed by the embedding application, not the
    /// engine.
    async fn start(&self, token: CancellationToken) {
        let _ = token;
    }

    /// Stops background work started by [`start`](RateLimiter::start).
    fn stop(&self) {}
}
