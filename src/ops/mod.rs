//! # Work items and the capabilities they are bound to.
//!
//! This module groups the engine's data plane:
//! - [`Operation`] the unit of work (cost, batchable flag, payload)
//! - [`Watcher`] / [`WatcherRef`] / [`WatcherFn`] the batch handlers
//! - [`RateLimiter`] / [`RateLimiterRef`] the capacity source
//!
//! Watchers and rate limiters are **external capabilities**: the engine
//! calls them but never implements them. Implement [`Watcher`] per
//! datastore table/stream, or wrap a closure with [`WatcherFn`].

mod limiter;
mod operation;
mod watcher;

pub use limiter::{RateLimiter, RateLimiterRef};
pub use operation::Operation;
pub use watcher::{Watcher, WatcherFn, WatcherRef};
