//! # batchvisor
//!
//! **Batchvisor** is a datastore-agnostic batching and admission-control
//! engine.
//!
//! Producers submit small operations targeted at a backend with a known
//! per-second capacity budget (for example, a provisioned cloud
//! database). The engine groups them into per-watcher batches and
//! releases those under rate and concurrency limits, while keeping an
//! accurate running estimate of outstanding demand so capacity can be
//! requested from an external rate limiter.
//!
//! ## Features
//!
//! | Area              | Description                                                            | Key types / traits                 |
//! |-------------------|------------------------------------------------------------------------|------------------------------------|
//! | **Batching**      | Bounded intake buffer, per-watcher batch formation, manual flush.      | [`Batcher`], [`Operation`]         |
//! | **Admission**     | Cap on concurrent in-flight batches; skipped items are revisited.      | [`Config::max_concurrent_batches`] |
//! | **Rate limiting** | Per-interval capacity slices and demand reporting to an external limiter. | [`RateLimiter`]                 |
//! | **Watchers**      | Batch handlers with per-watcher size/attempt/timeout limits.           | [`Watcher`], [`WatcherFn`]         |
//! | **Self-audit**    | Idle-time reconciliation of leaked demand and reservations.            | [`EventKind`] audit events         |
//! | **Observability** | Broadcast event bus plus non-blocking subscriber fan-out.              | [`Event`], [`Subscribe`]           |
//! | **Errors**        | Typed rejections for enqueue and lifecycle misuse.                     | [`BatcherError`]                   |
//!
//! ```no_run
//! use batchvisor::{Batcher, Config, Operation, WatcherFn};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.max_concurrent_batches = 4;
//!
//!     let batcher = Batcher::new(cfg, Vec::new());
//!     batcher.start()?;
//!
//!     // One watcher per batching identity, shared by its producers.
//!     let writes = WatcherFn::new(|batch: Vec<Operation>| async move {
//!         for op in &batch {
//!             let row = op.payload().downcast_ref::<String>();
//!             // write row to the datastore...
//!             let _ = row;
//!         }
//!     })
//!     .with_max_batch_size(25)
//!     .arced();
//!
//!     for id in 0..100u32 {
//!         let op = Operation::new(writes.clone(), 1, format!("row-{id}"), true);
//!         batcher.enqueue(op).await?;
//!     }
//!
//!     batcher.flush();
//!     batcher.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod config;
mod core;
mod error;

pub mod events;
pub mod ops;
pub mod subscribers;

// ---- Public re-exports ----

pub use crate::core::Batcher;
pub use config::Config;
pub use error::BatcherError;
pub use events::{Bus, Event, EventKind};
pub use ops::{Operation, RateLimiter, RateLimiterRef, Watcher, WatcherFn, WatcherRef};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
