//! # Engine internals.
//!
//! The pieces the dispatcher integrates, leaves first:
//!
//! - [`buffer`] bounded FIFO with cursor traversal and backpressure
//! - [`target`] saturating accumulator of outstanding cost
//! - [`admission`] bounded counter of concurrent in-flight batches
//! - [`dispatcher`] the select loop and flush pass
//! - [`batcher`] the public handle and lifecycle phase machine
//!
//! Only [`Batcher`] is exported; everything else is wiring.

mod admission;
mod batcher;
mod buffer;
mod dispatcher;
mod target;

pub use batcher::Batcher;
