//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by the dispatcher and the
//! per-batch tasks.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: the dispatcher loop (lifecycle, audit, capacity,
//!   flush markers) and batch dispatch (`Batch` events).
//! - **Consumers**: [`Batcher::subscribe`](crate::Batcher::subscribe)
//!   receivers and the subscriber listener that fans out to the
//!   [`SubscriberSet`](crate::subscribers::SubscriberSet).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{
    Event, EventKind, AUDIT_MSG_INFLIGHT, AUDIT_MSG_TARGET, AUDIT_MSG_TARGET_AND_INFLIGHT,
};
