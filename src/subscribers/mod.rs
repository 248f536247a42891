//! # Event subscribers for the batching engine.
//!
//! This module provides the [`Subscribe`] trait and built-in
//! implementations for handling runtime events broadcast through the
//! [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Dispatcher ── publish(Event) ──► Bus ──► broadcast to receivers
//!                                              │
//!                                              ├──► Batcher::subscribe() receivers
//!                                              │
//!                                              └──► SubscriberSet::listen() lanes
//!                                                        │
//!                                                   ┌────┴──────┬────────┐
//!                                                   ▼           ▼        ▼
//!                                                LogWriter   Metrics  Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use batchvisor::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct MetricsSubscriber;
//!
//! #[async_trait]
//! impl Subscribe for MetricsSubscriber {
//!     async fn on_event(&self, event: &Event) {
//!         match event.kind {
//!             EventKind::AuditFailTarget => {
//!                 // increment failure counter
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
