//! # LogWriter — simple event printer
//!
//! A minimal subscriber that prints incoming [`Event`]s to stdout.
//! Use it for test or demo.
//!
//! ## Example output
//! ```text
//! [pause] dwell_ms=500
//! [resume]
//! [audit-skip]
//! [audit-fail] msg="an audit revealed that the target should be zero but was not"
//! [request] capacity=250
//! [batch] size=3
//! [shutdown]
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::Shutdown => {
                println!("[shutdown]");
            }
            EventKind::Pause => {
                println!("[pause] dwell_ms={:?}", e.value);
            }
            EventKind::Resume => {
                println!("[resume]");
            }
            EventKind::AuditPass => {
                println!("[audit-pass]");
            }
            EventKind::AuditSkip => {
                println!("[audit-skip]");
            }
            EventKind::AuditFailTarget
            | EventKind::AuditFailInflight
            | EventKind::AuditFailTargetAndInflight => {
                println!("[audit-fail] msg={:?}", e.message);
            }
            EventKind::Request => {
                println!("[request] capacity={:?}", e.value);
            }
            EventKind::FlushStart => {
                println!("[flush-start]");
            }
            EventKind::FlushDone => {
                println!("[flush-done]");
            }
            EventKind::Batch => {
                println!("[batch] size={:?}", e.value);
            }
        }
    }
    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
