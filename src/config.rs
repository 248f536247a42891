//! # Engine configuration.
//!
//! [`Config`] defines the batcher's behavior: flush and capacity cadence,
//! audit cadence, per-batch timeout, pause dwell time, buffer sizing, and
//! the admission limit for concurrent batches.
//!
//! All options are read once at [`Batcher::start`](crate::Batcher::start);
//! changing a `Config` after the engine has started has no effect.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use batchvisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.flush_interval = Duration::from_millis(50);
//! cfg.max_concurrent_batches = 4;
//!
//! assert_eq!(cfg.max_concurrent_batches, 4);
//! ```

use std::time::Duration;

/// Configuration for the batching engine.
///
/// Controls flush/capacity/audit cadence, batch timeouts, pause behavior,
/// buffer capacity, and admission limits.
#[derive(Clone, Debug)]
pub struct Config {
    /// How often the dispatcher attempts to flush buffered operations.
    ///
    /// When a rate limiter is attached, this interval also determines the
    /// capacity each flush has to work with: a 100ms interval against
    /// 10,000 available capacity yields ten flushes per second aiming for
    /// 1,000 cost each. Without a rate limiter every flush tries to empty
    /// the buffer.
    pub flush_interval: Duration,
    /// How often the dispatcher asks the rate limiter for capacity via
    /// `give_me`. Does nothing without a rate limiter.
    pub capacity_interval: Duration,
    /// How often the outstanding-cost target is audited while the engine
    /// is idle. Leave at the default unless tests need a tighter loop.
    pub audit_interval: Duration,
    /// How long a dispatched batch may run before the engine stops
    /// waiting and reclaims its bookkeeping. Superseded per watcher by
    /// [`Watcher::max_operation_time`](crate::Watcher::max_operation_time)
    /// when that returns a non-zero duration.
    pub max_operation_time: Duration,
    /// How long the dispatcher sleeps when [`Batcher::pause`](crate::Batcher::pause)
    /// is called.
    pub pause_time: Duration,
    /// When set, `enqueue` returns [`BatcherError::BufferFull`](crate::BatcherError::BufferFull)
    /// instead of waiting for space.
    pub error_on_full_buffer: bool,
    /// Emit a `Batch` event for every dispatched batch. Testing only.
    pub emit_batch: bool,
    /// Emit `FlushStart`/`FlushDone` events around every flush pass.
    /// Testing only.
    pub emit_flush: bool,
    /// Maximum number of batches processed at a time (0 = unlimited).
    pub max_concurrent_batches: u32,
    /// Capacity of the intake buffer.
    pub buffer_max: u32,
    /// Capacity of the event bus channel.
    pub bus_capacity: usize,
}

impl Default for Config {
    /// Provides the default configuration:
    /// - `flush_interval = 100ms`
    /// - `capacity_interval = 100ms`
    /// - `audit_interval = 10s`
    /// - `max_operation_time = 60s`
    /// - `pause_time = 500ms`
    /// - `error_on_full_buffer = false` (enqueue waits for space)
    /// - `emit_batch = false`, `emit_flush = false`
    /// - `max_concurrent_batches = 0` (unlimited)
    /// - `buffer_max = 10_000`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(100),
            capacity_interval: Duration::from_millis(100),
            audit_interval: Duration::from_secs(10),
            max_operation_time: Duration::from_secs(60),
            pause_time: Duration::from_millis(500),
            error_on_full_buffer: false,
            emit_batch: false,
            emit_flush: false,
            max_concurrent_batches: 0,
            buffer_max: 10_000,
            bus_capacity: 1024,
        }
    }
}

impl Config {
    /// Returns a copy with every zero duration replaced by its default.
    ///
    /// Zero durations are treated as "unset". Applied once at start.
    pub(crate) fn normalized(&self) -> Config {
        let defaults = Config::default();
        let or_default = |val: Duration, def: Duration| if val.is_zero() { def } else { val };

        Config {
            flush_interval: or_default(self.flush_interval, defaults.flush_interval),
            capacity_interval: or_default(self.capacity_interval, defaults.capacity_interval),
            audit_interval: or_default(self.audit_interval, defaults.audit_interval),
            max_operation_time: or_default(self.max_operation_time, defaults.max_operation_time),
            pause_time: or_default(self.pause_time, defaults.pause_time),
            ..self.clone()
        }
    }
}
