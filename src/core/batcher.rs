//! # Batcher: the public surface of the engine.
//!
//! The [`Batcher`] owns the runtime components (buffer, target, admission
//! gate, event bus, subscriber fan-out) and orchestrates the dispatcher
//! lifecycle from start to graceful stop.
//!
//! ## Architecture
//! ```text
//! producers ── enqueue(op) ──► Buffer (target += cost)
//!                                 │
//!                        Dispatcher::run()
//!                                 │  flush pass: group per watcher,
//!                                 │  reserve admission, dispatch
//!                                 ▼
//!                       per-batch tasks ──► Watcher::process_batch
//!                                 │   completion or timeout:
//!                                 │   target -= cost, slot released
//!                                 ▼
//!                        Bus ──► subscribe() receivers
//!                            └─► SubscriberSet (non-blocking fan-out)
//! ```
//!
//! ## Rules
//! - One batcher per datastore; one watcher instance per batching identity.
//! - `start` is one-shot; `stop` is idempotent and terminal.
//! - Configuration is read once at `start`.
//! - `pause` only takes effect in the Started phase; the dwell is served
//!   by the dispatcher, which processes nothing else meanwhile.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::BatcherError;
use crate::events::{Bus, Event};
use crate::ops::{Operation, RateLimiterRef};
use crate::subscribers::{Subscribe, SubscriberSet};

use super::admission::AdmissionGate;
use super::buffer::Buffer;
use super::dispatcher::Dispatcher;
use super::target::Target;

/// Lifecycle phase of the engine.
///
/// Legal transitions: Uninitialized→Started (`start`), Started↔Paused
/// (`pause`/internal resume), {Started,Paused}→Stopped (`stop`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Uninitialized,
    Started,
    Paused,
    Stopped,
}

/// State shared between the public handle, the dispatcher task, and the
/// per-batch tasks. Each member is individually thread-safe; no lock
/// spans more than one of them.
pub(crate) struct Shared {
    pub(crate) buffer: Buffer,
    pub(crate) target: Target,
    pub(crate) gate: AdmissionGate,
    pub(crate) bus: Bus,
    pub(crate) phase: Mutex<Phase>,
}

impl Shared {
    /// Restores Started after a pause dwell. A stop that landed during
    /// the dwell wins.
    pub(crate) fn resume(&self) {
        // the phase is a Copy enum, so even a poisoned guard holds a
        // coherent value; the dispatcher has no error path, recover
        let mut phase = self
            .phase
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *phase == Phase::Paused {
            *phase = Phase::Started;
        }
    }
}

/// Batching and admission-control engine.
///
/// Generally you should have one `Batcher` per datastore. Producers call
/// [`enqueue`](Batcher::enqueue); the dispatcher groups operations into
/// per-watcher batches and releases them under rate and concurrency
/// limits.
///
/// ```no_run
/// use batchvisor::{Batcher, Config, Operation, WatcherFn};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let batcher = Batcher::new(Config::default(), Vec::new());
///     batcher.start()?;
///
///     let watcher = WatcherFn::new(|batch: Vec<Operation>| async move {
///         for op in &batch {
///             // write op.payload() to the datastore...
///             let _ = op.cost();
///         }
///     })
///     .with_max_batch_size(10)
///     .arced();
///
///     batcher.enqueue(Operation::new(watcher, 1, "row-1", true)).await?;
///     batcher.stop().await?;
///     Ok(())
/// }
/// ```
pub struct Batcher {
    cfg: Config,
    shared: Arc<Shared>,
    subs: Arc<SubscriberSet>,
    limiter: Option<RateLimiterRef>,
    pause_tx: mpsc::Sender<()>,
    flush_tx: mpsc::Sender<()>,
    /// Receiver halves of the pause/flush signals, handed to the
    /// dispatcher exactly once at start.
    signals: Mutex<Option<(mpsc::Receiver<()>, mpsc::Receiver<()>)>>,
    stop_token: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Batcher {
    /// Creates a new engine with the given config and subscribers
    /// (maybe empty). The engine does nothing until [`start`](Batcher::start).
    pub fn new(cfg: Config, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        // pause and flush are 1-slot coalesced signals: arming an
        // already-armed signal is silently dropped
        let (pause_tx, pause_rx) = mpsc::channel(1);
        let (flush_tx, flush_rx) = mpsc::channel(1);

        Self {
            shared: Arc::new(Shared {
                buffer: Buffer::new(cfg.buffer_max),
                target: Target::new(),
                gate: AdmissionGate::new(cfg.max_concurrent_batches),
                bus: Bus::new(cfg.bus_capacity),
                phase: Mutex::new(Phase::Uninitialized),
            }),
            subs: Arc::new(SubscriberSet::new(subscribers)),
            limiter: None,
            pause_tx,
            flush_tx,
            signals: Mutex::new(Some((pause_rx, flush_rx))),
            stop_token: CancellationToken::new(),
            dispatcher: Mutex::new(None),
            cfg,
        }
    }

    /// Attaches a rate limiter to throttle dispatch against a datastore
    /// with a known capacity budget. Optional; the default behavior does
    /// not rate limit. Must be called before [`start`](Batcher::start).
    pub fn with_rate_limiter(mut self, limiter: RateLimiterRef) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Starts the dispatcher.
    ///
    /// Requires the Uninitialized phase (`ImproperOrder` otherwise) and a
    /// non-zero buffer capacity (`BufferNotAllocated`). Zero durations in
    /// the config are replaced by their defaults here. One-shot; there is
    /// no restart after [`stop`](Batcher::stop). `Poisoned` is returned
    /// when a panic elsewhere corrupted an engine lock.
    pub fn start(&self) -> Result<(), BatcherError> {
        let mut phase = self
            .shared
            .phase
            .lock()
            .map_err(|_| BatcherError::Poisoned { what: "phase" })?;
        if *phase != Phase::Uninitialized {
            return Err(BatcherError::ImproperOrder);
        }
        if self.shared.buffer.max() == 0 {
            return Err(BatcherError::BufferNotAllocated);
        }

        let (pause_rx, flush_rx) = self
            .signals
            .lock()
            .map_err(|_| BatcherError::Poisoned { what: "signals" })?
            .take()
            .ok_or(BatcherError::ImproperOrder)?;
        let mut slot = self
            .dispatcher
            .lock()
            .map_err(|_| BatcherError::Poisoned { what: "dispatcher" })?;

        Arc::clone(&self.subs).listen(&self.shared.bus);

        let dispatcher = Dispatcher {
            cfg: self.cfg.normalized(),
            shared: Arc::clone(&self.shared),
            limiter: self.limiter.clone(),
            pause_rx,
            flush_rx,
            flush_tx: self.flush_tx.clone(),
            last_flush_with_records: None,
        };
        *slot = Some(tokio::spawn(dispatcher.run(self.stop_token.clone())));

        *phase = Phase::Started;
        Ok(())
    }

    /// Adds an operation to the buffer.
    ///
    /// Preconditions, each with its own error: with a rate limiter
    /// attached the cost must not exceed `max_capacity()`; a watcher
    /// advertising `max_attempts > 0` rejects operations already
    /// attempted that many times. On success the target grows by the
    /// operation's cost before the buffer insert, so capacity requests
    /// never under-report outstanding work.
    ///
    /// Without [`Config::error_on_full_buffer`] the call waits for buffer
    /// space; with it, a full buffer returns
    /// [`BatcherError::BufferFull`]. A failed insert leaves the target
    /// increment in place; the audit reconciles it.
    pub async fn enqueue(&self, op: Operation) -> Result<(), BatcherError> {
        if let Some(limiter) = &self.limiter {
            let max = limiter.max_capacity();
            if op.cost() > max {
                return Err(BatcherError::TooExpensive {
                    cost: op.cost(),
                    max,
                });
            }
        }

        let max_attempts = op.watcher().max_attempts();
        if max_attempts > 0 && op.attempt() >= max_attempts {
            return Err(BatcherError::TooManyAttempts {
                attempt: op.attempt(),
                max: max_attempts,
            });
        }

        self.shared.target.add(op.cost() as i64);
        self.shared
            .buffer
            .enqueue(op, self.cfg.error_on_full_buffer)
            .await
    }

    /// Suspends the dispatcher for the configured pause time.
    ///
    /// Call this when the datastore is throwing transient errors; pausing
    /// keeps the engine from making the problem worse. Only effective in
    /// the Started phase. Repeated calls during one dwell coalesce.
    /// `Poisoned` is returned when a panic elsewhere corrupted the phase
    /// lock.
    pub fn pause(&self) -> Result<(), BatcherError> {
        let mut phase = self
            .shared
            .phase
            .lock()
            .map_err(|_| BatcherError::Poisoned { what: "phase" })?;
        if *phase != Phase::Started {
            // simply ignore an invalid pause
            return Ok(());
        }
        let _ = self.pause_tx.try_send(());
        *phase = Phase::Paused;
        Ok(())
    }

    /// Requests a flush as if the flush interval had elapsed. Coalesced
    /// with any pending request; a no-op once stopped.
    pub fn flush(&self) {
        let _ = self.flush_tx.try_send(());
    }

    /// Stops the dispatcher and waits for it to tear down. Idempotent;
    /// the engine cannot be restarted. `Poisoned` is returned when a
    /// panic elsewhere corrupted an engine lock.
    pub async fn stop(&self) -> Result<(), BatcherError> {
        {
            let mut phase = self
                .shared
                .phase
                .lock()
                .map_err(|_| BatcherError::Poisoned { what: "phase" })?;
            if *phase == Phase::Stopped {
                return Ok(());
            }
            *phase = Phase::Stopped;
        }

        self.stop_token.cancel();
        let handle = self
            .dispatcher
            .lock()
            .map_err(|_| BatcherError::Poisoned { what: "dispatcher" })?
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Number of operations still in the buffer. Does not include
    /// operations already dispatched as part of a batch.
    pub fn operations_in_buffer(&self) -> u32 {
        self.shared.buffer.size()
    }

    /// Number of batches currently processing.
    pub fn inflight(&self) -> u32 {
        self.shared.gate.count()
    }

    /// Capacity the engine believes it needs to process everything
    /// outstanding: buffered operations plus dispatched batches not yet
    /// completed.
    pub fn needs_capacity(&self) -> u32 {
        self.shared.target.get()
    }

    /// Creates a receiver for runtime events. Each call returns an
    /// independent receiver of all events published after the call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }
}
