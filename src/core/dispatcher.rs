//! # The dispatcher loop.
//!
//! One dedicated task drives the engine by waiting on exactly one event
//! source per iteration:
//!
//! ```text
//!   stop token ──────► teardown (clear buffer, emit Shutdown, exit)
//!   pause signal ────► emit Pause, sleep pause_time, emit Resume
//!   audit tick ──────► reconcile target/inflight when idle
//!   capacity tick ───► report the target to the rate limiter
//!   flush tick ──────► arm the flush request (coalesced)
//!   flush request ───► one flush pass over the buffer
//! ```
//!
//! The pause sleep intentionally happens *inside* the handler: while the
//! dispatcher dwells, no flush or capacity work runs, which is the whole
//! point of pausing a struggling datastore.
//!
//! ## Flush pass
//! A pass walks the buffer once via the cursor, grouping batchable
//! operations per watcher and dispatching non-batchable ones alone. The
//! per-interval capacity budget uses a strict greater-than comparison so
//! at least one operation dispatches per pass even when the slice is
//! zero. Operations whose batch cannot reserve an admission slot are
//! skipped, not removed, and revisited on a later pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::events::{
    Event, EventKind, AUDIT_MSG_INFLIGHT, AUDIT_MSG_TARGET, AUDIT_MSG_TARGET_AND_INFLIGHT,
};
use crate::ops::{Operation, RateLimiterRef, WatcherRef};

use super::batcher::Shared;

/// Loop state owned by the dispatcher task.
pub(crate) struct Dispatcher {
    pub(crate) cfg: Config,
    pub(crate) shared: Arc<Shared>,
    pub(crate) limiter: Option<RateLimiterRef>,
    pub(crate) pause_rx: mpsc::Receiver<()>,
    pub(crate) flush_rx: mpsc::Receiver<()>,
    pub(crate) flush_tx: mpsc::Sender<()>,
    /// When the last non-empty batch was dispatched. `None` until the
    /// first dispatch, which the audit treats as "long ago".
    pub(crate) last_flush_with_records: Option<Instant>,
}

impl Dispatcher {
    /// Runs until the stop token fires, then tears down.
    pub(crate) async fn run(mut self, token: CancellationToken) {
        let mut flush_tick = Self::ticker(self.cfg.flush_interval);
        let mut capacity_tick = Self::ticker(self.cfg.capacity_interval);
        let mut audit_tick = Self::ticker(self.cfg.audit_interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,

                Some(()) = self.pause_rx.recv() => self.on_pause().await,

                _ = audit_tick.tick() => self.on_audit(),

                _ = capacity_tick.tick() => self.on_capacity(),

                _ = flush_tick.tick() => {
                    // coalesces with any pending manual flush request
                    let _ = self.flush_tx.try_send(());
                }

                Some(()) = self.flush_rx.recv() => self.on_flush(),
            }
        }

        self.shared.buffer.clear();
        self.shared.bus.publish(Event::now(EventKind::Shutdown));
    }

    /// First tick one full period after start, missed ticks skipped.
    fn ticker(period: Duration) -> Interval {
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tick
    }

    /// Dwells for `pause_time` without processing any other event, then
    /// restores the Started phase.
    async fn on_pause(&self) {
        self.shared.bus.publish(
            Event::now(EventKind::Pause).with_value(self.cfg.pause_time.as_millis() as u64),
        );
        time::sleep(self.cfg.pause_time).await;
        self.shared.resume();
        self.shared.bus.publish(Event::now(EventKind::Resume));
    }

    /// Reconciles target and in-flight once the engine has been idle for
    /// longer than any batch could still be running.
    fn on_audit(&mut self) {
        let idle_long_enough = self
            .last_flush_with_records
            .map_or(true, |t| t.elapsed() > self.cfg.max_operation_time);

        if self.shared.buffer.size() == 0 && idle_long_enough {
            let target_zero = self.shared.target.confirm_zero();
            let inflight_zero = self.shared.gate.confirm_zero();
            let ev = match (target_zero, inflight_zero) {
                (false, false) => Event::now(EventKind::AuditFailTargetAndInflight)
                    .with_message(AUDIT_MSG_TARGET_AND_INFLIGHT),
                (false, true) => {
                    Event::now(EventKind::AuditFailTarget).with_message(AUDIT_MSG_TARGET)
                }
                (true, false) => {
                    Event::now(EventKind::AuditFailInflight).with_message(AUDIT_MSG_INFLIGHT)
                }
                (true, true) => Event::now(EventKind::AuditPass),
            };
            self.shared.bus.publish(ev);
        } else {
            self.shared.bus.publish(Event::now(EventKind::AuditSkip));
        }
    }

    /// Reports outstanding demand to the rate limiter.
    fn on_capacity(&self) {
        if let Some(limiter) = &self.limiter {
            let request = self.shared.target.get();
            self.shared
                .bus
                .publish(Event::now(EventKind::Request).with_value(request as u64));
            limiter.give_me(request);
        }
    }

    /// One flush pass over the buffer.
    fn on_flush(&mut self) {
        if self.cfg.emit_flush {
            self.shared.bus.publish(Event::now(EventKind::FlushStart));
        }

        // per-interval slice of the limiter's per-second capacity
        let capacity = self.limiter.as_ref().map(|limiter| {
            limiter.capacity() as u64 * self.cfg.flush_interval.as_millis() as u64 / 1000
        });

        let mut consumed: u64 = 0;
        let mut pending: HashMap<usize, (WatcherRef, Vec<Operation>)> = HashMap::new();

        let mut op = self.shared.buffer.top();
        loop {
            // strict greater-than: at least one operation dispatches per
            // pass even when the slice is zero
            if let Some(cap) = capacity {
                if consumed > cap {
                    break;
                }
            }
            let Some(cur) = op else { break };

            if cur.is_batchable() {
                let entry = pending
                    .entry(cur.watcher_key())
                    .or_insert_with(|| (cur.watcher().clone(), Vec::new()));
                // a new batch needs its own admission slot; subsequent
                // items piggy-back on it
                if entry.1.is_empty() && !self.shared.gate.try_reserve() {
                    op = self.shared.buffer.skip();
                    continue;
                }
                consumed += cur.cost() as u64;
                entry.1.push(cur.clone());
                let max = entry.0.max_batch_size();
                if max > 0 && entry.1.len() >= max as usize {
                    let watcher = entry.0.clone();
                    let batch = std::mem::take(&mut entry.1);
                    self.dispatch(watcher, batch);
                }
                op = self.shared.buffer.remove();
            } else if self.shared.gate.try_reserve() {
                consumed += cur.cost() as u64;
                self.dispatch(cur.watcher().clone(), vec![cur.clone()]);
                op = self.shared.buffer.remove();
            } else {
                // no admission slot available
                op = self.shared.buffer.skip();
            }
        }

        // residual per-watcher batches; empty ones are no-ops
        for (_, (watcher, batch)) in pending {
            self.dispatch(watcher, batch);
        }

        if self.cfg.emit_flush {
            self.shared.bus.publish(Event::now(EventKind::FlushDone));
        }
    }

    /// Hands a batch to its watcher on an independent task.
    ///
    /// The task increments each operation's attempt, runs the handler in
    /// a nested task, and waits for completion or the effective timeout,
    /// whichever comes first. The handler is not interrupted on timeout;
    /// only the target and the admission slot are reclaimed.
    fn dispatch(&mut self, watcher: WatcherRef, batch: Vec<Operation>) {
        if batch.is_empty() {
            return;
        }
        self.last_flush_with_records = Some(Instant::now());

        if self.cfg.emit_batch {
            self.shared.bus.publish(
                Event::now(EventKind::Batch)
                    .with_value(batch.len() as u64)
                    .with_batch(batch.clone()),
            );
        }

        let shared = Arc::clone(&self.shared);
        let default_operation_time = self.cfg.max_operation_time;
        tokio::spawn(async move {
            for op in &batch {
                op.make_attempt();
            }
            let total: i64 = batch.iter().map(|op| op.cost() as i64).sum();

            let per_watcher = watcher.max_operation_time();
            let effective = if per_watcher.is_zero() {
                default_operation_time
            } else {
                per_watcher
            };

            let worker = tokio::spawn({
                let watcher = Arc::clone(&watcher);
                async move { watcher.process_batch(batch).await }
            });
            let _ = time::timeout(effective, worker).await;

            shared.target.add(-total);
            shared.gate.release();
        });
    }
}
