//! # SubscriberSet: delivery of engine events to subscribers
//!
//! The dispatcher publishes every event exactly once on the broadcast
//! [`Bus`](crate::events::Bus); a `SubscriberSet` drains that feed and
//! delivers each event to every registered [`Subscribe`] implementation
//! through a bounded per-subscriber lane served by a dedicated worker.
//!
//! ## What it guarantees
//! - Delivery never blocks the dispatcher: lanes are bounded, and a full
//!   lane drops the event for that subscriber only.
//! - Per-subscriber FIFO (lane order).
//! - A panicking subscriber is isolated; the engine and the other lanes
//!   keep running.
//!
//! ## What it does **not** guarantee
//! - No global ordering across different subscribers; re-order
//!   downstream with [`Event::seq`](crate::events::Event::seq).
//! - No redelivery: overflowed lanes and bus lag lose events, and
//!   [`dropped_events`](SubscriberSet::dropped_events) only counts them.
//!
//! With [`Config::emit_batch`](crate::Config::emit_batch) enabled every
//! dispatched batch is mirrored onto the bus, so a slow subscriber is
//! expected to overflow under load; a growing drop count is the signal
//! that its lane needs a bigger
//! [`queue_capacity`](Subscribe::queue_capacity).
//!
//! ## Diagram
//! ```text
//!    Bus ──► listen() ──► fan_out(Arc<Event>)
//!                             │
//!                             ├──► [lane S1] ─► worker S1 ─► on_event()
//!                             ├──► [lane S2] ─► worker S2 ─► on_event()
//!                             └──► [lane SN] ─► worker SN ─► on_event()
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::events::{Bus, Event};

use super::subscribe::Subscribe;

/// Delivery lane for one subscriber: a bounded queue plus drop
/// accounting for when the subscriber cannot keep up with the engine.
struct Lane {
    name: &'static str,
    queue: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
}

impl Lane {
    /// Queues one event without waiting; a refused event is counted and
    /// reported with its kind so floods (e.g. `Batch` under
    /// `emit_batch`) are attributable.
    fn push(&self, ev: Arc<Event>) {
        let kind = ev.kind;
        if let Err(refused) = self.queue.try_send(ev) {
            self.dropped.fetch_add(1, AtomicOrdering::Relaxed);
            let reason = match refused {
                mpsc::error::TrySendError::Full(_) => "lane full",
                mpsc::error::TrySendError::Closed(_) => "worker gone",
            };
            eprintln!(
                "[batchvisor] subscriber '{}' dropped {kind:?} event: {reason}",
                self.name
            );
        }
    }
}

/// Fan-out of engine events over per-subscriber lanes and workers.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    workers: Vec<JoinHandle<()>>,
    lagged: AtomicU64,
}

impl SubscriberSet {
    /// Creates one lane and one worker per subscriber.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let mut lanes = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            let worker = {
                let sub = Arc::clone(&sub);
                tokio::spawn(async move {
                    while let Some(ev) = rx.recv().await {
                        let handled = std::panic::AssertUnwindSafe(sub.on_event(ev.as_ref()))
                            .catch_unwind()
                            .await;
                        if handled.is_err() {
                            eprintln!(
                                "[batchvisor] subscriber '{}' panicked on {:?} event seq={}",
                                sub.name(),
                                ev.kind,
                                ev.seq
                            );
                        }
                    }
                })
            };
            lanes.push(Lane {
                name: sub.name(),
                queue: tx,
                dropped: AtomicU64::new(0),
            });
            workers.push(worker);
        }

        Self {
            lanes,
            workers,
            lagged: AtomicU64::new(0),
        }
    }

    /// Spawns the listener that drains the engine bus into the lanes.
    ///
    /// Runs until the bus closes (all publishers dropped). Falling
    /// behind the bounded bus loses the overwritten events; they are
    /// counted as dropped. A set with no subscribers spawns nothing.
    pub fn listen(self: Arc<Self>, bus: &Bus) {
        if self.lanes.is_empty() {
            return;
        }
        let mut rx = bus.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => self.fan_out(Arc::new(ev)),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        self.lagged.fetch_add(missed, AtomicOrdering::Relaxed);
                    }
                }
            }
        });
    }

    /// Hands one event to every lane directly, bypassing the bus.
    pub fn emit(&self, event: &Event) {
        self.fan_out(Arc::new(event.clone()));
    }

    fn fan_out(&self, ev: Arc<Event>) {
        for lane in &self.lanes {
            lane.push(Arc::clone(&ev));
        }
    }

    /// Events the fan-out failed to deliver: lane overflow, dead
    /// workers, and bus lag.
    pub fn dropped_events(&self) -> u64 {
        let overflowed: u64 = self
            .lanes
            .iter()
            .map(|lane| lane.dropped.load(AtomicOrdering::Relaxed))
            .sum();
        overflowed + self.lagged.load(AtomicOrdering::Relaxed)
    }

    /// Closes the lanes and waits for the workers to finish whatever is
    /// already queued.
    pub async fn drain(self) {
        drop(self.lanes);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Subscribe for Counter {
        async fn on_event(&self, _event: &Event) {
            self.0.fetch_add(1, AtomicOrdering::SeqCst);
        }
        fn name(&self) -> &'static str {
            "counter"
        }
    }

    /// Holds every event until released; lane capacity of one.
    struct Blocker {
        seen: Arc<AtomicUsize>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Subscribe for Blocker {
        async fn on_event(&self, _event: &Event) {
            self.release.notified().await;
            self.seen.fetch_add(1, AtomicOrdering::SeqCst);
        }
        fn name(&self) -> &'static str {
            "blocker"
        }
        fn queue_capacity(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn events_reach_every_subscriber() {
        let hits_a = Arc::new(AtomicUsize::new(0));
        let hits_b = Arc::new(AtomicUsize::new(0));
        let set = SubscriberSet::new(vec![
            Arc::new(Counter(Arc::clone(&hits_a))) as Arc<dyn Subscribe>,
            Arc::new(Counter(Arc::clone(&hits_b))) as Arc<dyn Subscribe>,
        ]);

        set.emit(&Event::now(EventKind::FlushStart));
        set.emit(&Event::now(EventKind::FlushDone));
        assert_eq!(set.dropped_events(), 0);
        set.drain().await;

        assert_eq!(hits_a.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(hits_b.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn overflowed_lanes_count_their_drops() {
        let seen = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let set = SubscriberSet::new(vec![Arc::new(Blocker {
            seen: Arc::clone(&seen),
            release: Arc::clone(&release),
        }) as Arc<dyn Subscribe>]);

        // the worker has not run yet, so the first event fills the lane
        // and the rest are refused
        for _ in 0..3 {
            set.emit(&Event::now(EventKind::Batch).with_value(1));
        }
        assert_eq!(set.dropped_events(), 2);

        release.notify_one();
        set.drain().await;
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listener_drains_the_bus() {
        let hits = Arc::new(AtomicUsize::new(0));
        let bus = Bus::new(8);
        let set = Arc::new(SubscriberSet::new(vec![
            Arc::new(Counter(Arc::clone(&hits))) as Arc<dyn Subscribe>,
        ]));
        Arc::clone(&set).listen(&bus);

        bus.publish(Event::now(EventKind::FlushStart));
        bus.publish(Event::now(EventKind::FlushDone));

        tokio::time::timeout(Duration::from_secs(5), async {
            while hits.load(AtomicOrdering::SeqCst) < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("listener delivered both events");
        assert_eq!(set.dropped_events(), 0);
    }
}
