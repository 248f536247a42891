//! End-to-end engine scenarios driven with a paused tokio clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use batchvisor::events::AUDIT_MSG_TARGET;
use batchvisor::{
    Batcher, BatcherError, Config, Event, EventKind, Operation, RateLimiter, Watcher, WatcherRef,
};

/// Watcher that records every delivered batch; optionally holds each
/// batch in flight until released through `release_one`.
struct RecordingWatcher {
    batches: Mutex<Vec<Vec<Operation>>>,
    max_batch_size: u32,
    max_attempts: u32,
    hold: Option<Arc<Notify>>,
}

impl RecordingWatcher {
    fn arc(max_batch_size: u32) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            max_batch_size,
            max_attempts: 0,
            hold: None,
        })
    }

    fn holding(max_batch_size: u32) -> (Arc<Self>, Arc<Notify>) {
        let hold = Arc::new(Notify::new());
        let watcher = Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            max_batch_size,
            max_attempts: 0,
            hold: Some(Arc::clone(&hold)),
        });
        (watcher, hold)
    }

    fn with_max_attempts(max_attempts: u32) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            max_batch_size: 0,
            max_attempts,
            hold: None,
        })
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    fn sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }

    /// Payload ids of every delivered batch, sorted by each batch's
    /// first id so assertions are independent of task wake-up order.
    fn ids_per_batch(&self) -> Vec<Vec<u32>> {
        let mut batches: Vec<Vec<u32>> = self
            .batches
            .lock()
            .unwrap()
            .iter()
            .map(|batch| batch.iter().map(payload_id).collect())
            .collect();
        batches.sort_by_key(|ids| ids.first().copied());
        batches
    }

    fn attempts(&self) -> Vec<u32> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(Operation::attempt)
            .collect()
    }
}

#[async_trait]
impl Watcher for RecordingWatcher {
    async fn process_batch(&self, batch: Vec<Operation>) {
        self.batches.lock().unwrap().push(batch);
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
    }

    fn max_batch_size(&self) -> u32 {
        self.max_batch_size
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Rate limiter with a fixed grant, recording every `give_me` request.
struct FixedLimiter {
    max: u32,
    capacity: AtomicU32,
    requests: Mutex<Vec<u32>>,
}

impl FixedLimiter {
    fn arc(max: u32, capacity: u32) -> Arc<Self> {
        Arc::new(Self {
            max,
            capacity: AtomicU32::new(capacity),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RateLimiter for FixedLimiter {
    fn max_capacity(&self) -> u32 {
        self.max
    }

    fn capacity(&self) -> u32 {
        self.capacity.load(Ordering::Acquire)
    }

    fn give_me(&self, target: u32) {
        self.requests.lock().unwrap().push(target);
    }
}

fn payload_id(op: &Operation) -> u32 {
    *op.payload().downcast_ref::<u32>().expect("u32 payload")
}

fn op(watcher: &Arc<RecordingWatcher>, id: u32, cost: u32, batchable: bool) -> Operation {
    let w: WatcherRef = watcher.clone();
    Operation::new(w, cost, id, batchable)
}

/// Config whose timers stay out of the way so tests drive flushes
/// manually.
fn quiet_config() -> Config {
    let mut cfg = Config::default();
    cfg.flush_interval = Duration::from_secs(600);
    cfg.capacity_interval = Duration::from_secs(600);
    cfg.audit_interval = Duration::from_secs(600);
    cfg
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let outcome = time::timeout(Duration::from_secs(120), async {
        while !cond() {
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(outcome.is_ok(), "timed out waiting for {what}");
}

#[tokio::test(start_paused = true)]
async fn empty_lifecycle_emits_only_shutdown() {
    let batcher = Batcher::new(Config::default(), Vec::new());
    let mut rx = batcher.subscribe();

    batcher.start().unwrap();
    batcher.stop().await.unwrap();

    let ev = rx.recv().await.unwrap();
    assert_eq!(ev.kind, EventKind::Shutdown);
    assert!(rx.try_recv().is_err(), "no event may follow Shutdown");
}

#[tokio::test(start_paused = true)]
async fn single_non_batchable_op_is_delivered_alone() {
    let mut cfg = quiet_config();
    cfg.max_concurrent_batches = 1;
    let batcher = Batcher::new(cfg, Vec::new());
    batcher.start().unwrap();

    let watcher = RecordingWatcher::arc(0);
    batcher.enqueue(op(&watcher, 0, 5, false)).await.unwrap();
    assert_eq!(batcher.needs_capacity(), 5);

    batcher.flush();
    wait_for("the batch to arrive", || watcher.batch_count() == 1).await;
    assert_eq!(watcher.sizes(), vec![1]);

    wait_for("bookkeeping to settle", || {
        batcher.needs_capacity() == 0 && batcher.inflight() == 0
    })
    .await;
    assert_eq!(watcher.attempts(), vec![1]);

    batcher.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn batches_fill_to_max_batch_size_in_fifo_order() {
    let batcher = Batcher::new(quiet_config(), Vec::new());
    batcher.start().unwrap();

    let watcher = RecordingWatcher::arc(3);
    for id in 0..7 {
        batcher.enqueue(op(&watcher, id, 1, true)).await.unwrap();
    }

    batcher.flush();
    wait_for("three batches", || watcher.batch_count() == 3).await;

    assert_eq!(
        watcher.ids_per_batch(),
        vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]
    );
    assert_eq!(batcher.operations_in_buffer(), 0);

    batcher.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn capacity_slice_bounds_the_first_flush() {
    let mut cfg = quiet_config();
    cfg.flush_interval = Duration::from_millis(100);
    let limiter = FixedLimiter::arc(1000, 1000);
    let batcher = Batcher::new(cfg, Vec::new()).with_rate_limiter(limiter);
    batcher.start().unwrap();

    let watcher = RecordingWatcher::arc(0);
    for id in 0..50 {
        batcher.enqueue(op(&watcher, id, 10, true)).await.unwrap();
    }

    batcher.flush();
    wait_for("the first batch", || watcher.batch_count() >= 1).await;

    // slice = 1000 * 100ms / 1s = 100; ten ops fit and the eleventh is
    // the one that crosses the strict greater-than check
    let first: Vec<u32> = watcher.ids_per_batch().remove(0);
    assert_eq!(first.len(), 11);
    assert_eq!(first, (0..11).collect::<Vec<u32>>());

    batcher.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn zero_capacity_still_dispatches_one_operation_per_flush() {
    let mut cfg = quiet_config();
    cfg.flush_interval = Duration::from_millis(100);
    let limiter = FixedLimiter::arc(100, 0);
    let batcher = Batcher::new(cfg, Vec::new()).with_rate_limiter(limiter);
    batcher.start().unwrap();

    let watcher = RecordingWatcher::arc(0);
    for id in 0..3 {
        batcher.enqueue(op(&watcher, id, 10, true)).await.unwrap();
    }

    batcher.flush();
    wait_for("a batch despite zero capacity", || watcher.batch_count() == 1).await;
    assert_eq!(watcher.sizes(), vec![1]);
    assert_eq!(batcher.operations_in_buffer(), 2);

    batcher.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn admission_skip_keeps_operations_for_later_flushes() {
    let mut cfg = quiet_config();
    cfg.max_concurrent_batches = 1;
    let batcher = Batcher::new(cfg, Vec::new());
    batcher.start().unwrap();

    let (watcher_a, hold_a) = RecordingWatcher::holding(0);
    let watcher_b = RecordingWatcher::arc(0);

    // occupy the only admission slot with an A batch
    batcher.enqueue(op(&watcher_a, 0, 1, true)).await.unwrap();
    batcher.flush();
    wait_for("the A batch to hold the slot", || {
        watcher_a.batch_count() == 1 && batcher.inflight() == 1
    })
    .await;

    batcher.enqueue(op(&watcher_a, 1, 1, true)).await.unwrap();
    batcher.enqueue(op(&watcher_b, 2, 1, true)).await.unwrap();
    batcher.enqueue(op(&watcher_a, 3, 1, true)).await.unwrap();

    // with the slot held, a flush skips everything: nothing is dropped,
    // nothing blocks, nothing dispatches
    batcher.flush();
    time::sleep(Duration::from_millis(50)).await;
    assert_eq!(watcher_a.batch_count(), 1);
    assert_eq!(watcher_b.batch_count(), 0);
    assert_eq!(batcher.operations_in_buffer(), 3);
    assert_eq!(batcher.inflight(), 1);

    // free the slot; the next flush reserves it for A's new batch and
    // B is skipped again rather than blocking the pass
    hold_a.notify_one();
    wait_for("the slot to free", || batcher.inflight() == 0).await;
    batcher.flush();
    wait_for("the second A batch", || watcher_a.batch_count() == 2).await;
    assert_eq!(watcher_a.ids_per_batch()[1], vec![1, 3]);
    assert_eq!(watcher_b.batch_count(), 0);
    assert_eq!(batcher.operations_in_buffer(), 1);

    // once A completes, the skipped B operation finally dispatches
    hold_a.notify_one();
    wait_for("the slot to free again", || batcher.inflight() == 0).await;
    batcher.flush();
    wait_for("the B batch", || watcher_b.batch_count() == 1).await;
    assert_eq!(watcher_b.ids_per_batch(), vec![vec![2]]);

    batcher.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn audit_corrects_a_leaked_target() {
    let mut cfg = quiet_config();
    cfg.buffer_max = 1;
    cfg.error_on_full_buffer = true;
    cfg.audit_interval = Duration::from_millis(200);
    cfg.max_operation_time = Duration::from_millis(300);
    let batcher = Batcher::new(cfg, Vec::new());
    let mut rx = batcher.subscribe();
    batcher.start().unwrap();

    let watcher = RecordingWatcher::arc(0);
    batcher.enqueue(op(&watcher, 0, 5, true)).await.unwrap();
    // the rejected enqueue leaves its target increment behind
    let err = batcher.enqueue(op(&watcher, 1, 3, true)).await;
    assert!(matches!(err, Err(BatcherError::BufferFull)));
    assert_eq!(batcher.needs_capacity(), 8);

    batcher.flush();
    wait_for("the buffered op to clear", || {
        batcher.operations_in_buffer() == 0 && batcher.needs_capacity() == 3
    })
    .await;

    // let the idle window pass and the audit fire
    time::sleep(Duration::from_millis(700)).await;

    let mut audit: Option<Event> = None;
    while let Ok(ev) = rx.try_recv() {
        if ev.kind == EventKind::AuditFailTarget {
            audit = Some(ev);
            break;
        }
        assert_ne!(ev.kind, EventKind::AuditFailTargetAndInflight);
        assert_ne!(ev.kind, EventKind::AuditFailInflight);
    }
    let audit = audit.expect("an AuditFailTarget event");
    assert_eq!(audit.message.as_deref(), Some(AUDIT_MSG_TARGET));
    assert_eq!(batcher.needs_capacity(), 0);

    batcher.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn pause_blocks_dispatch_for_the_dwell() {
    let mut cfg = quiet_config();
    cfg.pause_time = Duration::from_millis(500);
    let batcher = Batcher::new(cfg, Vec::new());
    let mut rx = batcher.subscribe();
    batcher.start().unwrap();

    let watcher = RecordingWatcher::arc(0);
    batcher.enqueue(op(&watcher, 0, 1, true)).await.unwrap();

    batcher.pause().unwrap();
    let paused = loop {
        let ev = rx.recv().await.unwrap();
        if ev.kind == EventKind::Pause {
            assert_eq!(ev.value, Some(500));
            break Instant::now();
        }
    };

    // the dispatcher is dwelling; this request waits it out
    batcher.flush();
    wait_for("dispatch after the dwell", || watcher.batch_count() == 1).await;
    assert!(Instant::now().duration_since(paused) >= Duration::from_millis(500));

    let resume = rx.recv().await.unwrap();
    assert_eq!(resume.kind, EventKind::Resume);

    batcher.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn capacity_tick_reports_the_target() {
    let mut cfg = quiet_config();
    cfg.capacity_interval = Duration::from_millis(100);
    let limiter = FixedLimiter::arc(1000, 1000);
    let batcher =
        Batcher::new(cfg, Vec::new()).with_rate_limiter(Arc::clone(&limiter) as Arc<dyn RateLimiter>);
    let mut rx = batcher.subscribe();
    batcher.start().unwrap();

    let watcher = RecordingWatcher::arc(0);
    batcher.enqueue(op(&watcher, 0, 40, true)).await.unwrap();
    batcher.enqueue(op(&watcher, 1, 2, true)).await.unwrap();

    wait_for("a give_me call", || !limiter.requests.lock().unwrap().is_empty()).await;
    assert_eq!(limiter.requests.lock().unwrap()[0], 42);

    let request = loop {
        let ev = rx.recv().await.unwrap();
        if ev.kind == EventKind::Request {
            break ev;
        }
    };
    assert_eq!(request.value, Some(42));

    batcher.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn flush_events_bracket_the_pass() {
    let mut cfg = quiet_config();
    cfg.emit_flush = true;
    cfg.emit_batch = true;
    let batcher = Batcher::new(cfg, Vec::new());
    let mut rx = batcher.subscribe();
    batcher.start().unwrap();

    let watcher = RecordingWatcher::arc(0);
    batcher.enqueue(op(&watcher, 0, 1, true)).await.unwrap();
    batcher.flush();
    wait_for("the batch", || watcher.batch_count() == 1).await;

    let mut kinds = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        kinds.push(ev.kind);
    }
    assert_eq!(
        kinds,
        vec![EventKind::FlushStart, EventKind::Batch, EventKind::FlushDone]
    );

    batcher.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn operations_dispatch_at_most_once_in_enqueue_order() {
    let batcher = Batcher::new(quiet_config(), Vec::new());
    batcher.start().unwrap();

    let watcher = RecordingWatcher::arc(4);
    for id in 0..10 {
        batcher.enqueue(op(&watcher, id, 1, true)).await.unwrap();
    }
    batcher.flush();
    wait_for("the first wave", || watcher.batch_count() == 3).await;

    for id in 10..20 {
        batcher.enqueue(op(&watcher, id, 1, true)).await.unwrap();
    }
    batcher.flush();
    wait_for("the second wave", || watcher.batch_count() == 6).await;

    let ids: Vec<u32> = watcher.ids_per_batch().into_iter().flatten().collect();
    assert_eq!(ids, (0..20).collect::<Vec<u32>>());
    assert!(watcher.attempts().iter().all(|&a| a == 1));

    wait_for("bookkeeping to settle", || batcher.needs_capacity() == 0).await;
    batcher.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn enqueue_rejects_expensive_operations() {
    let limiter = FixedLimiter::arc(10, 10);
    let batcher = Batcher::new(quiet_config(), Vec::new()).with_rate_limiter(limiter);
    batcher.start().unwrap();

    let watcher = RecordingWatcher::arc(0);
    let err = batcher.enqueue(op(&watcher, 0, 11, true)).await;
    assert!(matches!(
        err,
        Err(BatcherError::TooExpensive { cost: 11, max: 10 })
    ));
    // the rejection happens before the target is touched
    assert_eq!(batcher.needs_capacity(), 0);

    batcher.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn enqueue_rejects_exhausted_attempts() {
    let batcher = Batcher::new(quiet_config(), Vec::new());
    batcher.start().unwrap();

    let watcher = RecordingWatcher::with_max_attempts(1);
    let first = op(&watcher, 0, 1, false);
    batcher.enqueue(first.clone()).await.unwrap();
    batcher.flush();
    wait_for("the only allowed attempt", || watcher.batch_count() == 1).await;
    wait_for("bookkeeping to settle", || batcher.needs_capacity() == 0).await;

    let err = batcher.enqueue(first).await;
    assert!(matches!(
        err,
        Err(BatcherError::TooManyAttempts { attempt: 1, max: 1 })
    ));

    batcher.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_discards_whatever_is_still_buffered() {
    let batcher = Batcher::new(quiet_config(), Vec::new());
    batcher.start().unwrap();

    let watcher = RecordingWatcher::arc(0);
    for id in 0..5 {
        batcher.enqueue(op(&watcher, id, 1, true)).await.unwrap();
    }
    assert_eq!(batcher.operations_in_buffer(), 5);

    batcher.stop().await.unwrap();
    assert_eq!(batcher.operations_in_buffer(), 0);
    assert_eq!(watcher.batch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_batches_release_their_bookkeeping() {
    let mut cfg = quiet_config();
    cfg.max_operation_time = Duration::from_millis(100);
    cfg.max_concurrent_batches = 1;
    let batcher = Batcher::new(cfg, Vec::new());
    batcher.start().unwrap();

    // this watcher never completes a batch on its own
    let (watcher, _hold) = RecordingWatcher::holding(0);
    batcher.enqueue(op(&watcher, 0, 9, true)).await.unwrap();
    batcher.flush();
    wait_for("the batch to start", || watcher.batch_count() == 1).await;
    assert_eq!(batcher.inflight(), 1);

    // the timeout reclaims target and slot without touching the handler
    wait_for("the timeout to reclaim bookkeeping", || {
        batcher.needs_capacity() == 0 && batcher.inflight() == 0
    })
    .await;

    batcher.stop().await.unwrap();
}
