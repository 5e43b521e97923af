//! 累积器：把逐条写入的条目攒成有界批次，按固定节拍排出并对生产者施加背压。
//!
//! # Accumulator
//!
//! Producers [`write`](Accumulator::write) items one at a time. A drain cycle
//! running every `drain_interval` cuts count- and byte-bounded batches from
//! the front of the buffer and publishes them as [`AccumulatorEvent::Data`].
//!
//! ## Drain cycle
//!
//! Each tick:
//!
//! 1. Does nothing unless the buffer is overflowing, the stream has ended, or
//!    a full batch is buffered (`min_batch_count` items or `max_batch_bytes`).
//!    An idle tick on an empty buffer stops the cycle until the next write.
//! 2. Dequeues one batch and emits `Data`, or `Empty` if nothing was buffered.
//! 3. Emits `Drain` when an overflowing buffer is back under `max_buffer_bytes`.
//! 4. Emits `End` once an ended stream has nothing left, and stops for good.
//!
//! ## Flow control
//!
//! | Call | Effect |
//! |------|--------|
//! | `write` returns `false` | buffered bytes exceed `max_buffer_bytes`; producer should wait for `Drain` |
//! | `pause` | stops the cycle, writes keep buffering, emits `Pause` once |
//! | `resume` | restarts the cycle, emits `Resume` once |
//! | `step` | one tick right now, even while paused |
//! | `end` | flushes everything, then `End` |
//! | `destroy` | drops the buffer; pending completions see `Cancelled` |

use crate::batch::{Batch, BatchQueue, Completion, Weighted};
use crate::config::AccumulatorConfig;
use crate::error::DeliveryError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Notification published by an [`Accumulator`].
#[derive(Debug)]
pub enum AccumulatorEvent<T> {
    /// A completed batch, in FIFO order.
    Data(Batch<T>),
    /// An overflowing buffer fell back under `max_buffer_bytes`.
    Drain,
    Pause,
    Resume,
    /// A tick was forced to cut a batch but nothing was buffered.
    Empty,
    /// The stream ended and every buffered item has been emitted.
    End,
}

impl<T> AccumulatorEvent<T> {
    pub fn notice(&self) -> AccumulatorNotice {
        match self {
            AccumulatorEvent::Data(batch) => AccumulatorNotice::Data {
                len: batch.len(),
                weight: batch.weight(),
            },
            AccumulatorEvent::Drain => AccumulatorNotice::Drain,
            AccumulatorEvent::Pause => AccumulatorNotice::Pause,
            AccumulatorEvent::Resume => AccumulatorNotice::Resume,
            AccumulatorEvent::Empty => AccumulatorNotice::Empty,
            AccumulatorEvent::End => AccumulatorNotice::End,
        }
    }
}

/// Payload-free summary of an [`AccumulatorEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorNotice {
    Data { len: usize, weight: usize },
    Drain,
    Pause,
    Resume,
    Empty,
    End,
}

struct State<T> {
    queue: BatchQueue<T>,
    paused: bool,
    overflow: bool,
    ended: bool,
    finished: bool,
    destroyed: bool,
    timer: Option<JoinHandle<()>>,
    timer_gen: u64,
}

impl<T> State<T> {
    fn stop_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct TickOutcome {
    data: bool,
    stop: bool,
}

struct Shared<T> {
    max_buffer_bytes: usize,
    min_batch_count: usize,
    drain_interval: Duration,
    runtime: Handle,
    events: mpsc::UnboundedSender<AccumulatorEvent<T>>,
    state: Mutex<State<T>>,
}

type Orphans<T> = Vec<AccumulatorEvent<T>>;

impl<T: Weighted + Send + 'static> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emits under the caller's lock. Events the receiver can no longer take
    /// are returned through `orphans` so their completions settle after unlock.
    fn emit(&self, event: AccumulatorEvent<T>, orphans: &mut Orphans<T>) {
        if let Err(mpsc::error::SendError(event)) = self.events.send(event) {
            orphans.push(event);
        }
    }

    fn arm(self: &Arc<Self>, st: &mut State<T>) {
        if st.timer.is_some() || st.paused || st.finished || st.destroyed {
            return;
        }
        st.timer_gen = st.timer_gen.wrapping_add(1);
        let gen = st.timer_gen;
        let period = self.drain_interval;
        let weak: Weak<Self> = Arc::downgrade(self);

        trace!(generation = gen, "drain cycle armed");
        st.timer = Some(self.runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                if !shared.timer_tick(gen) {
                    break;
                }
            }
        }));
    }

    /// Returns whether the timer task should keep running.
    fn timer_tick(&self, gen: u64) -> bool {
        let mut orphans = Vec::new();
        let mut st = self.lock();
        if st.timer.is_none() || st.timer_gen != gen {
            return false;
        }
        let outcome = self.tick(&mut st, &mut orphans);
        if outcome.stop {
            // this task is the timer; detach instead of aborting itself
            st.timer = None;
            trace!(generation = gen, "drain cycle stopped");
        }
        !outcome.stop
    }

    fn tick(&self, st: &mut State<T>, orphans: &mut Orphans<T>) -> TickOutcome {
        if st.finished || st.destroyed {
            return TickOutcome {
                data: false,
                stop: true,
            };
        }

        let ready = st.overflow || st.ended || st.queue.has_full_batch(self.min_batch_count);
        if !ready {
            return TickOutcome {
                data: false,
                stop: st.queue.is_empty(),
            };
        }

        let mut outcome = TickOutcome::default();
        let batch = st.queue.dequeue_batch();
        if batch.is_empty() {
            self.emit(AccumulatorEvent::Empty, orphans);
        } else {
            debug!(
                len = batch.len(),
                weight = batch.weight(),
                buffered = st.queue.len(),
                "batch emitted"
            );
            self.emit(AccumulatorEvent::Data(batch), orphans);
            outcome.data = true;
        }

        if st.overflow && st.queue.bytes() <= self.max_buffer_bytes {
            st.overflow = false;
            self.emit(AccumulatorEvent::Drain, orphans);
        }

        if st.ended && st.queue.is_empty() {
            st.finished = true;
            self.emit(AccumulatorEvent::End, orphans);
            debug!("accumulator finished");
            outcome.stop = true;
        }
        outcome
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .stop_timer();
    }
}

/// Buffers items and emits bounded batches on a timed drain cycle.
///
/// Cloning yields another handle to the same buffer.
pub struct Accumulator<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Accumulator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Weighted + Send + 'static> Accumulator<T> {
    /// Create an accumulator on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(config: AccumulatorConfig) -> (Self, mpsc::UnboundedReceiver<AccumulatorEvent<T>>) {
        Self::with_handle(config, Handle::current())
    }

    /// Create an accumulator whose drain cycle runs on `runtime`.
    pub fn with_handle(
        config: AccumulatorConfig,
        runtime: Handle,
    ) -> (Self, mpsc::UnboundedReceiver<AccumulatorEvent<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            max_buffer_bytes: config.max_buffer_bytes,
            min_batch_count: config.effective_min_batch_count(),
            drain_interval: config.drain_interval.max(Duration::from_millis(1)),
            runtime,
            events: tx,
            state: Mutex::new(State {
                queue: BatchQueue::new(config.limits()),
                paused: false,
                overflow: false,
                ended: false,
                finished: false,
                destroyed: false,
                timer: None,
                timer_gen: 0,
            }),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    /// Buffer an item. Returns `false` once buffered bytes exceed
    /// `max_buffer_bytes`, or if the stream no longer accepts writes.
    pub fn write(&self, item: T) -> bool {
        self.write_inner(item, None)
    }

    /// Buffer an item with a completion handle that travels with it.
    pub fn write_with(&self, item: T, completion: Completion) -> bool {
        self.write_inner(item, Some(completion))
    }

    fn write_inner(&self, item: T, completion: Option<Completion>) -> bool {
        let mut st = self.shared.lock();
        if st.ended || st.destroyed {
            let destroyed = st.destroyed;
            drop(st);
            warn!(destroyed, "write after end ignored");
            if let Some(c) = completion {
                c.complete(Err(DeliveryError::Cancelled));
            }
            return false;
        }

        let bytes = st.queue.push(item, completion);
        if bytes > self.shared.max_buffer_bytes && !st.overflow {
            st.overflow = true;
            debug!(
                bytes,
                limit = self.shared.max_buffer_bytes,
                "buffer over limit"
            );
        }
        self.shared.arm(&mut st);
        !st.overflow
    }

    /// Remove and return the next batch right away, bypassing the drain cycle.
    pub fn flush(&self) -> Batch<T> {
        let mut orphans = Vec::new();
        let mut st = self.shared.lock();
        let batch = st.queue.dequeue_batch();
        if st.overflow && st.queue.bytes() <= self.shared.max_buffer_bytes {
            st.overflow = false;
            self.shared.emit(AccumulatorEvent::Drain, &mut orphans);
        }
        batch
    }

    /// Alias for [`flush`](Self::flush).
    pub fn dequeue_batch(&self) -> Batch<T> {
        self.flush()
    }

    pub fn pause(&self) {
        let mut orphans = Vec::new();
        let mut st = self.shared.lock();
        if st.paused || st.finished || st.destroyed {
            return;
        }
        st.paused = true;
        st.stop_timer();
        self.shared.emit(AccumulatorEvent::Pause, &mut orphans);
        debug!(buffered = st.queue.len(), "accumulator paused");
    }

    pub fn resume(&self) {
        let mut orphans = Vec::new();
        let mut st = self.shared.lock();
        if !st.paused {
            return;
        }
        st.paused = false;
        if st.finished || st.destroyed {
            return;
        }
        self.shared.emit(AccumulatorEvent::Resume, &mut orphans);
        debug!(buffered = st.queue.len(), "accumulator resumed");
        if st.ended || !st.queue.is_empty() {
            self.shared.arm(&mut st);
        }
    }

    /// Run one drain-cycle tick now, even while paused. Returns whether a
    /// `Data` batch was emitted.
    pub fn step(&self) -> bool {
        let mut orphans = Vec::new();
        let mut st = self.shared.lock();
        let outcome = self.shared.tick(&mut st, &mut orphans);
        if st.finished {
            st.stop_timer();
        }
        outcome.data
    }

    /// No more writes; remaining items drain as (possibly partial) batches,
    /// followed by `End`.
    pub fn end(&self) {
        let mut st = self.shared.lock();
        if st.ended || st.destroyed {
            return;
        }
        st.ended = true;
        debug!(buffered = st.queue.len(), "accumulator ended");
        self.shared.arm(&mut st);
    }

    /// Stop immediately. Buffered items are dropped and their completions
    /// settle with [`DeliveryError::Cancelled`]. No event is emitted.
    pub fn destroy(&self) {
        let mut st = self.shared.lock();
        if st.destroyed {
            return;
        }
        st.destroyed = true;
        st.stop_timer();
        let dropped = st.queue.len();
        let pending = st.queue.clear();
        st.overflow = false;
        drop(st);

        debug!(dropped, "accumulator destroyed");
        pending.fail_all(DeliveryError::Cancelled);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    pub fn is_ended(&self) -> bool {
        self.shared.lock().ended
    }

    /// Ended and fully drained.
    pub fn is_finished(&self) -> bool {
        self.shared.lock().finished
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.lock().destroyed
    }

    pub fn buffered_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.shared.lock().queue.bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ItemOutcome;
    use crate::config::AccumulatorConfig;

    const TICK: Duration = Duration::from_millis(50);

    fn subject() -> String {
        "foobar".to_string()
    }

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<AccumulatorEvent<String>>) -> Vec<AccumulatorNotice> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev.notice());
        }
        out
    }

    fn data_lens(events: &[AccumulatorNotice]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                AccumulatorNotice::Data { len, .. } => Some(*len),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_flushes_partial_batch() {
        let (acc, mut rx) = Accumulator::new(AccumulatorConfig::default());
        for _ in 0..5 {
            assert!(acc.write(subject()));
        }
        acc.end();
        time::sleep(TICK * 2).await;

        let events = drain_events(&mut rx);
        assert_eq!(data_lens(&events), vec![5]);
        assert_eq!(events.last(), Some(&AccumulatorNotice::End));
        assert!(acc.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_count_bound() {
        let cfg = AccumulatorConfig::default().with_max_batch_count(2);
        let (acc, mut rx) = Accumulator::new(cfg);
        for _ in 0..6 {
            acc.write(subject());
        }
        acc.end();
        time::sleep(TICK * 5).await;

        let events = drain_events(&mut rx);
        assert_eq!(data_lens(&events), vec![2, 2, 2]);
        assert_eq!(
            events.iter().filter(|e| **e == AccumulatorNotice::End).count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_limit_backpressure_and_drain() {
        let cfg = AccumulatorConfig::default()
            .with_max_batch_count(1000)
            .with_max_buffer_bytes(18);
        let (acc, mut rx) = Accumulator::new(cfg);

        assert!(acc.write(subject()));
        assert!(acc.write(subject()));
        assert!(acc.write(subject()));
        assert!(!acc.write(subject()));
        assert!(!acc.write(subject()));
        assert!(!acc.write(subject()));

        time::sleep(TICK * 2).await;
        let events = drain_events(&mut rx);
        assert_eq!(
            events,
            vec![
                AccumulatorNotice::Data { len: 6, weight: 36 },
                AccumulatorNotice::Drain
            ]
        );
        assert!(acc.write(subject()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_and_resume_releases() {
        let cfg = AccumulatorConfig::default().with_max_batch_count(2);
        let (acc, mut rx) = Accumulator::new(cfg);

        acc.write(subject());
        acc.pause();
        acc.pause();
        for _ in 0..3 {
            acc.write(subject());
        }
        time::sleep(TICK * 4).await;
        let held = drain_events(&mut rx);
        assert_eq!(held, vec![AccumulatorNotice::Pause]);

        acc.resume();
        acc.resume();
        time::sleep(TICK * 4).await;
        let released = drain_events(&mut rx);
        assert_eq!(released[0], AccumulatorNotice::Resume);
        assert_eq!(data_lens(&released), vec![2, 2]);
        assert!(!released.contains(&AccumulatorNotice::Pause));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_ignores_pause() {
        let cfg = AccumulatorConfig::default().with_max_batch_count(2);
        let (acc, mut rx) = Accumulator::new(cfg);
        acc.pause();
        for _ in 0..3 {
            acc.write(subject());
        }
        assert!(acc.step());
        // one item is below the batch threshold
        assert!(!acc.step());
        assert!(acc.is_paused());
        let events = drain_events(&mut rx);
        assert_eq!(data_lens(&events), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_batch_count_cuts_early() {
        let cfg = AccumulatorConfig::default().with_min_batch_count(3);
        let (acc, mut rx) = Accumulator::new(cfg);
        for _ in 0..4 {
            acc.write(subject());
        }
        time::sleep(TICK + Duration::from_millis(1)).await;
        assert_eq!(data_lens(&drain_events(&mut rx)), vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_cycle_goes_dormant_and_rearms() {
        let cfg = AccumulatorConfig::default().with_max_batch_count(1);
        let (acc, mut rx) = Accumulator::new(cfg);
        acc.write(subject());
        time::sleep(TICK * 3).await;
        assert_eq!(data_lens(&drain_events(&mut rx)), vec![1]);

        acc.write(subject());
        time::sleep(TICK * 2).await;
        assert_eq!(data_lens(&drain_events(&mut rx)), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_on_empty_stream() {
        let (acc, mut rx) = Accumulator::<String>::new(AccumulatorConfig::default());
        acc.end();
        acc.end();
        time::sleep(TICK * 2).await;
        assert_eq!(
            drain_events(&mut rx),
            vec![AccumulatorNotice::Empty, AccumulatorNotice::End]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_after_end_is_ignored() {
        let (acc, _rx) = Accumulator::new(AccumulatorConfig::default());
        acc.end();
        let (c, receipt) = Completion::channel();
        assert!(!acc.write_with(subject(), c));
        assert_eq!(receipt.await.unwrap_err(), DeliveryError::Cancelled);
        assert_eq!(acc.buffered_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_cancels_buffered_completions() {
        let (acc, mut rx) = Accumulator::new(AccumulatorConfig::default());
        let seen = Arc::new(Mutex::new(Vec::<ItemOutcome>::new()));
        for _ in 0..3 {
            let sink = Arc::clone(&seen);
            acc.write_with(
                subject(),
                Completion::callback(move |o| sink.lock().unwrap().push(o)),
            );
        }
        acc.destroy();
        acc.destroy();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen
            .iter()
            .all(|o| o.as_ref().unwrap_err() == &DeliveryError::Cancelled));

        assert!(!acc.write(subject()));
        time::sleep(TICK * 2).await;
        assert!(drain_events(&mut rx).is_empty());
        assert_eq!(acc.buffered_bytes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_returns_front_batch() {
        let cfg = AccumulatorConfig::default().with_max_batch_count(2);
        let (acc, _rx) = Accumulator::new(cfg);
        for i in 0..3 {
            acc.write(format!("m{i}"));
        }
        let batch = acc.flush();
        assert_eq!(batch.items(), &["m0".to_string(), "m1".to_string()]);
        assert_eq!(acc.buffered_len(), 1);
        assert!(acc.flush().len() == 1);
        assert!(acc.flush().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_settles_completions() {
        let (acc, rx) = Accumulator::new(AccumulatorConfig::default());
        drop(rx);
        let (c, receipt) = Completion::channel();
        acc.write_with(subject(), c);
        acc.end();
        assert_eq!(receipt.await.unwrap_err(), DeliveryError::Cancelled);
    }
}
