//! 分发器：把批次交给批量传输调用，限制并发在途数量，并把聚合响应对账回逐条结果。
//!
//! # Dispatcher
//!
//! Every [`send`](Dispatcher::send) spawns one transport call. The number of
//! calls still running is the only admission signal:
//!
//! - `send` returns `false` once outstanding calls reach `concurrency_limit`,
//!   and keeps returning `false` until the count falls to half the limit.
//! - At that point [`DispatcherEvent::Drain`] fires once.
//! - After [`end`](Dispatcher::end), [`DispatcherEvent::Close`] fires once the
//!   last call resolves.
//!
//! Sends are never refused: the limit is advisory for a well-behaved upstream.
//!
//! ## Outcomes
//!
//! | Transport result | Items | Counters | Event |
//! |------------------|-------|----------|-------|
//! | `Ok(response)` | reconciled positionally | `+= successCount / failureCount` | - |
//! | empty response | `Transport` error | `failure += len` | `Error(EmptyResponse)` |
//! | `Err(e)` | `Transport` error | `failure += len` | `Error(e)` |

use crate::batch::Batch;
use crate::config::DispatcherConfig;
use crate::error::DeliveryError;
use crate::reconcile::{reconcile, FailureStats};
use crate::transport::{BulkTransport, TransportError};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Notification published by a [`Dispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherEvent {
    /// Outstanding calls fell to half the limit after saturation.
    Drain,
    /// Ended and every call has resolved.
    Close,
    /// A whole transport call failed.
    Error(TransportError),
}

/// Point-in-time dispatcher counters.
///
/// `success_count` and `failure_count` are the totals the remote service
/// reported. A response carrying counts without per-item results adds to
/// them even though each of its items settles with
/// [`DeliveryError::MissingResult`], so these totals can exceed the number of
/// items that observed a success or rejection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub concurrency_limit: usize,
    pub call_count: u64,
    pub outstanding: usize,
    pub success_count: u64,
    pub failure_count: u64,
    pub failure_stats: FailureStats,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct State {
    outstanding: usize,
    saturated: bool,
    ended: bool,
    closed: bool,
    call_count: u64,
    success_count: u64,
    failure_count: u64,
    failure_stats: FailureStats,
}

struct Inner<T> {
    limit: usize,
    transport: Arc<dyn BulkTransport<T>>,
    runtime: Handle,
    events: mpsc::UnboundedSender<DispatcherEvent>,
    closed_tx: watch::Sender<bool>,
    state: Mutex<State>,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: DispatcherEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    fn close_locked(&self, st: &mut State) {
        st.closed = true;
        self.emit(DispatcherEvent::Close);
        self.closed_tx.send_replace(true);
        info!(
            calls = st.call_count,
            successes = st.success_count,
            failures = st.failure_count,
            "dispatcher closed"
        );
    }
}

/// Concurrency-limited front of a [`BulkTransport`].
///
/// Cloning yields another handle to the same dispatcher.
pub struct Dispatcher<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Dispatcher<T> {
    /// Create a dispatcher on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new<B>(
        transport: B,
        config: DispatcherConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DispatcherEvent>)
    where
        B: BulkTransport<T> + 'static,
    {
        Self::from_arc(Arc::new(transport), config, Handle::current())
    }

    pub fn from_arc(
        transport: Arc<dyn BulkTransport<T>>,
        config: DispatcherConfig,
        runtime: Handle,
    ) -> (Self, mpsc::UnboundedReceiver<DispatcherEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        let inner = Inner {
            limit: config.concurrency_limit.max(1),
            transport,
            runtime,
            events: tx,
            closed_tx,
            state: Mutex::new(State::default()),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Start a transport call for `batch`. Returns `false` when the caller
    /// should stop sending until [`DispatcherEvent::Drain`].
    ///
    /// Empty batches are ignored. A batch sent after [`end`](Self::end) is
    /// dropped and its completions settle as cancelled.
    pub fn send(&self, batch: Batch<T>) -> bool {
        let mut st = self.inner.lock();
        if batch.is_empty() {
            return !st.saturated && !st.ended;
        }
        if st.ended {
            drop(st);
            warn!(len = batch.len(), "send after end; batch cancelled");
            drop(batch);
            return false;
        }

        st.outstanding += 1;
        st.call_count += 1;
        if st.outstanding >= self.inner.limit && !st.saturated {
            st.saturated = true;
            debug!(
                outstanding = st.outstanding,
                limit = self.inner.limit,
                "dispatcher saturated"
            );
        }
        let accepting = !st.saturated;
        drop(st);

        let batch_id = Uuid::new_v4();
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(Self::deliver(inner, batch, batch_id));
        accepting
    }

    async fn deliver(inner: Arc<Inner<T>>, batch: Batch<T>, batch_id: Uuid) {
        let (items, completions) = batch.into_parts();
        let len = items.len();
        debug!(%batch_id, len, "transport call started");

        let result = AssertUnwindSafe(inner.transport.bulk_send(&items))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(TransportError::Other("transport panicked".to_string())));
        let result = match result {
            Ok(resp) if resp.is_empty() => Err(TransportError::EmptyResponse),
            other => other,
        };

        let mut failed = None;
        match result {
            Ok(resp) => {
                let rec = reconcile(&resp, len);
                if rec.missing > 0 {
                    if resp.results.is_empty() {
                        debug!(%batch_id, len, "response carried counts only");
                    } else {
                        warn!(%batch_id, len, results = resp.results.len(), "response shorter than batch");
                    }
                }
                if rec.extra > 0 {
                    warn!(%batch_id, len, extra = rec.extra, "response has results beyond batch");
                }
                {
                    let mut st = inner.lock();
                    st.success_count += resp.success_count;
                    st.failure_count += resp.failure_count;
                    st.failure_stats.merge(&rec.failure_stats);
                }
                debug!(
                    %batch_id,
                    successes = resp.success_count,
                    failures = resp.failure_count,
                    "transport call finished"
                );
                completions.settle(rec.outcomes);
            }
            Err(e) => {
                warn!(%batch_id, len, error = %e, "transport call failed");
                inner.lock().failure_count += len as u64;
                completions.fail_all(DeliveryError::Transport(e.to_string()));
                failed = Some(e);
            }
        }

        let mut st = inner.lock();
        st.outstanding -= 1;
        if let Some(e) = failed {
            inner.emit(DispatcherEvent::Error(e));
        }
        if st.saturated && st.outstanding * 2 <= inner.limit {
            st.saturated = false;
            debug!(outstanding = st.outstanding, "dispatcher drained");
            inner.emit(DispatcherEvent::Drain);
        }
        if st.ended && st.outstanding == 0 && !st.closed {
            inner.close_locked(&mut st);
        }
    }

    /// No more batches. Close fires once in-flight calls resolve, or now if
    /// none are outstanding.
    pub fn end(&self) {
        let mut st = self.inner.lock();
        if st.ended {
            return;
        }
        st.ended = true;
        debug!(outstanding = st.outstanding, "dispatcher ended");
        if st.outstanding == 0 {
            self.inner.close_locked(&mut st);
        }
    }

    /// Resolves once the dispatcher has closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        // the sender lives in `inner`, which `self` keeps alive
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn is_ended(&self) -> bool {
        self.inner.lock().ended
    }

    pub fn outstanding(&self) -> usize {
        self.inner.lock().outstanding
    }

    pub fn concurrency_limit(&self) -> usize {
        self.inner.limit
    }

    pub fn stats(&self) -> DispatcherStats {
        let st = self.inner.lock();
        DispatcherStats {
            concurrency_limit: self.inner.limit,
            call_count: st.call_count,
            outstanding: st.outstanding,
            success_count: st.success_count,
            failure_count: st.failure_count,
            failure_stats: st.failure_stats.clone(),
            closed: st.closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Completion, ItemOutcome, Receipt};
    use crate::response::{AggregateResponse, ItemResult};
    use crate::transport::InMemoryTransport;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio::time;

    /// Each call waits for one permit.
    struct GatedTransport {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl BulkTransport<String> for GatedTransport {
        async fn bulk_send(&self, items: &[String]) -> Result<AggregateResponse, TransportError> {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            Ok(AggregateResponse::accepted(items.len()))
        }
    }

    struct PanickingTransport;

    #[async_trait]
    impl BulkTransport<String> for PanickingTransport {
        async fn bulk_send(&self, _items: &[String]) -> Result<AggregateResponse, TransportError> {
            panic!("boom");
        }
    }

    fn batch_of(n: usize) -> Batch<String> {
        (0..n).map(|i| format!("m{i}")).collect()
    }

    fn tracked_batch(n: usize) -> (Batch<String>, Vec<Receipt>) {
        let mut batch = Batch::new();
        let mut receipts = Vec::new();
        for i in 0..n {
            let (c, r) = Completion::channel();
            batch.push_with(format!("m{i}"), c);
            receipts.push(r);
        }
        (batch, receipts)
    }

    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    fn events(rx: &mut mpsc::UnboundedReceiver<DispatcherEvent>) -> Vec<DispatcherEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_hysteresis() {
        let gate = Arc::new(Semaphore::new(0));
        let (d, mut rx) = Dispatcher::new(
            GatedTransport { gate: Arc::clone(&gate) },
            DispatcherConfig::new().with_concurrency_limit(4),
        );

        let accepted: Vec<bool> = (0..4).map(|_| d.send(batch_of(1))).collect();
        assert_eq!(accepted, vec![true, true, true, false]);

        gate.add_permits(1);
        settle().await;
        assert_eq!(d.outstanding(), 3);
        assert!(events(&mut rx).is_empty());
        // still latched above half the limit
        assert!(!d.send(batch_of(1)));

        gate.add_permits(2);
        settle().await;
        assert_eq!(d.outstanding(), 2);
        assert_eq!(events(&mut rx), vec![DispatcherEvent::Drain]);
        assert!(d.send(batch_of(1)));

        gate.add_permits(10);
        settle().await;
        assert!(events(&mut rx).is_empty());
        assert_eq!(d.stats().call_count, 6);
        assert_eq!(d.stats().success_count, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_without_outstanding_closes_now() {
        let (d, mut rx) = Dispatcher::<String>::new(
            InMemoryTransport::accept_all(),
            DispatcherConfig::default(),
        );
        d.end();
        d.end();
        d.closed().await;
        assert!(d.is_closed());
        assert_eq!(events(&mut rx), vec![DispatcherEvent::Close]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_waits_for_in_flight() {
        let transport = Arc::new(
            InMemoryTransport::<String>::accept_all().with_latency(Duration::from_millis(200)),
        );
        let (d, mut rx) = Dispatcher::new(Arc::clone(&transport), DispatcherConfig::default());
        assert!(d.send(batch_of(50)));
        assert!(d.send(batch_of(3)));
        d.end();
        assert!(!d.is_closed());

        d.closed().await;
        assert_eq!(events(&mut rx), vec![DispatcherEvent::Close]);
        let stats = d.stats();
        assert_eq!(stats.success_count, 53);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(transport.batch_sizes(), vec![50, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_results_reconcile() {
        let (d, _rx) = Dispatcher::new(
            InMemoryTransport::with_responder(|_: &[String]| {
                Ok(AggregateResponse::from_results(vec![
                    ItemResult::ok().with_message_id("id-0"),
                    ItemResult::failed(1002),
                ]))
            }),
            DispatcherConfig::default(),
        );
        let (batch, mut receipts) = tracked_batch(2);
        d.send(batch);

        let second = receipts.pop().unwrap().await;
        let first = receipts.pop().unwrap().await.unwrap();
        assert_eq!(first.success_count, 1);
        assert_eq!(first.results[0].message_id.as_deref(), Some("id-0"));
        let err = second.unwrap_err();
        assert_eq!(err.to_string(), "Invalid 'To' email address");
        assert_eq!(err.status_code(), Some(1002));

        settle().await;
        let stats = d.stats();
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.failure_stats.get(1002), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_fans_out() {
        let (d, mut rx) = Dispatcher::new(
            InMemoryTransport::with_responder(|_: &[String]| {
                Err(TransportError::from_http_status(500))
            }),
            DispatcherConfig::default(),
        );
        let (batch, receipts) = tracked_batch(3);
        d.send(batch);

        let outcomes: Vec<ItemOutcome> = futures::future::join_all(receipts).await;
        for outcome in &outcomes {
            match outcome {
                Err(DeliveryError::Transport(msg)) => assert!(msg.contains("500")),
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        settle().await;
        assert_eq!(d.stats().failure_count, 3);
        assert_eq!(
            events(&mut rx),
            vec![DispatcherEvent::Error(TransportError::from_http_status(500))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_response_is_transport_error() {
        let (d, mut rx) = Dispatcher::new(
            InMemoryTransport::with_responder(|_: &[String]| Ok(AggregateResponse::default())),
            DispatcherConfig::default(),
        );
        let (batch, receipts) = tracked_batch(1);
        d.send(batch);
        for r in receipts {
            assert!(matches!(r.await, Err(DeliveryError::Transport(_))));
        }
        settle().await;
        assert_eq!(
            events(&mut rx),
            vec![DispatcherEvent::Error(TransportError::EmptyResponse)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_only_response() {
        let (d, mut rx) = Dispatcher::new(
            InMemoryTransport::with_responder(|items: &[String]| {
                Ok(AggregateResponse {
                    success_count: items.len() as u64,
                    ..Default::default()
                })
            }),
            DispatcherConfig::default(),
        );
        let (batch, receipts) = tracked_batch(2);
        d.send(batch);
        let outcomes = futures::future::join_all(receipts).await;
        assert_eq!(
            outcomes[1].as_ref().unwrap_err(),
            &DeliveryError::MissingResult { index: 1 }
        );
        assert_eq!(
            outcomes[0].as_ref().unwrap_err(),
            &DeliveryError::MissingResult { index: 0 }
        );
        settle().await;
        // reported totals are kept even though no item saw a result
        assert_eq!(d.stats().success_count, 2);
        assert!(events(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_end_cancels() {
        let (d, _rx) = Dispatcher::new(
            InMemoryTransport::<String>::accept_all(),
            DispatcherConfig::default(),
        );
        d.end();
        let (batch, receipts) = tracked_batch(1);
        assert!(!d.send(batch));
        for r in receipts {
            assert_eq!(r.await.unwrap_err(), DeliveryError::Cancelled);
        }
        assert_eq!(d.stats().call_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_transport_settles_items() {
        let (d, mut rx) = Dispatcher::new(PanickingTransport, DispatcherConfig::default());
        let (batch, receipts) = tracked_batch(2);
        d.send(batch);
        d.end();
        for r in receipts {
            assert!(matches!(r.await, Err(DeliveryError::Transport(_))));
        }
        d.closed().await;
        let evs = events(&mut rx);
        assert!(matches!(evs[0], DispatcherEvent::Error(TransportError::Other(_))));
        assert_eq!(evs[1], DispatcherEvent::Close);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_callback_still_closes() {
        let (d, mut rx) = Dispatcher::new(
            InMemoryTransport::<String>::accept_all(),
            DispatcherConfig::default(),
        );
        let mut batch = Batch::new();
        batch.push_with("m0".to_string(), Completion::callback(|_| panic!("callback failed")));
        let (c, receipt) = Completion::channel();
        batch.push_with("m1".to_string(), c);
        d.send(batch);
        d.end();

        assert!(receipt.await.is_ok());
        time::timeout(Duration::from_secs(5), d.closed())
            .await
            .expect("dispatcher closes after a callback panic");
        assert_eq!(d.outstanding(), 0);
        assert_eq!(events(&mut rx), vec![DispatcherEvent::Close]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch_is_noop() {
        let (d, _rx) = Dispatcher::new(
            InMemoryTransport::<String>::accept_all(),
            DispatcherConfig::default(),
        );
        assert!(d.send(Batch::new()));
        assert_eq!(d.stats().call_count, 0);
    }
}
