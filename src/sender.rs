//! Push-style batch sender with per-item receipts.

use crate::batch::{Batch, BatchQueue, Completion, ItemOutcome, Receipt, Weighted};
use crate::config::{DispatcherConfig, SenderConfig};
use crate::dispatcher::{Dispatcher, DispatcherEvent, DispatcherStats};
use crate::error::DeliveryError;
use crate::transport::BulkTransport;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Queues single items and sends them `max_send` at a time.
///
/// Each pushed item gets its own outcome: a single-item virtual response on
/// success, or a [`DeliveryError`].
///
/// ```rust,no_run
/// use bulk_dispatch::config::{DispatcherConfig, SenderConfig};
/// use bulk_dispatch::message::EmailMessage;
/// use bulk_dispatch::sender::BatchSender;
/// use bulk_dispatch::transport::InMemoryTransport;
///
/// # async fn run() {
/// let (sender, _events) = BatchSender::new(
///     InMemoryTransport::accept_all(),
///     SenderConfig::default(),
///     DispatcherConfig::default(),
/// );
/// let receipt = sender.push(EmailMessage::new("to@example.com", "from@example.com", "hi"));
/// sender.close().await;
/// assert!(receipt.await.is_ok());
/// # }
/// ```
pub struct BatchSender<T> {
    dispatcher: Dispatcher<T>,
    queue: Mutex<BatchQueue<T>>,
    max_send: usize,
}

impl<T: Weighted + Send + Sync + 'static> BatchSender<T> {
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new<B>(
        transport: B,
        config: SenderConfig,
        dispatcher: DispatcherConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DispatcherEvent>)
    where
        B: BulkTransport<T> + 'static,
    {
        let (dispatcher, events) = Dispatcher::new(transport, dispatcher);
        (Self::from_dispatcher(dispatcher, config), events)
    }

    pub fn from_dispatcher(dispatcher: Dispatcher<T>, config: SenderConfig) -> Self {
        Self {
            dispatcher,
            max_send: config.max_send.max(1),
            queue: Mutex::new(BatchQueue::new(config.limits())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchQueue<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an item; the receipt resolves with its outcome.
    pub fn push(&self, item: T) -> Receipt {
        let (completion, receipt) = Completion::channel();
        self.enqueue(item, completion);
        receipt
    }

    /// Queue an item; `callback` runs once with its outcome.
    pub fn push_with<F>(&self, item: T, callback: F)
    where
        F: FnOnce(ItemOutcome) + Send + 'static,
    {
        self.enqueue(item, Completion::callback(callback));
    }

    fn enqueue(&self, item: T, completion: Completion) {
        if self.dispatcher.is_ended() {
            warn!("push after close; item cancelled");
            completion.complete(Err(DeliveryError::Cancelled));
            return;
        }

        let mut ready = Vec::new();
        {
            let mut queue = self.lock();
            queue.push(item, Some(completion));
            while queue.has_full_batch(self.max_send) {
                ready.push(queue.dequeue_batch());
            }
        }
        for batch in ready {
            self.dispatch(batch);
        }
    }

    fn dispatch(&self, batch: Batch<T>) {
        let len = batch.len();
        if !self.dispatcher.send(batch) {
            debug!(len, outstanding = self.dispatcher.outstanding(), "dispatcher at limit");
        }
    }

    /// Send everything queued. Returns the number of batches sent.
    pub fn flush(&self) -> usize {
        let batches = self.lock().drain_batches();
        let n = batches.len();
        for batch in batches {
            self.dispatch(batch);
        }
        n
    }

    /// Flush, stop accepting items and wait for every call to resolve.
    pub async fn close(&self) {
        self.flush();
        self.dispatcher.end();
        self.dispatcher.closed().await;
    }

    /// Items queued but not yet sent.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    pub fn stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }
}
