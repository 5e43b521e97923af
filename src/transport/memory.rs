//! In-process transport.

use super::{BulkTransport, TransportError};
use crate::response::AggregateResponse;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type Responder<T> = dyn Fn(&[T]) -> Result<AggregateResponse, TransportError> + Send + Sync;

/// Records every call and answers through a responder closure.
///
/// The default responder accepts every item.
pub struct InMemoryTransport<T> {
    responder: Arc<Responder<T>>,
    latency: Option<Duration>,
    sent: Mutex<Vec<Vec<T>>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl<T: Clone + Send + Sync + 'static> InMemoryTransport<T> {
    pub fn accept_all() -> Self {
        Self::with_responder(|items: &[T]| Ok(AggregateResponse::accepted(items.len())))
    }

    pub fn with_responder<F>(f: F) -> Self
    where
        F: Fn(&[T]) -> Result<AggregateResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(f),
            latency: None,
            sent: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(Vec::len).collect()
    }

    /// Payloads of every call, in call order.
    pub fn batches(&self) -> Vec<Vec<T>> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> BulkTransport<T> for InMemoryTransport<T> {
    async fn bulk_send(&self, items: &[T]) -> Result<AggregateResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(items.to_vec());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.responder.as_ref())(items)
    }
}
