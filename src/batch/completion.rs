//! Per-item completion handles.

use crate::error::DeliveryError;
use crate::response::AggregateResponse;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::warn;

/// Outcome delivered to one item: a single-item virtual response on success,
/// or the reason the item was not delivered.
pub type ItemOutcome = std::result::Result<AggregateResponse, DeliveryError>;

enum Handle {
    Channel(oneshot::Sender<ItemOutcome>),
    Callback(Box<dyn FnOnce(ItemOutcome) + Send>),
}

/// Exactly-once outcome handle for one item.
///
/// `complete` consumes the handle, so it cannot fire twice. A handle that is
/// dropped without being completed fires with [`DeliveryError::Cancelled`],
/// so it cannot fire zero times either.
///
/// A panicking callback is contained and logged; it never unwinds into the
/// task that settles the batch.
pub struct Completion {
    handle: Option<Handle>,
}

impl Completion {
    /// Channel-backed completion; the returned [`Receipt`] resolves with the outcome.
    pub fn channel() -> (Self, Receipt) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                handle: Some(Handle::Channel(tx)),
            },
            Receipt { rx },
        )
    }

    /// Callback-backed completion.
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(ItemOutcome) + Send + 'static,
    {
        Self {
            handle: Some(Handle::Callback(Box::new(f))),
        }
    }

    /// Deliver the outcome.
    pub fn complete(mut self, outcome: ItemOutcome) {
        self.fire(outcome);
    }

    fn fire(&mut self, outcome: ItemOutcome) {
        match self.handle.take() {
            // receiver gone means nobody is waiting
            Some(Handle::Channel(tx)) => {
                let _ = tx.send(outcome);
            }
            Some(Handle::Callback(f)) => {
                if panic::catch_unwind(AssertUnwindSafe(move || f(outcome))).is_err() {
                    warn!("completion callback panicked");
                }
            }
            None => {}
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.fire(Err(DeliveryError::Cancelled));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.handle {
            Some(Handle::Channel(_)) => "channel",
            Some(Handle::Callback(_)) => "callback",
            None => "settled",
        };
        f.debug_struct("Completion").field("kind", &kind).finish()
    }
}

/// Completion slots of a batch, positionally aligned with its items.
#[derive(Debug, Default)]
pub struct Completions {
    slots: Vec<Option<Completion>>,
}

impl Completions {
    pub(crate) fn from_slots(slots: Vec<Option<Completion>>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots that carry a handle.
    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Settle every slot in index order with `outcomes[i]`.
    ///
    /// Slots without a matching outcome settle with [`DeliveryError::MissingResult`].
    pub fn settle(self, outcomes: Vec<ItemOutcome>) {
        let mut outcomes = outcomes.into_iter();
        for (index, slot) in self.slots.into_iter().enumerate() {
            let outcome = outcomes
                .next()
                .unwrap_or(Err(DeliveryError::MissingResult { index }));
            if let Some(completion) = slot {
                completion.complete(outcome);
            }
        }
    }

    /// Settle every slot with the same failure.
    pub fn fail_all(self, error: DeliveryError) {
        for completion in self.slots.into_iter().flatten() {
            completion.complete(Err(error.clone()));
        }
    }
}

/// Future resolving to the outcome of one pushed item.
///
/// Resolves to [`DeliveryError::Cancelled`] if the item is discarded.
#[derive(Debug)]
pub struct Receipt {
    rx: oneshot::Receiver<ItemOutcome>,
}

impl Future for Receipt {
    type Output = ItemOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(DeliveryError::Cancelled)))
    }
}
