//! Bounded FIFO batch queue.

use super::completion::{Completion, Completions};
use super::weight::Weighted;
use crate::config::BatchLimits;
use std::collections::VecDeque;
use std::fmt;

/// Ordered group of items dispatched together in one transport call.
///
/// Each item may carry a [`Completion`]; slots stay aligned with item
/// positions so an aggregate response can be fanned back out.
pub struct Batch<T> {
    items: Vec<T>,
    completions: Vec<Option<Completion>>,
    weight: usize,
}

impl<T> Batch<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            items: Vec::with_capacity(n),
            completions: Vec::with_capacity(n),
            weight: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of item weights.
    pub fn weight(&self) -> usize {
        self.weight
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Split into the payload and its aligned completion slots.
    pub fn into_parts(self) -> (Vec<T>, Completions) {
        (self.items, Completions::from_slots(self.completions))
    }

    /// Take the items; any pending completions are cancelled.
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    fn push_weighed(&mut self, item: T, weight: usize, completion: Option<Completion>) {
        self.items.push(item);
        self.completions.push(completion);
        self.weight += weight;
    }
}

impl<T: Weighted> Batch<T> {
    pub fn from_items(items: Vec<T>) -> Self {
        items.into_iter().collect()
    }

    pub fn push(&mut self, item: T) {
        let w = item.weight();
        self.push_weighed(item, w, None);
    }

    pub fn push_with(&mut self, item: T, completion: Completion) {
        let w = item.weight();
        self.push_weighed(item, w, Some(completion));
    }
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Weighted> FromIterator<T> for Batch<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut batch = Batch::new();
        for item in iter {
            batch.push(item);
        }
        batch
    }
}

impl<T: fmt::Debug> fmt::Debug for Batch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("len", &self.items.len())
            .field("weight", &self.weight)
            .field("items", &self.items)
            .finish()
    }
}

struct Entry<T> {
    item: T,
    weight: usize,
    completion: Option<Completion>,
}

/// FIFO buffer that cuts batches by count and cumulative weight.
///
/// Not synchronized; owners wrap it in their own lock.
pub struct BatchQueue<T> {
    limits: BatchLimits,
    entries: VecDeque<Entry<T>>,
    bytes: usize,
}

impl<T: Weighted> BatchQueue<T> {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            entries: VecDeque::new(),
            bytes: 0,
        }
    }

    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    /// Append an item; returns the buffered byte total afterwards.
    pub fn push(&mut self, item: T, completion: Option<Completion>) -> usize {
        let weight = item.weight();
        self.entries.push_back(Entry {
            item,
            weight,
            completion,
        });
        self.bytes = self.bytes.saturating_add(weight);
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Buffered byte total.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Running average item weight, `None` when empty.
    pub fn average_weight(&self) -> Option<usize> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.bytes / self.entries.len())
        }
    }

    /// Max count for the next batch after adaptive sizing.
    pub fn effective_max_count(&self) -> usize {
        self.limits
            .effective_max_count(self.average_weight().unwrap_or(0))
    }

    /// Whether a batch can be cut without waiting for more items.
    ///
    /// `min_count` is clamped to the effective max count so adaptive sizing
    /// never makes the queue wait for more items than it will take.
    pub fn has_full_batch(&self, min_count: usize) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let threshold = min_count.min(self.effective_max_count()).max(1);
        self.entries.len() >= threshold || self.bytes >= self.limits.max_batch_bytes
    }

    /// Remove the next batch from the front. Empty if the queue is empty.
    pub fn dequeue_batch(&mut self) -> Batch<T> {
        let max_count = self.effective_max_count();
        let max_bytes = self.limits.max_batch_bytes;
        let mut batch = Batch::with_capacity(max_count.min(self.entries.len()));

        while let Some(front) = self.entries.front() {
            if batch.len() >= max_count {
                break;
            }
            // the first item is always taken, even when oversized
            if !batch.is_empty() && batch.weight().saturating_add(front.weight) > max_bytes {
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                self.bytes = self.bytes.saturating_sub(entry.weight);
                batch.push_weighed(entry.item, entry.weight, entry.completion);
            }
        }
        batch
    }

    /// Cut batches until the queue is empty.
    pub fn drain_batches(&mut self) -> Vec<Batch<T>> {
        let mut out = Vec::new();
        while !self.entries.is_empty() {
            out.push(self.dequeue_batch());
        }
        out
    }

    /// Remove everything, returning the items' completion slots so the caller
    /// can settle them outside its lock.
    pub fn clear(&mut self) -> Completions {
        self.bytes = 0;
        let slots = self.entries.drain(..).map(|e| e.completion).collect();
        Completions::from_slots(slots)
    }
}
