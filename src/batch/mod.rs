//! 批处理基础模块：提供条目权重、有界批次队列和单条完成句柄。
//!
//! # Batch Building Blocks
//!
//! This module holds the data structures shared by the [`Accumulator`](crate::accumulator::Accumulator),
//! the [`Dispatcher`](crate::dispatcher::Dispatcher) and the [`BatchSender`](crate::sender::BatchSender).
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Weighted`] | Byte weight of an item, used for size accounting |
//! | [`Batch`] | Ordered group of items dispatched in one transport call |
//! | [`BatchQueue`] | FIFO buffer that cuts count- and byte-bounded batches |
//! | [`Completion`] | Exactly-once outcome handle for one item |
//! | [`Receipt`] | Future side of a channel-backed [`Completion`] |
//!
//! ## Bounding Rule
//!
//! A batch never holds more than the effective max count, and the sum of its
//! weights never exceeds `max_batch_bytes`, except that the first item is
//! always taken so one oversized item cannot be starved.
//!
//! ```rust
//! use bulk_dispatch::batch::BatchQueue;
//! use bulk_dispatch::config::BatchLimits;
//!
//! let limits = BatchLimits::new(2, 1024);
//! let mut queue: BatchQueue<String> = BatchQueue::new(limits);
//! for word in ["a", "b", "c"] {
//!     queue.push(word.to_string(), None);
//! }
//!
//! let first = queue.dequeue_batch();
//! assert_eq!(first.items(), &["a".to_string(), "b".to_string()]);
//! assert_eq!(queue.len(), 1);
//! ```

mod completion;
mod queue;
mod weight;

pub use completion::{Completion, Completions, ItemOutcome, Receipt};
pub use queue::{Batch, BatchQueue};
pub use weight::Weighted;
