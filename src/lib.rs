//! # bulk-dispatch
//!
//! 面向批量发送接口的自适应批处理与限流分发管道。
//!
//! Adaptive batching and concurrency-limited dispatch for bulk send APIs.
//!
//! ## Overview
//!
//! Items are written one at a time, grouped into count- and size-bounded
//! batches, and handed to an external bulk transport. The aggregate response
//! of each call is reconciled back into one outcome per item.
//!
//! ## Core Properties
//!
//! - **Bounded**: a batch never exceeds its count or byte limit, except that a
//!   single oversized item is sent alone
//! - **Ordered**: items leave the buffer in write order
//! - **Backpressured**: producers are told to pause by the buffer limit and by
//!   the concurrency limit, with hysteresis on the way back
//! - **Exactly once**: every item submitted with a completion handle is settled
//!   exactly once, even when it is discarded
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bulk_dispatch::config::PipelineConfig;
//! use bulk_dispatch::message::EmailMessage;
//! use bulk_dispatch::pipeline::Pipeline;
//! use bulk_dispatch::transport::InMemoryTransport;
//!
//! #[tokio::main]
//! async fn main() -> bulk_dispatch::Result<()> {
//!     let config = PipelineConfig::from_env()?;
//!     let (pipeline, _events) = Pipeline::from_config(InMemoryTransport::accept_all(), &config)?;
//!
//!     for i in 0..103 {
//!         let msg = EmailMessage::new(format!("user{i}@example.com"), "news@example.com", "Hello");
//!         pipeline.write(msg);
//!     }
//!     pipeline.end();
//!     pipeline.closed().await;
//!
//!     println!("{} sent", pipeline.stats().success_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`accumulator`] | Buffers items and emits bounded batches on a drain cycle |
//! | [`dispatcher`] | Concurrency-limited transport calls and reconciliation |
//! | [`sender`] | Push-style sender with per-item receipts |
//! | [`pipeline`] | Accumulator wired to a dispatcher |
//! | [`batch`] | Weights, batches, the batch queue and completion handles |
//! | [`reconcile`] | Aggregate response to per-item outcomes |
//! | [`response`] | Aggregate response wire types |
//! | [`message`] | E-mail message item |
//! | [`status`] | Status-code tables |
//! | [`transport`] | Bulk transport trait and in-memory transport |
//! | [`config`] | Configuration, env overrides, validation |

pub mod accumulator;
pub mod batch;
pub mod config;
pub mod dispatcher;
pub mod message;
pub mod pipeline;
pub mod reconcile;
pub mod response;
pub mod sender;
pub mod status;
pub mod transport;

/// Error type for the library
pub mod error;
pub use error::{DeliveryError, Error, ErrorContext};

// Re-export main types for convenience
pub use accumulator::{Accumulator, AccumulatorEvent, AccumulatorNotice};
pub use batch::{Batch, Completion, ItemOutcome, Receipt, Weighted};
pub use config::{AccumulatorConfig, DispatcherConfig, PipelineConfig, SenderConfig, WeightTier};
pub use dispatcher::{Dispatcher, DispatcherEvent, DispatcherStats};
pub use pipeline::{Pipeline, PipelineEvent};
pub use response::{AggregateResponse, ItemResult};
pub use sender::BatchSender;
pub use transport::{BulkTransport, TransportError};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
