//! 传输层接口：批量发送调用的边界契约。
//!
//! # Bulk Transport
//!
//! The network client that actually talks to the send API lives outside this
//! crate. It plugs in through [`BulkTransport`]: one call per batch, one
//! [`AggregateResponse`] back, results positionally aligned with the batch.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BulkTransport`] | Async trait implemented by the caller's API client |
//! | [`TransportError`] | Whole-call failure; fans out to every item of the batch |
//! | [`InMemoryTransport`] | Scriptable in-process transport for tests and demos |

use crate::response::AggregateResponse;
use crate::status::http_error;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

mod memory;

pub use memory::InMemoryTransport;

/// Failure of a whole transport call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("empty aggregate response")]
    EmptyResponse,

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// HTTP failure with the reason from the status table, or a generic one.
    pub fn from_http_status(status: u16) -> Self {
        let message = http_error(status)
            .map(str::to_string)
            .unwrap_or_else(|| format!("unexpected HTTP status {}", status));
        TransportError::Http { status, message }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One bulk send call per batch.
///
/// `results[i]` of the returned response must describe `items[i]`. The
/// dispatcher calls this once per batch; any retry happens inside `bulk_send`.
#[async_trait]
pub trait BulkTransport<T>: Send + Sync {
    async fn bulk_send(&self, items: &[T]) -> Result<AggregateResponse, TransportError>;
}

#[async_trait]
impl<T, B> BulkTransport<T> for Arc<B>
where
    T: Sync,
    B: BulkTransport<T> + ?Sized,
{
    async fn bulk_send(&self, items: &[T]) -> Result<AggregateResponse, TransportError> {
        (**self).bulk_send(items).await
    }
}
