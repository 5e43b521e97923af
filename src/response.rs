//! Aggregate response wire types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response to one bulk transport call.
///
/// `results[i]` belongs to `batch[i]`. Fields the crate does not model are
/// kept in `extra` so single-item virtual responses carry them too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub results: Vec<ItemResult>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AggregateResponse {
    /// Response accepting `n` items, each with an ok result.
    pub fn accepted(n: usize) -> Self {
        Self {
            status_code: Some(202),
            success_count: n as u64,
            results: (0..n).map(|_| ItemResult::ok()).collect(),
            ..Default::default()
        }
    }

    /// Build from explicit per-item results; counts are derived from them.
    pub fn from_results(results: Vec<ItemResult>) -> Self {
        let failures = results.iter().filter(|r| !r.is_ok()).count() as u64;
        Self {
            status_code: Some(202),
            success_count: results.len() as u64 - failures,
            failure_count: failures,
            results,
            ..Default::default()
        }
    }

    /// No results and zero counts.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.success_count == 0 && self.failure_count == 0
    }

    /// Single-item response for `result`, keeping every other field of `self`.
    pub fn virtualize(&self, result: ItemResult) -> Self {
        let ok = result.is_ok();
        Self {
            status_code: self.status_code,
            status_message: self.status_message.clone(),
            success_count: u64::from(ok),
            failure_count: u64::from(!ok),
            results: vec![result],
            extra: self.extra.clone(),
        }
    }
}

/// Result for one item inside an [`AggregateResponse`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_email: Option<String>,
    /// `None` or `0` means accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_status: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ItemResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failed(code: u32) -> Self {
        Self {
            message_status: Some(code),
            ..Default::default()
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_to_email(mut self, email: impl Into<String>) -> Self {
        self.to_email = Some(email.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.failure_code().is_none()
    }

    /// Failure status code, if any.
    pub fn failure_code(&self) -> Option<u32> {
        self.message_status.filter(|c| *c != 0)
    }
}
