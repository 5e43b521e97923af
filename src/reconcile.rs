//! 结果对账：把一次聚合响应拆回逐条结果。
//!
//! # Result Reconciliation
//!
//! Maps an [`AggregateResponse`] for an `n`-item batch onto `n` per-item
//! outcomes, positionally:
//!
//! | `results[i]` | Outcome for item `i` |
//! |--------------|----------------------|
//! | ok (status absent or `0`) | `Ok` with a single-item virtual response |
//! | failure status `c` | `Err(Rejected { code: c, .. })`, `failure_stats[c] += 1` |
//! | missing | `Err(MissingResult { index: i })` |
//!
//! Results beyond `n` are counted in [`Reconciliation::extra`] and ignored.

use crate::batch::ItemOutcome;
use crate::error::DeliveryError;
use crate::response::{AggregateResponse, ItemResult};
use crate::status::describe_message_status;
use serde::Serialize;
use std::collections::BTreeMap;

/// Failure counts per extended status code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FailureStats {
    counts: BTreeMap<u32, u64>,
}

impl FailureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, code: u32) {
        *self.counts.entry(code).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &FailureStats) {
        for (code, n) in &other.counts {
            *self.counts.entry(*code).or_insert(0) += n;
        }
    }

    pub fn get(&self, code: u32) -> u64 {
        self.counts.get(&code).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// `(code, count)` pairs in ascending code order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.counts.iter().map(|(c, n)| (*c, *n))
    }
}

/// Per-item outcomes derived from one aggregate response.
#[derive(Debug)]
pub struct Reconciliation {
    /// One outcome per batch item, in index order.
    pub outcomes: Vec<ItemOutcome>,
    pub failure_stats: FailureStats,
    /// Items with no matching result.
    pub missing: usize,
    /// Results with no matching item.
    pub extra: usize,
}

/// Outcome for one item given its result.
pub fn reconcile_result(response: &AggregateResponse, result: &ItemResult) -> ItemOutcome {
    match result.failure_code() {
        None => Ok(response.virtualize(result.clone())),
        Some(code) => Err(DeliveryError::Rejected {
            code,
            message: describe_message_status(code),
        }),
    }
}

/// Reconcile `response` against a batch of `len` items.
pub fn reconcile(response: &AggregateResponse, len: usize) -> Reconciliation {
    let mut failure_stats = FailureStats::new();
    let mut outcomes = Vec::with_capacity(len);

    for index in 0..len {
        let outcome = match response.results.get(index) {
            Some(result) => {
                if let Some(code) = result.failure_code() {
                    failure_stats.record(code);
                }
                reconcile_result(response, result)
            }
            None => Err(DeliveryError::MissingResult { index }),
        };
        outcomes.push(outcome);
    }

    Reconciliation {
        outcomes,
        failure_stats,
        missing: len.saturating_sub(response.results.len()),
        extra: response.results.len().saturating_sub(len),
    }
}
