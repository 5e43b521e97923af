//! 配置模块：批次上限、自适应权重分级、并发上限及环境变量覆盖。
//!
//! # Configuration
//!
//! Every component takes a plain config struct with documented defaults,
//! `with_*` builders and serde support. [`PipelineConfig`] groups all of them
//! so one YAML file (or a set of environment variables) can configure a whole
//! pipeline.
//!
//! | Key | Default | Env override |
//! |-----|---------|--------------|
//! | `accumulator.max_batch_count` | 50 | `BULK_DISPATCH_MAX_BATCH_COUNT` |
//! | `accumulator.max_batch_bytes` | 1 MiB | `BULK_DISPATCH_MAX_BATCH_BYTES` |
//! | `accumulator.max_buffer_bytes` | 64 MiB | `BULK_DISPATCH_MAX_BUFFER_BYTES` |
//! | `accumulator.min_batch_count` | `max_batch_count` | `BULK_DISPATCH_MIN_BATCH_COUNT` |
//! | `accumulator.drain_interval_ms` | 50 | `BULK_DISPATCH_DRAIN_INTERVAL_MS` |
//! | `dispatcher.concurrency_limit` | 4 | `BULK_DISPATCH_CONCURRENCY_LIMIT` |
//! | `sender.max_send` | 20 | `BULK_DISPATCH_MAX_SEND` |
//!
//! ```rust
//! use bulk_dispatch::config::PipelineConfig;
//!
//! let cfg = PipelineConfig::from_yaml_str(
//!     "accumulator:\n  max_batch_count: 10\ndispatcher:\n  concurrency_limit: 2\n",
//! )
//! .unwrap();
//! assert_eq!(cfg.accumulator.max_batch_count, 10);
//! assert_eq!(cfg.dispatcher.concurrency_limit, 2);
//! assert_eq!(cfg.sender.max_send, 20);
//! ```

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_BATCH_COUNT: usize = 50;
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;
pub const DEFAULT_MAX_SEND: usize = 20;

const ENV_PREFIX: &str = "BULK_DISPATCH_";

/// Caps the batch count once the average item weight reaches `min_avg_weight`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightTier {
    pub min_avg_weight: usize,
    pub max_count: usize,
}

impl WeightTier {
    pub fn new(min_avg_weight: usize, max_count: usize) -> Self {
        Self {
            min_avg_weight,
            max_count,
        }
    }
}

/// Default tiers: 10 KiB average -> 25 items, 50 KiB average -> 10 items.
pub fn default_weight_tiers() -> Vec<WeightTier> {
    vec![
        WeightTier::new(10 * 1024, 25),
        WeightTier::new(50 * 1024, 10),
    ]
}

/// Count and byte bounds for a single batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    pub max_batch_count: usize,
    pub max_batch_bytes: usize,
    pub weight_tiers: Vec<WeightTier>,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_batch_count: DEFAULT_MAX_BATCH_COUNT,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            weight_tiers: default_weight_tiers(),
        }
    }
}

impl BatchLimits {
    /// Fixed limits without adaptive tiers.
    pub fn new(max_batch_count: usize, max_batch_bytes: usize) -> Self {
        Self {
            max_batch_count,
            max_batch_bytes,
            weight_tiers: Vec::new(),
        }
    }

    pub fn with_weight_tiers(mut self, tiers: Vec<WeightTier>) -> Self {
        self.weight_tiers = tiers;
        self
    }

    /// Max batch count for a given average item weight.
    ///
    /// Picks the tier with the largest `min_avg_weight` the average reaches,
    /// capped by `max_batch_count`. Never below 1.
    pub fn effective_max_count(&self, average_weight: usize) -> usize {
        let tier_cap = self
            .weight_tiers
            .iter()
            .filter(|t| average_weight >= t.min_avg_weight)
            .max_by_key(|t| t.min_avg_weight)
            .map(|t| t.max_count);
        let cap = match tier_cap {
            Some(c) => c.min(self.max_batch_count),
            None => self.max_batch_count,
        };
        cap.max(1)
    }
}

/// Accumulator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    pub max_batch_count: usize,
    pub max_batch_bytes: usize,
    /// Buffered bytes beyond which `write` asks the producer to pause.
    pub max_buffer_bytes: usize,
    /// Buffered item count that makes a tick cut a batch. `None` means
    /// `max_batch_count`.
    pub min_batch_count: Option<usize>,
    #[serde(rename = "drain_interval_ms", with = "duration_ms")]
    pub drain_interval: Duration,
    pub weight_tiers: Vec<WeightTier>,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            max_batch_count: DEFAULT_MAX_BATCH_COUNT,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            min_batch_count: None,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            weight_tiers: default_weight_tiers(),
        }
    }
}

impl AccumulatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_batch_count(mut self, n: usize) -> Self {
        self.max_batch_count = n;
        self
    }

    pub fn with_max_batch_bytes(mut self, n: usize) -> Self {
        self.max_batch_bytes = n;
        self
    }

    pub fn with_max_buffer_bytes(mut self, n: usize) -> Self {
        self.max_buffer_bytes = n;
        self
    }

    pub fn with_min_batch_count(mut self, n: usize) -> Self {
        self.min_batch_count = Some(n);
        self
    }

    pub fn with_drain_interval(mut self, d: Duration) -> Self {
        self.drain_interval = d;
        self
    }

    pub fn with_weight_tiers(mut self, tiers: Vec<WeightTier>) -> Self {
        self.weight_tiers = tiers;
        self
    }

    pub fn limits(&self) -> BatchLimits {
        BatchLimits::new(self.max_batch_count, self.max_batch_bytes)
            .with_weight_tiers(self.weight_tiers.clone())
    }

    pub fn effective_min_batch_count(&self) -> usize {
        self.min_batch_count.unwrap_or(self.max_batch_count)
    }

    pub fn validate(&self) -> Result<()> {
        positive("accumulator.max_batch_count", self.max_batch_count)?;
        positive("accumulator.max_batch_bytes", self.max_batch_bytes)?;
        positive("accumulator.max_buffer_bytes", self.max_buffer_bytes)?;
        if let Some(n) = self.min_batch_count {
            positive("accumulator.min_batch_count", n)?;
        }
        if self.drain_interval.is_zero() {
            return Err(invalid(
                "accumulator.drain_interval_ms",
                "must be greater than zero",
                "0",
            ));
        }
        for (i, tier) in self.weight_tiers.iter().enumerate() {
            positive(&format!("accumulator.weight_tiers[{i}].max_count"), tier.max_count)?;
        }
        Ok(())
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Outstanding transport calls at which `send` starts returning `false`.
    pub concurrency_limit: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency_limit(mut self, n: usize) -> Self {
        self.concurrency_limit = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        positive("dispatcher.concurrency_limit", self.concurrency_limit)
    }
}

/// BatchSender settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Items per transport call.
    pub max_send: usize,
    pub max_batch_bytes: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_send: DEFAULT_MAX_SEND,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

impl SenderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_send(mut self, n: usize) -> Self {
        self.max_send = n;
        self
    }

    pub fn with_max_batch_bytes(mut self, n: usize) -> Self {
        self.max_batch_bytes = n;
        self
    }

    pub fn limits(&self) -> BatchLimits {
        BatchLimits::new(self.max_send, self.max_batch_bytes)
    }

    pub fn validate(&self) -> Result<()> {
        positive("sender.max_send", self.max_send)?;
        positive("sender.max_batch_bytes", self.max_batch_bytes)
    }
}

/// Settings for a whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub accumulator: AccumulatorConfig,
    pub dispatcher: DispatcherConfig,
    pub sender: SenderConfig,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read config file: {}", e),
                ErrorContext::new()
                    .with_field_path(path.display().to_string())
                    .with_source("config_file"),
            )
        })?;
        Self::from_yaml_str(&text)
    }

    /// Defaults overridden by `BULK_DISPATCH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup, then validate.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let acc = &mut self.accumulator;
        if let Some(v) = env_value(&lookup, "MAX_BATCH_COUNT")? {
            acc.max_batch_count = v;
        }
        if let Some(v) = env_value(&lookup, "MAX_BATCH_BYTES")? {
            acc.max_batch_bytes = v;
        }
        if let Some(v) = env_value(&lookup, "MAX_BUFFER_BYTES")? {
            acc.max_buffer_bytes = v;
        }
        if let Some(v) = env_value(&lookup, "MIN_BATCH_COUNT")? {
            acc.min_batch_count = Some(v);
        }
        if let Some(ms) = env_value::<u64, _>(&lookup, "DRAIN_INTERVAL_MS")? {
            acc.drain_interval = Duration::from_millis(ms);
        }
        if let Some(v) = env_value(&lookup, "CONCURRENCY_LIMIT")? {
            self.dispatcher.concurrency_limit = v;
        }
        if let Some(v) = env_value(&lookup, "MAX_SEND")? {
            self.sender.max_send = v;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        self.accumulator.validate()?;
        self.dispatcher.validate()?;
        self.sender.validate()
    }
}

fn env_value<V, F>(lookup: &F, suffix: &str) -> Result<Option<V>>
where
    V: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{}{}", ENV_PREFIX, suffix);
    let Some(raw) = lookup(&key) else {
        return Ok(None);
    };
    raw.trim().parse::<V>().map(Some).map_err(|_| {
        Error::configuration_with_context(
            "invalid environment override",
            ErrorContext::new()
                .with_field_path(key.clone())
                .with_details(format!("expected an unsigned integer, got {:?}", raw))
                .with_source("config_env"),
        )
    })
}

fn positive(field: &str, value: usize) -> Result<()> {
    if value == 0 {
        Err(invalid(field, "must be greater than zero", "0"))
    } else {
        Ok(())
    }
}

fn invalid(field: &str, msg: &str, actual: &str) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(format!("actual: {}", actual))
            .with_source("config_validate"),
    )
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
