//! Batch engine configuration.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_MAX_CONCURRENCY: usize = 3;
const DEFAULT_DELAY_MS: u64 = 100;
const DEFAULT_MEMORY_CHECK_SECS: u64 = 5;

/// Settings for one [`process_batch`](super::BatchProcessingEngine::process_batch) call.
///
/// Deserializes from partial records: missing fields take the documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items per batch. Must be greater than zero.
    pub batch_size: usize,
    /// Batches allowed to run at once. Must be greater than zero.
    pub max_concurrency: usize,
    /// Pause a batch holder takes after a successful, non-final batch while
    /// still holding its concurrency slot.
    pub delay_between_batches_ms: u64,
    pub enable_progress_tracking: bool,
    /// Heap usage (MB) above which the memory sampler warns. `0` disables sampling.
    pub memory_threshold_mb: u64,
    pub memory_check_interval_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            delay_between_batches_ms: DEFAULT_DELAY_MS,
            enable_progress_tracking: true,
            memory_threshold_mb: 0,
            memory_check_interval_ms: DEFAULT_MEMORY_CHECK_SECS * 1000,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_delay_between_batches(mut self, delay: Duration) -> Self {
        self.delay_between_batches_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_progress_tracking(mut self, enabled: bool) -> Self {
        self.enable_progress_tracking = enabled;
        self
    }

    pub fn with_memory_threshold_mb(mut self, mb: u64) -> Self {
        self.memory_threshold_mb = mb;
        self
    }

    pub fn with_memory_check_interval(mut self, interval: Duration) -> Self {
        self.memory_check_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn delay_between_batches(&self) -> Duration {
        Duration::from_millis(self.delay_between_batches_ms)
    }

    pub fn memory_check_interval(&self) -> Duration {
        Duration::from_millis(self.memory_check_interval_ms.max(1))
    }

    /// Batch size clamped to at least one item.
    pub(crate) fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Concurrency clamped to at least one batch.
    pub(crate) fn effective_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }

    /// Defaults overlaid with environment overrides:
    /// - `IOC_BATCH_SIZE`
    /// - `IOC_BATCH_MAX_CONCURRENCY`
    /// - `IOC_BATCH_DELAY_MS`
    /// - `IOC_BATCH_MEMORY_THRESHOLD_MB`
    ///
    /// Unparseable or zero sizes are ignored.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply the `IOC_BATCH_*` environment overrides to this config.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(size) = env_parse::<usize>("IOC_BATCH_SIZE").filter(|v| *v > 0) {
            self.batch_size = size;
        }
        if let Some(n) = env_parse::<usize>("IOC_BATCH_MAX_CONCURRENCY").filter(|v| *v > 0) {
            self.max_concurrency = n;
        }
        if let Some(ms) = env_parse::<u64>("IOC_BATCH_DELAY_MS") {
            self.delay_between_batches_ms = ms;
        }
        if let Some(mb) = env_parse::<u64>("IOC_BATCH_MEMORY_THRESHOLD_MB") {
            self.memory_threshold_mb = mb;
        }
        self
    }

    /// Reject configurations the engine would otherwise silently clamp.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::configuration_with_context(
                "batch_size must be greater than zero",
                ErrorContext::new()
                    .with_field_path("batch.batch_size")
                    .with_source("batch_config"),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(Error::configuration_with_context(
                "max_concurrency must be greater than zero",
                ErrorContext::new()
                    .with_field_path("batch.max_concurrency")
                    .with_source("batch_config"),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}
