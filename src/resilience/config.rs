//! Per-provider rate limit configuration.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Limits applied to one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed to start within one sliding window.
    pub max_requests: u32,
    pub window_ms: u64,
    /// Requests allowed in flight at once.
    pub max_concurrent: usize,
    /// Base delay for exponential retry backoff.
    pub retry_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_ms: 60_000,
            max_concurrent: 3,
            retry_delay_ms: 1_000,
            max_retries: 3,
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_requests(mut self, n: u32) -> Self {
        self.max_requests = n;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_ms = window.as_millis() as u64;
        self
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Window clamped to at least one millisecond.
    pub(crate) fn effective_window(&self) -> Duration {
        self.window().max(Duration::from_millis(1))
    }

    pub fn validate(&self, provider: &str) -> Result<()> {
        let fail = |field: &str, msg: &str| {
            Err(Error::configuration_with_context(
                msg,
                ErrorContext::new()
                    .with_field_path(format!("providers.{}.{}", provider, field))
                    .with_source("provider_limits"),
            ))
        };
        if self.max_requests == 0 {
            return fail("max_requests", "max_requests must be greater than zero");
        }
        if self.window_ms == 0 {
            return fail("window_ms", "window_ms must be greater than zero");
        }
        if self.max_concurrent == 0 {
            return fail("max_concurrent", "max_concurrent must be greater than zero");
        }
        Ok(())
    }
}

/// A provider entry as written in a limits file; unset fields inherit.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialRateLimitConfig {
    max_requests: Option<u32>,
    window_ms: Option<u64>,
    max_concurrent: Option<usize>,
    retry_delay_ms: Option<u64>,
    max_retries: Option<u32>,
}

impl PartialRateLimitConfig {
    fn merge_over(self, base: RateLimitConfig) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.max_requests.unwrap_or(base.max_requests),
            window_ms: self.window_ms.unwrap_or(base.window_ms),
            max_concurrent: self.max_concurrent.unwrap_or(base.max_concurrent),
            retry_delay_ms: self.retry_delay_ms.unwrap_or(base.retry_delay_ms),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProviderLimitsFile {
    #[serde(default)]
    providers: BTreeMap<String, PartialRateLimitConfig>,
}

/// Named provider limits, starting from the shipped defaults.
///
/// Limits files are YAML:
///
/// ```yaml
/// providers:
///   openai:
///     max_requests: 30
///   splunk:
///     max_requests: 10
///     window_ms: 1000
///     max_concurrent: 2
/// ```
///
/// Known providers are overridden field by field; new providers start from
/// [`RateLimitConfig::default`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderLimits {
    providers: BTreeMap<String, RateLimitConfig>,
}

impl ProviderLimits {
    /// No providers at all.
    pub fn empty() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    /// The four providers configured out of the box.
    pub fn defaults() -> Self {
        let minute = Duration::from_secs(60);
        let mut limits = Self::empty();
        limits.insert(
            "openai",
            RateLimitConfig::new()
                .with_max_requests(60)
                .with_window(minute)
                .with_max_concurrent(5)
                .with_retry_delay(Duration::from_secs(1))
                .with_max_retries(3),
        );
        limits.insert(
            "anthropic",
            RateLimitConfig::new()
                .with_max_requests(50)
                .with_window(minute)
                .with_max_concurrent(5)
                .with_retry_delay(Duration::from_secs(1))
                .with_max_retries(3),
        );
        limits.insert(
            "gemini",
            RateLimitConfig::new()
                .with_max_requests(60)
                .with_window(minute)
                .with_max_concurrent(5)
                .with_retry_delay(Duration::from_secs(1))
                .with_max_retries(3),
        );
        limits.insert(
            "ollama",
            RateLimitConfig::new()
                .with_max_requests(100)
                .with_window(minute)
                .with_max_concurrent(2)
                .with_retry_delay(Duration::from_millis(500))
                .with_max_retries(2),
        );
        limits
    }

    /// Shipped defaults merged with a YAML limits document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: ProviderLimitsFile = serde_yaml::from_str(yaml)?;
        let mut limits = Self::defaults();
        for (name, partial) in file.providers {
            let base = limits.get(&name).cloned().unwrap_or_default();
            limits.insert(name, partial.merge_over(base));
        }
        limits.validate()?;
        Ok(limits)
    }

    /// Shipped defaults merged with the YAML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Limits from the file named by `IOC_RATE_LIMITS_FILE`, or the shipped
    /// defaults when the variable is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var("IOC_RATE_LIMITS_FILE") {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim()),
            _ => Ok(Self::defaults()),
        }
    }

    pub fn insert(&mut self, provider: impl Into<String>, config: RateLimitConfig) {
        self.providers.insert(provider.into(), config);
    }

    pub fn get(&self, provider: &str) -> Option<&RateLimitConfig> {
        self.providers.get(provider)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RateLimitConfig)> {
        self.providers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        for (name, config) in &self.providers {
            config.validate(name)?;
        }
        Ok(())
    }
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self::defaults()
    }
}

impl IntoIterator for ProviderLimits {
    type Item = (String, RateLimitConfig);
    type IntoIter = std::collections::btree_map::IntoIter<String, RateLimitConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.providers.into_iter()
    }
}
