//! 弹性模式模块：按服务商划分的滑动窗口限流、优先级排队与指数退避重试。
//!
//! # Provider Rate Limiting Module
//!
//! This module queues outbound requests per provider and only starts them when
//! the provider's limits allow.
//!
//! ## Overview
//!
//! Each provider has independent limits:
//! - A sliding window budget: at most `max_requests` starts per `window_ms`
//! - A concurrency cap: at most `max_concurrent` requests in flight
//! - A retry policy for transient failures, with exponential backoff
//!
//! Requests wait in a priority queue (higher priority first, FIFO among
//! equals) and the queue drains whenever a slot or window budget frees up.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RateLimiter`] | Per-provider queues, drain loop and status queries |
//! | [`RateLimitConfig`] | Limits for one provider |
//! | [`ProviderLimits`] | Named limits; shipped defaults plus YAML overrides |
//! | [`RequestError`] | Failure, queue-cleared or abandoned outcome |
//! | [`QueueStatus`] | Serializable snapshot of one provider's queue |
//!
//! ## Example
//!
//! ```rust
//! use ioc_pipeline::resilience::{RateLimitConfig, RateLimiter};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let limiter = RateLimiter::new();
//! limiter.set_provider_config(
//!     "splunk",
//!     RateLimitConfig::new()
//!         .with_max_requests(10)
//!         .with_window(Duration::from_secs(1))
//!         .with_max_concurrent(2),
//! ).unwrap();
//!
//! let answer = limiter
//!     .execute_request("splunk", || async { Ok::<_, String>(42) }, 0)
//!     .await
//!     .unwrap();
//! assert_eq!(answer, 42);
//! # });
//! ```
//!
//! ## Retry Classification
//!
//! A failure is retried when its message contains one of
//! [`RETRYABLE_ERROR_PATTERNS`] (case-insensitive) and the request has retries
//! left. The delay before retry `n` is `retry_delay_ms * 2^(n-1)`. Every other
//! failure is returned to the caller as-is.

mod config;
mod error;
pub(crate) mod queue;
mod rate_limiter;
mod retry;

pub use config::{ProviderLimits, RateLimitConfig};
pub use error::RequestError;
pub use rate_limiter::{QueueStatus, RateLimiter, CLEANUP_INTERVAL};
pub use retry::{backoff_delay, is_retryable_message, RETRYABLE_ERROR_PATTERNS};
