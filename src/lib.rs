//! # ioc-pipeline
//!
//! 威胁情报指标（IOC）抽取流水线的并发控制层：分批执行、信号量限流与按服务商的请求排队。
//!
//! Concurrency control for an indicator-of-compromise extraction pipeline.
//!
//! ## Overview
//!
//! Large threat reports are split into chunks and pushed through extractors
//! that are either local or backed by rate-limited LLM providers. This crate
//! provides the plumbing between the two:
//!
//! - **Batching**: fixed-size batches with bounded concurrency, failure
//!   isolation and progress reporting via [`batch::BatchProcessingEngine`]
//! - **Semaphore**: FIFO-fair counting semaphore via [`concurrency::Semaphore`]
//! - **Rate limiting**: per-provider sliding windows, concurrency caps,
//!   priority queues and retry via [`resilience::RateLimiter`]
//!
//! ## Quick Start
//!
//! ```rust
//! use ioc_pipeline::{BatchConfig, BatchProcessingEngine, RateLimiter};
//!
//! # tokio_test::block_on(async {
//! let limiter = RateLimiter::new();
//! let engine = BatchProcessingEngine::new();
//!
//! let result = engine
//!     .process_batch(
//!         vec!["a", "b", "c"],
//!         |batch: Vec<&str>, _| {
//!             let limiter = limiter.clone();
//!             async move {
//!                 limiter
//!                     .execute_request(
//!                         "ollama",
//!                         move || {
//!                             let batch = batch.clone();
//!                             async move { Ok::<_, String>(batch.iter().map(|s| s.len()).collect::<Vec<_>>()) }
//!                         },
//!                         0,
//!                     )
//!                     .await
//!                     .map_err(|e| e.to_string())
//!             }
//!         },
//!         Some(BatchConfig::new().with_batch_size(2)),
//!         None,
//!     )
//!     .await;
//!
//! assert_eq!(result.results, vec![1, 1, 1]);
//! # });
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`batch`] | Batch engine, progress, IOC chunking and merging |
//! | [`concurrency`] | Counting semaphore |
//! | [`resilience`] | Provider rate limiter, retry policy and limits config |
//! | [`error`] | Crate error type |

pub mod batch;
pub mod concurrency;
pub mod resilience;

// Re-export main types for convenience
pub use batch::{BatchConfig, BatchProcessingEngine, BatchResult};
pub use concurrency::Semaphore;
pub use resilience::{RateLimitConfig, RateLimiter, RequestError};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
