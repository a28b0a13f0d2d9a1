//! 批处理引擎模块：有界并发的分批执行、失败隔离与进度上报。
//!
//! # Batch Processing Module
//!
//! This module runs large ordered collections through a pluggable processor
//! in fixed-size batches, with a hard cap on how many batches run at once.
//!
//! ## Overview
//!
//! Batching is essential for:
//! - Keeping a downstream extractor or LLM endpoint within its capacity
//! - Isolating failures so one bad batch never sinks the whole run
//! - Reporting live progress, throughput and ETA on long jobs
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BatchProcessingEngine`] | Splits, schedules and aggregates batches |
//! | [`BatchConfig`] | Batch size, concurrency, throttle delay, memory threshold |
//! | [`BatchProgress`] | Snapshot delivered after each successful batch |
//! | [`BatchResult`] | Results, per-item errors and timing for a whole call |
//! | [`MemoryStatsProvider`] | Injectable source for the optional memory sampler |
//! | [`merge_ioc_results`] | Set-union of category-keyed indicator results |
//!
//! ## Example
//!
//! ```rust
//! use ioc_pipeline::batch::{BatchConfig, BatchProcessingEngine};
//!
//! # tokio_test::block_on(async {
//! let engine = BatchProcessingEngine::new();
//! let config = BatchConfig::new().with_batch_size(2).with_max_concurrency(2);
//!
//! let result = engine
//!     .process_batch(
//!         vec![1, 2, 3, 4, 5],
//!         |batch: Vec<i32>, _index| async move {
//!             Ok::<_, String>(batch.into_iter().map(|n| n * 10).collect())
//!         },
//!         Some(config),
//!         None,
//!     )
//!     .await;
//!
//! assert_eq!(result.total_processed, 5);
//! assert!(result.errors.is_empty());
//! # });
//! ```
//!
//! ## Failure Policy
//!
//! - **Batch level**: a processor error fails every item in that batch and is
//!   recorded in [`BatchResult::errors`]; siblings carry on
//! - **Chunk level** ([`BatchProcessingEngine::process_iocs_in_batches`]): an
//!   extractor error is replaced by an empty result instead

mod config;
mod engine;
mod ioc;
mod memory;
mod progress;

pub use config::BatchConfig;
pub use engine::{create_batches, BatchProcessingEngine};
pub use ioc::{chunk_lines, empty_ioc_results, merge_ioc_results, IocResults, IOC_CATEGORIES};
pub use memory::{MemoryStatsProvider, ProcessMemoryStats};
pub use progress::{BatchError, BatchProgress, BatchResult, ProgressCallback};
