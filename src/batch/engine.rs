//! Batch processing engine.

use super::config::BatchConfig;
use super::memory::{MemoryMonitor, MemoryStatsProvider, ProcessMemoryStats};
use super::progress::{BatchError, BatchProgress, BatchResult, ProgressCallback};
use crate::concurrency::Semaphore;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Split `items` into contiguous, order-preserving chunks of `batch_size`
/// (clamped to at least one). The last chunk may be shorter.
pub fn create_batches<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter();
    loop {
        let chunk: Vec<T> = iter.by_ref().take(size).collect();
        if chunk.is_empty() {
            break;
        }
        batches.push(chunk);
    }
    batches
}

/// Runs large collections through a processor in bounded-parallel batches.
///
/// - Up to `max_concurrency` batches run at once, gated by a [`Semaphore`]
/// - A failing batch is recorded item by item and never aborts its siblings
/// - Progress snapshots are delivered after every successful batch
///
/// Cloning is cheap and clones share the active-process registry.
#[derive(Clone)]
pub struct BatchProcessingEngine {
    defaults: BatchConfig,
    active: Arc<Mutex<HashSet<String>>>,
    memory: Arc<dyn MemoryStatsProvider>,
}

struct RunState<R> {
    results: Vec<R>,
    errors: Vec<BatchError>,
    processed: usize,
}

/// Keeps a process id in the active set for as long as it lives.
struct ActiveProcess {
    registry: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl ActiveProcess {
    fn register(registry: &Arc<Mutex<HashSet<String>>>, id: String) -> Self {
        lock(registry).insert(id.clone());
        Self {
            registry: Arc::clone(registry),
            id,
        }
    }
}

impl Drop for ActiveProcess {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.id);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("batch processor panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("batch processor panicked: {}", s)
    } else {
        "batch processor panicked".to_string()
    }
}

impl BatchProcessingEngine {
    pub fn new() -> Self {
        Self::with_config(BatchConfig::default())
    }

    /// Engine whose calls fall back to `defaults` when no per-call config is given.
    pub fn with_config(defaults: BatchConfig) -> Self {
        Self {
            defaults,
            active: Arc::new(Mutex::new(HashSet::new())),
            memory: Arc::new(ProcessMemoryStats),
        }
    }

    /// Replace the memory source used by the sampler.
    pub fn with_memory_stats(mut self, provider: Arc<dyn MemoryStatsProvider>) -> Self {
        self.memory = provider;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.defaults
    }

    /// Number of `process_batch` calls currently in flight.
    pub fn active_process_count(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn is_processing(&self) -> bool {
        self.active_process_count() > 0
    }

    /// Process `items` in batches and collect what succeeded.
    ///
    /// `processor` receives each batch with its 0-based index and must return
    /// one result per item, or an error to fail the whole batch. This call
    /// itself never fails: batch failures land in [`BatchResult::errors`].
    pub async fn process_batch<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        processor: F,
        config: Option<BatchConfig>,
        on_progress: Option<&ProgressCallback<'_>>,
    ) -> BatchResult<R>
    where
        F: Fn(Vec<T>, usize) -> Fut,
        Fut: Future<Output = std::result::Result<Vec<R>, E>>,
        E: std::fmt::Display,
    {
        let config = config.unwrap_or_else(|| self.defaults.clone());
        let process_id = format!("batch_{}", Uuid::new_v4());
        let _registration = ActiveProcess::register(&self.active, process_id.clone());
        let _monitor = (config.memory_threshold_mb > 0).then(|| {
            MemoryMonitor::start(
                Arc::clone(&self.memory),
                config.memory_threshold_mb,
                config.memory_check_interval(),
                process_id.clone(),
            )
        });

        let started = Instant::now();
        let total_items = items.len();
        let batch_size = config.effective_batch_size();
        let batches = create_batches(items, batch_size);
        let total_batches = batches.len();
        let delay = config.delay_between_batches();
        let tracking = config.enable_progress_tracking;

        info!(
            process_id = %process_id,
            total_items,
            total_batches,
            batch_size,
            max_concurrency = config.effective_concurrency(),
            "starting batch processing"
        );

        let semaphore = Semaphore::new(config.effective_concurrency());
        let state = Mutex::new(RunState {
            results: Vec::new(),
            errors: Vec::new(),
            processed: 0,
        });

        let record_failure = |batch_index: usize, len: usize, message: String| {
            warn!(process_id = %process_id, batch_index, items = len, error = %message, "batch failed");
            let mut st = lock(&state);
            let base = batch_index * batch_size;
            st.errors
                .extend((0..len).map(|i| BatchError::new(batch_index, base + i, message.clone())));
        };

        let processor = &processor;
        let semaphore = &semaphore;
        let state_ref = &state;
        let record_failure = &record_failure;
        let process_id_ref = process_id.as_str();

        let runs = batches.into_iter().enumerate().map(move |(batch_index, batch)| async move {
            let len = batch.len();
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    record_failure(batch_index, len, e.to_string());
                    return;
                }
            };
            debug!(process_id = process_id_ref, batch_index, items = len, "batch started");

            let outcome = AssertUnwindSafe(async { processor(batch, batch_index).await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(results)) => {
                    let progress = {
                        let mut st = lock(state_ref);
                        st.processed += len;
                        st.results.extend(results);
                        tracking.then(|| {
                            BatchProgress::compute(
                                total_items,
                                st.processed,
                                batch_index,
                                total_batches,
                                started.elapsed(),
                                st.errors.clone(),
                            )
                        })
                    };
                    if let (Some(progress), Some(callback)) = (progress, on_progress) {
                        callback(&progress);
                    }
                    if batch_index + 1 < total_batches && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok(Err(e)) => record_failure(batch_index, len, e.to_string()),
                Err(payload) => record_failure(batch_index, len, panic_message(payload.as_ref())),
            }
        });
        join_all(runs).await;

        let RunState {
            results,
            errors,
            processed,
        } = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        let result = BatchResult::finish(results, errors, total_items, processed, started);

        info!(
            process_id = %process_id,
            processed = result.total_processed,
            failed = result.errors.len(),
            elapsed_ms = result.total_time.as_millis() as u64,
            "batch processing finished"
        );
        result
    }
}

impl Default for BatchProcessingEngine {
    fn default() -> Self {
        Self::new()
    }
}
