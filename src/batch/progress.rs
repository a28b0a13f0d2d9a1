//! Batch progress, errors and results.

use serde::Serialize;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Callback invoked after each successful batch when progress tracking is on.
///
/// Runs on the task driving `process_batch`, outside any internal lock. It
/// must not panic.
pub type ProgressCallback<'a> = dyn Fn(&BatchProgress) + Send + Sync + 'a;

/// One failed item. A failed batch produces one of these per item it held.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchError {
    pub batch_index: usize,
    /// Position in the original input: local index + `batch_index * batch_size`.
    pub item_index: usize,
    pub message: String,
    pub timestamp: SystemTime,
}

impl BatchError {
    pub fn new(batch_index: usize, item_index: usize, message: impl Into<String>) -> Self {
        Self {
            batch_index,
            item_index,
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Batch {} item {}: {}",
            self.batch_index, self.item_index, self.message
        )
    }
}

impl std::error::Error for BatchError {}

/// Snapshot emitted after each successful batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub total_items: usize,
    /// Items whose batch succeeded. Failed batches never count here.
    pub processed_items: usize,
    /// 1-based index of the batch that just finished.
    pub current_batch: usize,
    pub total_batches: usize,
    pub percentage: f64,
    pub estimated_time_remaining: Duration,
    /// Items per second since the call started.
    pub throughput: f64,
    pub errors: Vec<BatchError>,
}

impl BatchProgress {
    pub(crate) fn compute(
        total_items: usize,
        processed_items: usize,
        batch_index: usize,
        total_batches: usize,
        elapsed: Duration,
        errors: Vec<BatchError>,
    ) -> Self {
        let percentage = if total_items == 0 {
            100.0
        } else {
            processed_items as f64 / total_items as f64 * 100.0
        };
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            processed_items as f64 / secs
        } else {
            0.0
        };
        let remaining = total_items.saturating_sub(processed_items);
        let estimated_time_remaining = if throughput > 0.0 {
            Duration::from_secs_f64(remaining as f64 / throughput)
        } else {
            Duration::ZERO
        };
        Self {
            total_items,
            processed_items,
            current_batch: batch_index + 1,
            total_batches,
            percentage,
            estimated_time_remaining,
            throughput,
            errors,
        }
    }
}

/// Outcome of a whole `process_batch` call.
#[derive(Debug, Clone)]
pub struct BatchResult<R> {
    /// Results of successful batches, in completion order.
    pub results: Vec<R>,
    pub errors: Vec<BatchError>,
    pub total_processed: usize,
    pub total_time: Duration,
    /// Input items per second over the whole call.
    pub average_throughput: f64,
}

impl<R> BatchResult<R> {
    pub(crate) fn finish(
        results: Vec<R>,
        errors: Vec<BatchError>,
        total_items: usize,
        total_processed: usize,
        started: Instant,
    ) -> Self {
        let total_time = started.elapsed();
        let secs = total_time.as_secs_f64();
        let average_throughput = if secs > 0.0 {
            total_items as f64 / secs
        } else {
            0.0
        };
        Self {
            results,
            errors,
            total_processed,
            total_time,
            average_throughput,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    /// Input positions of every failed item, ascending.
    pub fn failed_items(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = self.errors.iter().map(|e| e.item_index).collect();
        idx.sort_unstable();
        idx
    }

    pub fn success_rate(&self) -> f64 {
        let attempted = self.total_processed + self.errors.len();
        if attempted == 0 {
            0.0
        } else {
            self.total_processed as f64 / attempted as f64
        }
    }
}
