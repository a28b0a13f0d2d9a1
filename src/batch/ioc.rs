//! Indicator extraction over large text, chunked by line count.

use super::config::BatchConfig;
use super::engine::BatchProcessingEngine;
use super::progress::{BatchResult, ProgressCallback};
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::future::Future;
use tracing::warn;

/// Category name (e.g. `"ipv4"`) to extracted indicator strings.
pub type IocResults = HashMap<String, Vec<String>>;

/// Categories present in the placeholder that replaces a failed chunk.
pub const IOC_CATEGORIES: &[&str] = &[
    "ipv4", "ipv6", "domains", "urls", "emails", "md5", "sha1", "sha256", "cves",
];

/// Result with every known category present and empty.
pub fn empty_ioc_results() -> IocResults {
    IOC_CATEGORIES
        .iter()
        .map(|c| (c.to_string(), Vec::new()))
        .collect()
}

/// Split `text` into chunks of at most `lines_per_chunk` lines.
pub fn chunk_lines(text: &str, lines_per_chunk: usize) -> Vec<String> {
    let size = lines_per_chunk.max(1);
    let lines: Vec<&str> = text.lines().collect();
    lines.chunks(size).map(|c| c.join("\n")).collect()
}

/// Union per-category results, dropping duplicates. Order within a category
/// is unspecified.
pub fn merge_ioc_results(results: &[IocResults]) -> IocResults {
    let mut merged: HashMap<String, HashSet<String>> = HashMap::new();
    for result in results {
        for (category, values) in result {
            merged
                .entry(category.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }
    merged
        .into_iter()
        .map(|(category, set)| (category, set.into_iter().collect()))
        .collect()
}

impl BatchProcessingEngine {
    /// Run `extractor` over `text` in chunks of `config.batch_size` lines.
    ///
    /// Each chunk is its own engine batch, so up to `max_concurrency` chunks
    /// are extracted at once. An extractor error does not fail the chunk: it
    /// is logged and replaced with [`empty_ioc_results`]. Merge the returned
    /// `results` with [`merge_ioc_results`].
    pub async fn process_iocs_in_batches<E, F, Fut>(
        &self,
        text: &str,
        extractor: F,
        config: Option<BatchConfig>,
        on_progress: Option<&ProgressCallback<'_>>,
    ) -> BatchResult<IocResults>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<IocResults, E>>,
        E: std::fmt::Display,
    {
        let config = config.unwrap_or_else(|| self.config().clone());
        let chunks = chunk_lines(text, config.effective_batch_size());
        let run_config = config.with_batch_size(1);
        let extractor = &extractor;

        self.process_batch(
            chunks,
            move |batch: Vec<String>, chunk_index| async move {
                let mut out = Vec::with_capacity(batch.len());
                for chunk in batch {
                    match extractor(chunk).await {
                        Ok(iocs) => out.push(iocs),
                        Err(e) => {
                            warn!(chunk_index, error = %e, "indicator extraction failed for chunk");
                            out.push(empty_ioc_results());
                        }
                    }
                }
                Ok::<_, Infallible>(out)
            },
            Some(run_config),
            on_progress,
        )
        .await
    }
}
