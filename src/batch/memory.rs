//! Memory sampling for long batch runs.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Source of process memory figures.
///
/// Injected into the engine so the sampler can be exercised without a real
/// heap to measure.
pub trait MemoryStatsProvider: Send + Sync {
    /// Bytes currently in use, if the platform exposes it.
    fn used_bytes(&self) -> Option<u64>;

    /// Best-effort request to give memory back. Returns whether anything was attempted.
    fn reclaim(&self) -> bool {
        false
    }
}

/// Reads resident set size from `/proc/self/status`. Reports nothing on
/// platforms without procfs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemoryStats;

impl MemoryStatsProvider for ProcessMemoryStats {
    fn used_bytes(&self) -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_rss(&status)
    }
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line
        .trim_start_matches("VmRSS:")
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kb * 1024)
}

/// Per-call sampler task. Aborted when dropped, so concurrent calls never
/// share or overwrite each other's timer.
pub(crate) struct MemoryMonitor {
    handle: JoinHandle<()>,
}

impl MemoryMonitor {
    pub(crate) fn start(
        provider: Arc<dyn MemoryStatsProvider>,
        threshold_mb: u64,
        interval: Duration,
        process_id: String,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                check_memory(provider.as_ref(), threshold_mb, &process_id);
            }
        });
        Self { handle }
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Returns true when usage was above the threshold.
pub(crate) fn check_memory(
    provider: &dyn MemoryStatsProvider,
    threshold_mb: u64,
    process_id: &str,
) -> bool {
    let Some(used) = provider.used_bytes() else {
        return false;
    };
    let used_mb = used / BYTES_PER_MB;
    if used_mb <= threshold_mb {
        debug!(process_id, used_mb, threshold_mb, "memory within threshold");
        return false;
    }
    warn!(
        process_id,
        used_mb, threshold_mb, "memory usage above threshold during batch processing"
    );
    if provider.reclaim() {
        debug!(process_id, "requested memory reclamation");
    }
    true
}
