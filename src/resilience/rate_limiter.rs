use super::config::{ProviderLimits, RateLimitConfig};
use super::error::RequestError;
use super::queue::{Attempt, Pending, QueuedRequest, RequestQueue};
use super::retry::{backoff_delay, is_retryable_message};
use crate::Result;
use futures::FutureExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often the request log is pruned.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Read-only view of one provider's queue, for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub active_requests: usize,
    /// Whether the sliding window has room for another request right now.
    pub can_make_request: bool,
    /// Requests started within the current window.
    pub recent_requests: usize,
}

#[derive(Debug, Clone)]
struct RequestLogEntry {
    timestamp: Instant,
    provider: String,
}

#[derive(Default)]
struct ProviderState {
    config: Option<RateLimitConfig>,
    queue: RequestQueue,
    active: usize,
    recheck_scheduled: bool,
    /// Bumped on every config change so window re-checks armed under the
    /// old limits are ignored when they fire.
    recheck_generation: u64,
}

#[derive(Default)]
struct LimiterState {
    providers: HashMap<String, ProviderState>,
    log: Vec<RequestLogEntry>,
}

impl LimiterState {
    fn recent_count(&self, provider: &str, window: Duration, now: Instant) -> usize {
        self.log
            .iter()
            .filter(|e| e.provider == provider && now.duration_since(e.timestamp) < window)
            .count()
    }

    /// `None` if the window has room, otherwise how long until the oldest
    /// in-window entry expires.
    fn window_wait(&self, provider: &str, config: &RateLimitConfig, now: Instant) -> Option<Duration> {
        let window = config.effective_window();
        let mut in_window = self
            .log
            .iter()
            .filter(|e| e.provider == provider && now.duration_since(e.timestamp) < window);
        let oldest = in_window.next()?.timestamp;
        let count = 1 + in_window.count();
        if count < config.max_requests.max(1) as usize {
            return None;
        }
        Some((oldest + window).saturating_duration_since(now).max(Duration::from_millis(1)))
    }

    fn status(&self, provider: &str, now: Instant) -> QueueStatus {
        let Some(ps) = self.providers.get(provider) else {
            return QueueStatus {
                queue_length: 0,
                active_requests: 0,
                can_make_request: false,
                recent_requests: 0,
            };
        };
        let (can_make_request, recent_requests) = match &ps.config {
            Some(cfg) => (
                self.window_wait(provider, cfg, now).is_none(),
                self.recent_count(provider, cfg.effective_window(), now),
            ),
            None => (false, 0),
        };
        QueueStatus {
            queue_length: ps.queue.len(),
            active_requests: ps.active,
            can_make_request,
            recent_requests,
        }
    }
}

/// Per-provider rate-limited request queue.
///
/// - Requests wait in a priority queue (higher first, FIFO among equals)
/// - At most `max_concurrent` run per provider, and at most `max_requests`
///   start within any `window_ms`
/// - Failures whose message looks transient are retried with exponential backoff
///
/// The window check, the dequeue and the request-log append happen under one
/// lock, so the window budget is never overshot by concurrent drains.
///
/// Must be used from within a Tokio runtime. Cloning is cheap and clones
/// share all queues.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<LimiterState>>,
}

impl RateLimiter {
    /// Limiter with the shipped provider defaults.
    pub fn new() -> Self {
        Self::with_limits(ProviderLimits::defaults())
    }

    pub fn with_limits(limits: ProviderLimits) -> Self {
        Self::with_cleanup_interval(limits, CLEANUP_INTERVAL)
    }

    /// Limiter whose request log is pruned every `interval`.
    ///
    /// The sweep only runs when constructed inside a Tokio runtime and stops
    /// once every clone of the limiter is dropped.
    pub fn with_cleanup_interval(limits: ProviderLimits, interval: Duration) -> Self {
        let mut state = LimiterState::default();
        for (name, config) in limits {
            if let Err(e) = config.validate(&name) {
                warn!(provider = %name, error = %e, "invalid provider limits; zero values are clamped to their minimum");
            }
            state.providers.insert(
                name,
                ProviderState {
                    config: Some(config),
                    ..ProviderState::default()
                },
            );
        }
        let limiter = Self {
            state: Arc::new(Mutex::new(state)),
        };
        limiter.spawn_cleanup(interval);
        limiter
    }

    fn spawn_cleanup(&self, interval: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no tokio runtime; request log cleanup sweep not started");
            return;
        };
        let weak = Arc::downgrade(&self.state);
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(state) = weak.upgrade() else {
                    break;
                };
                RateLimiter { state }.prune_request_log();
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register or replace a provider's limits, then drain anything waiting for it.
    ///
    /// A window re-check armed under the previous limits is discarded; the
    /// drain arms a new one if the new window is still exhausted.
    pub fn set_provider_config(&self, provider: &str, config: RateLimitConfig) -> Result<()> {
        config.validate(provider)?;
        {
            let mut st = self.lock();
            let ps = st.providers.entry(provider.to_string()).or_default();
            ps.config = Some(config);
            ps.recheck_generation += 1;
            ps.recheck_scheduled = false;
        }
        info!(provider, "provider rate limits updated");
        self.process_queue(provider);
        Ok(())
    }

    pub fn provider_config(&self, provider: &str) -> Option<RateLimitConfig> {
        self.lock()
            .providers
            .get(provider)
            .and_then(|ps| ps.config.clone())
    }

    /// Queue `request_fn` for `provider` and wait for its outcome.
    ///
    /// The request is queued immediately, before the returned future is first
    /// polled; dropping the future does not withdraw it. `request_fn` is called
    /// once per attempt. The result is exactly what the final attempt produced,
    /// with errors wrapped in [`RequestError::Failed`] unmodified.
    ///
    /// Requests for a provider with no configuration stay queued until one is
    /// set with [`RateLimiter::set_provider_config`] or the queue is cleared.
    /// Each distinct provider name keeps a small entry until then, so names
    /// taken from untrusted input should be mapped onto a known set first.
    pub fn execute_request<T, E, F, Fut>(
        &self,
        provider: &str,
        request_fn: F,
        priority: i32,
    ) -> impl Future<Output = std::result::Result<T, RequestError<E>>> + Send + 'static
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let request = QueuedRequest {
            id: format!("req_{}", Uuid::new_v4()),
            priority,
            retry_count: 0,
            enqueued_at: Instant::now(),
            request: Box::new(Pending::new(request_fn, tx)),
        };
        debug!(provider, request_id = %request.id, priority, "request queued");
        self.enqueue(provider, request);
        self.process_queue(provider);

        async move { rx.await.unwrap_or(Err(RequestError::Abandoned)) }
    }

    fn enqueue(&self, provider: &str, request: QueuedRequest) {
        let mut st = self.lock();
        let ps = st.providers.entry(provider.to_string()).or_default();
        if ps.config.is_none() {
            warn!(provider, "request queued for unconfigured provider; it will wait until limits are set");
        }
        ps.queue.insert(request);
    }

    /// Start as many queued requests as the provider's limits allow.
    fn process_queue(&self, provider: &str) {
        let mut ready = Vec::new();
        let mut recheck_after = None;
        {
            let mut st = self.lock();
            let now = Instant::now();
            let Some(config) = st.providers.get(provider).and_then(|ps| ps.config.clone()) else {
                return;
            };
            loop {
                let wait = st.window_wait(provider, &config, now);
                let Some(ps) = st.providers.get_mut(provider) else {
                    break;
                };
                if ps.queue.is_empty() || ps.active >= config.max_concurrent.max(1) {
                    break;
                }
                if let Some(wait) = wait {
                    if !ps.recheck_scheduled {
                        ps.recheck_scheduled = true;
                        recheck_after = Some((wait, ps.recheck_generation));
                    }
                    break;
                }
                let Some(next) = ps.queue.pop_front() else {
                    break;
                };
                ps.active += 1;
                st.log.push(RequestLogEntry {
                    timestamp: now,
                    provider: provider.to_string(),
                });
                ready.push(next);
            }
        }

        for request in ready {
            let limiter = self.clone();
            let provider = provider.to_string();
            tokio::spawn(async move { limiter.run_request(provider, request).await });
        }

        if let Some((wait, generation)) = recheck_after {
            debug!(provider, wait_ms = wait.as_millis() as u64, "window budget exhausted; scheduling re-check");
            let limiter = self.clone();
            let provider = provider.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                {
                    let mut st = limiter.lock();
                    let Some(ps) = st.providers.get_mut(&provider) else {
                        return;
                    };
                    if ps.recheck_generation != generation {
                        // limits changed since this re-check was armed
                        return;
                    }
                    ps.recheck_scheduled = false;
                }
                limiter.process_queue(&provider);
            });
        }
    }

    async fn run_request(self, provider: String, queued: QueuedRequest) {
        let QueuedRequest {
            id,
            priority,
            retry_count,
            enqueued_at,
            request,
        } = queued;
        debug!(
            provider = %provider,
            request_id = %id,
            retry_count,
            waited_ms = enqueued_at.elapsed().as_millis() as u64,
            "request started"
        );

        let outcome = AssertUnwindSafe(request.attempt()).catch_unwind().await;
        let retry = match outcome {
            Ok(Attempt::Delivered) => None,
            Ok(Attempt::Failed { message, request }) => {
                let config = self.provider_config(&provider);
                match config {
                    Some(cfg) if is_retryable_message(&message) && retry_count < cfg.max_retries => {
                        let next = retry_count + 1;
                        let delay = backoff_delay(cfg.retry_delay(), next);
                        warn!(
                            provider = %provider,
                            request_id = %id,
                            retry = next,
                            max_retries = cfg.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "transient failure; retrying after backoff"
                        );
                        Some((
                            delay,
                            QueuedRequest {
                                id,
                                priority,
                                retry_count: next,
                                enqueued_at: Instant::now(),
                                request,
                            },
                        ))
                    }
                    _ => {
                        warn!(provider = %provider, request_id = %id, retry_count, error = %message, "request failed");
                        request.fail();
                        None
                    }
                }
            }
            Err(_) => {
                warn!(provider = %provider, request_id = %id, "request panicked");
                None
            }
        };

        if let Some(ps) = self.lock().providers.get_mut(&provider) {
            ps.active = ps.active.saturating_sub(1);
        }

        if let Some((delay, request)) = retry {
            let limiter = self.clone();
            let provider = provider.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                limiter.enqueue(&provider, request);
                limiter.process_queue(&provider);
            });
        }

        self.process_queue(&provider);
    }

    pub fn queue_status(&self, provider: &str) -> QueueStatus {
        self.lock().status(provider, Instant::now())
    }

    /// Status of every known provider, keyed by name.
    pub fn all_queue_status(&self) -> BTreeMap<String, QueueStatus> {
        let st = self.lock();
        let now = Instant::now();
        st.providers
            .keys()
            .map(|name| (name.clone(), st.status(name, now)))
            .collect()
    }

    /// Fail every not-yet-started request for `provider` with
    /// [`RequestError::QueueCleared`]. In-flight requests are unaffected.
    /// Returns how many requests were rejected.
    ///
    /// A provider that was only known because requests were queued for it
    /// (never configured) is forgotten once its queue is cleared.
    pub fn clear_queue(&self, provider: &str) -> usize {
        let drained = {
            let mut st = self.lock();
            let drained = st
                .providers
                .get_mut(provider)
                .map(|ps| ps.queue.drain_all())
                .unwrap_or_default();
            let forget = st
                .providers
                .get(provider)
                .is_some_and(|ps| ps.config.is_none() && ps.active == 0);
            if forget {
                st.providers.remove(provider);
            }
            drained
        };
        let rejected = drained.len();
        for queued in drained {
            queued.request.cancel(provider);
        }
        if rejected > 0 {
            info!(provider, rejected, "queue cleared");
        }
        rejected
    }

    pub fn clear_all_queues(&self) -> usize {
        let providers: Vec<String> = self.lock().providers.keys().cloned().collect();
        providers.iter().map(|p| self.clear_queue(p)).sum()
    }

    /// Drop request-log entries older than twice the largest configured window.
    /// Returns how many entries were removed.
    pub fn prune_request_log(&self) -> usize {
        let mut st = self.lock();
        let horizon = st
            .providers
            .values()
            .filter_map(|ps| ps.config.as_ref().map(|c| c.effective_window()))
            .max()
            .unwrap_or(Duration::ZERO)
            .saturating_mul(2);
        let now = Instant::now();
        let before = st.log.len();
        st.log.retain(|e| now.duration_since(e.timestamp) <= horizon);
        let removed = before - st.log.len();
        if removed > 0 {
            debug!(removed, remaining = st.log.len(), "pruned request log");
        }
        removed
    }

    /// Entries currently held in the request log.
    pub fn request_log_len(&self) -> usize {
        self.lock().log.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_log(provider: &str, ages_ms: &[u64], now: Instant) -> LimiterState {
        let mut st = LimiterState::default();
        for age in ages_ms {
            st.log.push(RequestLogEntry {
                timestamp: now - Duration::from_millis(*age),
                provider: provider.to_string(),
            });
        }
        st
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_wait_counts_only_recent_entries() {
        tokio::time::advance(Duration::from_secs(10)).await;
        let now = Instant::now();
        let cfg = RateLimitConfig::new()
            .with_max_requests(2)
            .with_window(Duration::from_millis(1000));

        let st = state_with_log("openai", &[1500, 400], now);
        assert_eq!(st.window_wait("openai", &cfg, now), None);
        assert_eq!(st.recent_count("openai", cfg.window(), now), 1);

        let st = state_with_log("openai", &[800, 400], now);
        assert_eq!(
            st.window_wait("openai", &cfg, now),
            Some(Duration::from_millis(200))
        );
        assert_eq!(st.window_wait("anthropic", &cfg, now), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_uses_twice_largest_window() {
        let limits = {
            let mut l = ProviderLimits::empty();
            l.insert("a", RateLimitConfig::new().with_window(Duration::from_secs(1)));
            l.insert("b", RateLimitConfig::new().with_window(Duration::from_secs(5)));
            l
        };
        let limiter = RateLimiter::with_limits(limits);
        tokio::time::advance(Duration::from_secs(60)).await;
        let now = Instant::now();
        {
            let mut st = limiter.lock();
            for age in [20u64, 11, 9, 1] {
                st.log.push(RequestLogEntry {
                    timestamp: now - Duration::from_secs(age),
                    provider: "a".to_string(),
                });
            }
        }
        assert_eq!(limiter.prune_request_log(), 2);
        assert_eq!(limiter.request_log_len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_sweep_runs_periodically() {
        let mut limits = ProviderLimits::empty();
        limits.insert("a", RateLimitConfig::new().with_window(Duration::from_millis(100)));
        let limiter = RateLimiter::with_cleanup_interval(limits, Duration::from_secs(1));
        limiter
            .execute_request("a", || async { Ok::<_, String>(()) }, 0)
            .await
            .unwrap();
        assert_eq!(limiter.request_log_len(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(limiter.request_log_len(), 0);
    }

    #[test]
    fn test_status_for_unknown_provider() {
        let limiter = RateLimiter::with_limits(ProviderLimits::empty());
        let status = limiter.queue_status("nobody");
        assert_eq!(status.queue_length, 0);
        assert!(!status.can_make_request);
        assert!(limiter.all_queue_status().is_empty());
    }
}
