use ioc_pipeline::resilience::{ProviderLimits, RateLimitConfig, RateLimiter, RequestError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn limiter_with(provider: &str, config: RateLimitConfig) -> RateLimiter {
    let mut limits = ProviderLimits::empty();
    limits.insert(provider, config);
    RateLimiter::with_limits(limits)
}

#[tokio::test(start_paused = true)]
async fn test_window_budget_defers_excess_requests() {
    let limiter = limiter_with(
        "test",
        RateLimitConfig::new()
            .with_max_requests(5)
            .with_window(Duration::from_millis(1000))
            .with_max_concurrent(10),
    );
    let t0 = Instant::now();
    let starts = Arc::new(Mutex::new(Vec::new()));

    let calls: Vec<_> = (0..8)
        .map(|i| {
            let starts = Arc::clone(&starts);
            limiter.execute_request(
                "test",
                move || {
                    let starts = Arc::clone(&starts);
                    async move {
                        starts.lock().unwrap().push(Instant::now() - t0);
                        Ok::<_, String>(i)
                    }
                },
                0,
            )
        })
        .collect();

    let results = futures::future::join_all(calls).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let starts = starts.lock().unwrap();
    let early = starts.iter().filter(|d| **d < Duration::from_millis(1000)).count();
    assert_eq!(early, 5);
    assert!(starts
        .iter()
        .filter(|d| **d >= Duration::from_millis(1000))
        .all(|d| *d < Duration::from_millis(1100)));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_cap_per_provider() {
    let limiter = limiter_with(
        "test",
        RateLimitConfig::new()
            .with_max_requests(100)
            .with_window(Duration::from_secs(60))
            .with_max_concurrent(2),
    );
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let calls: Vec<_> = (0..6)
        .map(|_| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            limiter.execute_request(
                "test",
                move || {
                    let running = Arc::clone(&running);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    }
                },
                0,
            )
        })
        .collect();

    let status = limiter.queue_status("test");
    assert_eq!(status.active_requests, 2);
    assert_eq!(status.queue_length, 4);

    futures::future::join_all(calls).await;
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(limiter.queue_status("test").active_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_priority_order_behind_running_request() {
    let limiter = limiter_with(
        "test",
        RateLimitConfig::new()
            .with_max_requests(100)
            .with_max_concurrent(1),
    );
    let order = Arc::new(Mutex::new(Vec::new()));

    let record = |label: &'static str| {
        let order = Arc::clone(&order);
        move || {
            let order = Arc::clone(&order);
            async move {
                order.lock().unwrap().push(label);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, String>(())
            }
        }
    };

    let blocker = limiter.execute_request("test", record("blocker"), 0);
    let low = limiter.execute_request("test", record("low"), 0);
    let high = limiter.execute_request("test", record("high"), 10);
    let mid = limiter.execute_request("test", record("mid"), 5);
    let low2 = limiter.execute_request("test", record("low2"), 0);

    let _ = tokio::join!(blocker, low, high, mid, low2);
    assert_eq!(
        *order.lock().unwrap(),
        vec!["blocker", "high", "mid", "low", "low2"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_with_backoff() {
    let limiter = limiter_with(
        "test",
        RateLimitConfig::new()
            .with_max_requests(100)
            .with_retry_delay(Duration::from_millis(100))
            .with_max_retries(3),
    );
    let t0 = Instant::now();
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&attempts);

    let value = limiter
        .execute_request(
            "test",
            move || {
                let log = Arc::clone(&log);
                async move {
                    let mut log = log.lock().unwrap();
                    log.push(Instant::now() - t0);
                    if log.len() < 3 {
                        Err("Rate limit exceeded".to_string())
                    } else {
                        Ok(7)
                    }
                }
            },
            0,
        )
        .await
        .unwrap();

    assert_eq!(value, 7);
    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[1] - attempts[0], Duration::from_millis(100));
    assert_eq!(attempts[2] - attempts[1], Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_is_returned_unchanged() {
    let limiter = limiter_with("test", RateLimitConfig::new().with_max_retries(3));
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let err = limiter
        .execute_request(
            "test",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("invalid api key".to_string()) }
            },
            0,
        )
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(err.to_string(), "invalid api key");
    assert_eq!(err.into_failure().as_deref(), Some("invalid api key"));
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_returns_last_error() {
    let limiter = limiter_with(
        "test",
        RateLimitConfig::new()
            .with_retry_delay(Duration::from_millis(10))
            .with_max_retries(2),
    );
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let err = limiter
        .execute_request(
            "test",
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err::<(), _>(format!("timeout on attempt {}", n)) }
            },
            0,
        )
        .await
        .unwrap_err();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(err.into_failure().as_deref(), Some("timeout on attempt 3"));
}

#[tokio::test(start_paused = true)]
async fn test_clear_queue_rejects_waiting_requests_only() {
    let limiter = limiter_with(
        "test",
        RateLimitConfig::new()
            .with_max_requests(100)
            .with_max_concurrent(1),
    );
    let slow = || async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, String>("done")
    };

    let running = limiter.execute_request("test", slow, 0);
    let waiting_a = limiter.execute_request("test", slow, 0);
    let waiting_b = limiter.execute_request("test", slow, 5);
    assert_eq!(limiter.queue_status("test").queue_length, 2);

    assert_eq!(limiter.clear_queue("test"), 2);
    assert_eq!(limiter.queue_status("test").queue_length, 0);

    assert!(waiting_a.await.unwrap_err().is_queue_cleared());
    match waiting_b.await {
        Err(RequestError::QueueCleared { provider }) => assert_eq!(provider, "test"),
        other => panic!("expected queue cleared, got {:?}", other),
    }
    assert_eq!(running.await.unwrap(), "done");
}

#[tokio::test(start_paused = true)]
async fn test_clear_all_queues() {
    let limiter = RateLimiter::with_limits(ProviderLimits::empty());
    let parked_a = limiter.execute_request("a", || async { Ok::<_, String>(()) }, 0);
    let parked_b = limiter.execute_request("b", || async { Ok::<_, String>(()) }, 0);

    assert_eq!(limiter.all_queue_status().len(), 2);
    assert_eq!(limiter.clear_all_queues(), 2);
    assert!(parked_a.await.unwrap_err().is_queue_cleared());
    assert!(parked_b.await.unwrap_err().is_queue_cleared());
    // never-configured providers are forgotten once cleared
    assert!(limiter.all_queue_status().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unconfigured_provider_waits_for_config() {
    let limiter = RateLimiter::new();
    let call = tokio::spawn(limiter.execute_request("splunk", || async { Ok::<_, String>(1) }, 0));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!call.is_finished());
    let status = limiter.queue_status("splunk");
    assert_eq!(status.queue_length, 1);
    assert!(!status.can_make_request);

    limiter
        .set_provider_config("splunk", RateLimitConfig::new())
        .unwrap();
    assert_eq!(call.await.unwrap().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_queue_status_reports_window_usage() {
    let limiter = limiter_with(
        "test",
        RateLimitConfig::new()
            .with_max_requests(2)
            .with_window(Duration::from_secs(1)),
    );
    for _ in 0..2 {
        limiter
            .execute_request("test", || async { Ok::<_, String>(()) }, 0)
            .await
            .unwrap();
    }

    let status = limiter.queue_status("test");
    assert_eq!(status.recent_requests, 2);
    assert!(!status.can_make_request);

    tokio::time::sleep(Duration::from_millis(1001)).await;
    let status = limiter.queue_status("test");
    assert_eq!(status.recent_requests, 0);
    assert!(status.can_make_request);

    let all = limiter.all_queue_status();
    assert_eq!(all.keys().collect::<Vec<_>>(), vec!["test"]);
    let json = serde_json::to_value(&all["test"]).unwrap();
    assert_eq!(json["can_make_request"], true);
}

#[tokio::test(start_paused = true)]
async fn test_shipped_defaults_are_registered() {
    let limiter = RateLimiter::new();
    let all = limiter.all_queue_status();
    for provider in ["openai", "anthropic", "gemini", "ollama"] {
        assert!(all.contains_key(provider), "missing {}", provider);
        assert!(all[provider].can_make_request);
    }
    assert_eq!(limiter.provider_config("anthropic").unwrap().max_requests, 50);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_caller_does_not_withdraw_request() {
    let limiter = limiter_with("test", RateLimitConfig::new().with_max_concurrent(1));
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);

    drop(limiter.execute_request(
        "test",
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        },
        0,
    ));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(limiter.queue_status("test").active_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shorter_window_applies_to_queued_requests() {
    let limiter = limiter_with(
        "test",
        RateLimitConfig::new()
            .with_max_requests(1)
            .with_window(Duration::from_secs(60))
            .with_max_concurrent(1),
    );
    limiter
        .execute_request("test", || async { Ok::<_, String>(()) }, 0)
        .await
        .unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let queued = limiter.execute_request(
        "test",
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        },
        0,
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(limiter.queue_status("test").queue_length, 1);

    limiter
        .set_provider_config(
            "test",
            RateLimitConfig::new()
                .with_max_requests(1)
                .with_window(Duration::from_millis(100))
                .with_max_concurrent(1),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(limiter.queue_status("test").queue_length, 0);
    queued.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_is_rejected() {
    let limiter = RateLimiter::with_limits(ProviderLimits::empty());
    let err = limiter
        .set_provider_config(
            "z",
            RateLimitConfig::new()
                .with_max_requests(1)
                .with_window(Duration::ZERO)
                .with_max_concurrent(10),
        )
        .unwrap_err();

    assert_eq!(
        err.context().and_then(|c| c.field_path.as_deref()),
        Some("providers.z.window_ms")
    );
    assert!(limiter.provider_config("z").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_zero_window_from_limits_still_enforces_budget() {
    let limiter = limiter_with(
        "z",
        RateLimitConfig::new()
            .with_max_requests(1)
            .with_window(Duration::ZERO)
            .with_max_concurrent(10),
    );
    let calls: Vec<_> = (0..5)
        .map(|i| limiter.execute_request("z", move || async move { Ok::<_, String>(i) }, 0))
        .collect();

    let status = limiter.queue_status("z");
    assert_eq!(status.active_requests, 1);
    assert_eq!(status.queue_length, 4);

    let results = futures::future::join_all(calls).await;
    assert!(results.iter().all(|r| r.is_ok()));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_request_releases_its_slot() {
    let limiter = limiter_with(
        "test",
        RateLimitConfig::new()
            .with_max_requests(100)
            .with_max_concurrent(1),
    );

    let crashed = limiter.execute_request(
        "test",
        || async {
            if true {
                panic!("client crashed");
            }
            Ok::<u32, String>(1)
        },
        0,
    );
    let next = limiter.execute_request("test", || async { Ok::<u32, String>(2) }, 0);

    assert!(matches!(crashed.await, Err(RequestError::Abandoned)));
    assert_eq!(next.await.unwrap(), 2);
    assert_eq!(limiter.queue_status("test").active_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retried_request_keeps_its_priority() {
    let limiter = limiter_with(
        "test",
        RateLimitConfig::new()
            .with_max_requests(100)
            .with_max_concurrent(1)
            .with_retry_delay(Duration::from_millis(100))
            .with_max_retries(1),
    );
    let order = Arc::new(Mutex::new(Vec::new()));
    let attempts = Arc::new(AtomicUsize::new(0));

    let flaky = {
        let order = Arc::clone(&order);
        let attempts = Arc::clone(&attempts);
        move || {
            let order = Arc::clone(&order);
            let first = attempts.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                order.lock().unwrap().push("urgent");
                if first {
                    Err("connection reset by peer".to_string())
                } else {
                    Ok(())
                }
            }
        }
    };
    let record = |label: &'static str, hold: Duration| {
        let order = Arc::clone(&order);
        move || {
            let order = Arc::clone(&order);
            async move {
                order.lock().unwrap().push(label);
                tokio::time::sleep(hold).await;
                Ok::<_, String>(())
            }
        }
    };

    // urgent fails at t0 and is re-queued at t0+100ms, while the blocker
    // holds the only slot until t0+300ms
    let urgent = limiter.execute_request("test", flaky, 5);
    let blocker = limiter.execute_request("test", record("blocker", Duration::from_millis(300)), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let low = limiter.execute_request("test", record("low", Duration::ZERO), 0);
    let low2 = limiter.execute_request("test", record("low2", Duration::ZERO), 0);

    let (urgent, _, _, _) = tokio::join!(urgent, blocker, low, low2);
    assert!(urgent.is_ok());
    assert_eq!(
        *order.lock().unwrap(),
        vec!["urgent", "blocker", "urgent", "low", "low2"]
    );
}
