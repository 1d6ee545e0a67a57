mod common;

use std::time::Duration;

use portfolio_guard::config::Scope;
use portfolio_guard::core::Verdict;
use portfolio_guard::error::Rejection;

fn remaining(verdict: &Verdict) -> u64 {
    match verdict {
        Verdict::Allow { quota: Some(info) } => info.remaining,
        Verdict::Deny(Rejection::RateLimitExceeded(info)) => info.remaining,
        other => panic!("no quota in {other:?}"),
    }
}

#[tokio::test]
async fn test_rate_limiter() {
    let (guard, _store) = common::guard(&common::settings(60_000, 5));
    let test_ip = common::random_ip();

    // Make requests up to the limit
    for i in 0..5u64 {
        let verdict = guard.admit(&common::request(&test_ip, Scope::Api)).await;
        assert!(verdict.is_allowed(), "Request {i} should be allowed");
        assert_eq!(remaining(&verdict), 5 - (i + 1));
    }

    // The next request should be rate limited
    let verdict = guard.admit(&common::request(&test_ip, Scope::Api)).await;
    assert!(!verdict.is_allowed(), "Request should be rate limited");
    assert_eq!(remaining(&verdict), 0);
}

#[tokio::test(start_paused = true)]
async fn window_resets_after_expiry() {
    let (guard, _store) = common::guard(&common::settings(1_000, 2));
    let ip = "1.2.3.4";

    let first = guard.admit(&common::request(ip, Scope::Api)).await;
    let second = guard.admit(&common::request(ip, Scope::Api)).await;
    let third = guard.admit(&common::request(ip, Scope::Api)).await;
    assert_eq!(remaining(&first), 1);
    assert_eq!(remaining(&second), 0);
    assert!(second.is_allowed());
    assert!(matches!(
        third,
        Verdict::Deny(Rejection::RateLimitExceeded(ref info)) if info.remaining == 0
    ));

    common::advance(Duration::from_millis(1_100)).await;

    let fourth = guard.admit(&common::request(ip, Scope::Api)).await;
    assert!(fourth.is_allowed());
    assert_eq!(remaining(&fourth), 1);
}

#[tokio::test(start_paused = true)]
async fn later_requests_report_the_original_reset() {
    let (guard, _store) = common::guard(&common::settings(10_000, 5));

    guard.admit(&common::request("a", Scope::Api)).await;
    common::advance(Duration::from_secs(4)).await;
    let verdict = guard.admit(&common::request("a", Scope::Api)).await;

    match verdict {
        Verdict::Allow { quota: Some(info) } => {
            assert_eq!(info.reset_after, Duration::from_secs(6));
            assert_eq!(info.reset_secs(), 6);
        }
        other => panic!("expected quota, got {other:?}"),
    }
}

#[tokio::test]
async fn scopes_have_independent_windows() {
    let mut settings = common::settings(60_000, 1);
    settings.rate_limit.search = portfolio_guard::config::WindowConfig::new(60_000, 3);
    let (guard, _store) = common::guard(&settings);

    assert!(guard.admit(&common::request("a", Scope::Api)).await.is_allowed());
    assert!(!guard.admit(&common::request("a", Scope::Api)).await.is_allowed());

    let search = guard.admit(&common::request("a", Scope::Search)).await;
    assert!(search.is_allowed());
    assert_eq!(remaining(&search), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_admit_exactly_the_limit() {
    let (guard, _store) = common::guard(&common::settings(60_000, 10));
    let ip = common::random_ip();

    let attempts = (0..50).map(|_| {
        let guard = guard.clone();
        let request = common::request(&ip, Scope::Api);
        tokio::spawn(async move { guard.admit(&request).await })
    });
    let verdicts = futures::future::join_all(attempts).await;

    let allowed = verdicts
        .into_iter()
        .map(|joined| joined.expect("admission task panicked"))
        .filter(Verdict::is_allowed)
        .count();
    assert_eq!(allowed, 10);
}

#[tokio::test]
async fn reset_restores_the_quota() {
    let (guard, _store) = common::guard(&common::settings(60_000, 1));

    guard.admit(&common::request("a", Scope::Api)).await;
    assert!(!guard.admit(&common::request("a", Scope::Api)).await.is_allowed());

    guard.reset(Scope::Api, "a").await.unwrap();
    assert!(guard.admit(&common::request("a", Scope::Api)).await.is_allowed());
}
