// tests/governors_test.rs — Integration test: rate limiter, cost ledger, hooks, executor

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use delve::core::context::EngineContext;
use delve::core::cost::{AlertKind, CostTracker};
use delve::core::executor::{all_failed, AgentExecutor};
use delve::core::rate_limiter::{RateLimiter, RateWindow};
use delve::core::types::TaskOutcome;
use delve::hooks::{HookContext, HookEvent, HookOutcome, HookPipeline};
use delve::infra::config::RateLimitConfig;
use delve::infra::errors::DelveError;

// ─── Rate limiter ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_window_ceiling_holds_across_five_acquires() {
    let limiter = RateLimiter::new(
        vec![RateWindow::new("minute", Duration::from_secs(60), 3).unwrap()],
        None,
    );
    let start = Instant::now();
    let mut admitted = Vec::new();

    for i in 0..5u64 {
        if i > 0 && i < 3 {
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        limiter.acquire(0).await;
        admitted.push(start.elapsed());
    }

    // First three go through at t=0,1,2 without waiting.
    assert_eq!(&admitted[..3], &[
        Duration::ZERO,
        Duration::from_secs(1),
        Duration::from_secs(2),
    ]);
    // The fourth and fifth block until the oldest slots age out.
    assert!(admitted[3] >= Duration::from_secs(60));
    assert!(admitted[4] >= Duration::from_secs(61));
    // No 60s span ever holds more than three admissions.
    for w in admitted.windows(4) {
        assert!(w[3] - w[0] >= Duration::from_secs(60), "{:?}", admitted);
    }

    let stats = limiter.stats();
    assert_eq!(stats.total_requests, 5);
    assert_eq!(stats.wait_count, limiter.wait_events().len());
    assert!(stats.wait_count >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_acquires_share_windows() {
    let limiter = Arc::new(RateLimiter::new(
        vec![RateWindow::per_minute(2).unwrap()],
        None,
    ));
    let start = Instant::now();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter.acquire(0).await;
                start.elapsed()
            })
        })
        .collect();

    let mut times = Vec::new();
    for h in handles {
        times.push(h.await.unwrap());
    }
    times.sort();

    assert_eq!(times.iter().filter(|t| **t < Duration::from_secs(60)).count(), 2);
    assert_eq!(limiter.stats().total_requests, 4);
}

#[test]
fn test_zero_limit_is_config_error() {
    let config = RateLimitConfig {
        requests_per_minute: Some(0),
        ..Default::default()
    };
    assert!(matches!(
        RateLimiter::from_config(&config),
        Err(DelveError::InvalidLimit { .. })
    ));
}

// ─── Cost ledger ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_spend_is_additive_and_alerts_once() {
    let costs = Arc::new(CostTracker::new(1.0, vec![0.5, 0.9]));

    // 20 calls at $0.06 each from parallel tasks.
    let handles: Vec<_> = (0..20)
        .map(|_| {
            let costs = costs.clone();
            tokio::spawn(async move { costs.add_usage("claude-sonnet-4", 20_000, 0) })
        })
        .collect();
    let mut sum = 0.0;
    for h in handles {
        sum += h.await.unwrap();
    }

    assert!((costs.get_cost() - sum).abs() < 1e-9);
    assert!((sum - 1.2).abs() < 1e-9);
    assert_eq!(costs.get_summary().total_calls, 20);

    let kinds: Vec<_> = costs.alerts().into_iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            AlertKind::Threshold(0.5),
            AlertKind::Threshold(0.9),
            AlertKind::Exceeded,
        ]
    );
}

#[test]
fn test_usage_export_round_trips_records() {
    let costs = CostTracker::new(5.0, vec![]);
    costs.add_usage("gpt-4o-mini", 1_000, 500);
    costs.add_usage("no-such-model", 10, 10);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("usage.json");
    costs.export_usage(&path).unwrap();

    let data: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let text = data.to_string();
    assert!(text.contains("gpt-4o-mini"));
    assert!(text.contains("no-such-model"));
}

// ─── Hook pipeline ──────────────────────────────────────────────────────────

fn two_hooks(first: HookOutcomeKind) -> (HookPipeline, Arc<Mutex<Option<serde_json::Value>>>) {
    let pipeline = HookPipeline::new();
    let seen_by_b = Arc::new(Mutex::new(None));

    pipeline.register_fn(HookEvent::PreTool, "A", 10, move |_, _| match first {
        HookOutcomeKind::Abort => Ok(HookOutcome::Abort("not allowed".into())),
        HookOutcomeKind::Error => Err(DelveError::Validation("hook crashed".into())),
    });
    let sink = seen_by_b.clone();
    pipeline.register_fn(HookEvent::PreTool, "B", 5, move |payload, _| {
        *sink.lock().unwrap() = Some(payload.clone());
        Ok(HookOutcome::replace(json!({"tool": "search_tavily", "seen": true})))
    });
    (pipeline, seen_by_b)
}

#[derive(Clone, Copy)]
enum HookOutcomeKind {
    Abort,
    Error,
}

#[test]
fn test_abort_is_fail_closed() {
    let (pipeline, seen_by_b) = two_hooks(HookOutcomeKind::Abort);
    let mut ctx = HookContext::for_tool(HookEvent::PreTool, "search_tavily");

    let abort = pipeline
        .execute(HookEvent::PreTool, json!({"tool": "search_tavily"}), &mut ctx)
        .unwrap_err();

    assert_eq!(abort.hook, "A");
    assert_eq!(abort.reason, "not allowed");
    assert!(seen_by_b.lock().unwrap().is_none());
}

#[test]
fn test_error_is_fail_open() {
    let (pipeline, seen_by_b) = two_hooks(HookOutcomeKind::Error);
    let mut ctx = HookContext::for_tool(HookEvent::PreTool, "search_tavily");
    let input = json!({"tool": "search_tavily"});

    let out = pipeline
        .execute(HookEvent::PreTool, input.clone(), &mut ctx)
        .unwrap();

    assert_eq!(*seen_by_b.lock().unwrap(), Some(input));
    assert_eq!(out, json!({"tool": "search_tavily", "seen": true}));
}

#[test]
fn test_no_hooks_is_identity() {
    let pipeline = HookPipeline::new();
    let payload = json!([{"role": "user", "content": "hi"}]);
    let mut ctx = HookContext::new(HookEvent::PreMessage);
    assert_eq!(
        pipeline
            .execute(HookEvent::PreMessage, payload.clone(), &mut ctx)
            .unwrap(),
        payload
    );
}

// ─── Executor ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_spawn_returns_one_outcome_per_task() {
    let executor = AgentExecutor::new(EngineContext::permissive());

    let outcomes = executor
        .spawn(["ok-1", "fail", "ok-2"].into_iter().map(|name| async move {
            tokio::task::yield_now().await;
            if name == "fail" {
                Err(DelveError::EmptyTask {
                    angle: name.to_string(),
                })
            } else {
                Ok(name.to_string())
            }
        }))
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(&outcomes[0], TaskOutcome::Success(s) if s == "ok-1"));
    assert!(matches!(&outcomes[1], TaskOutcome::Failure(DelveError::EmptyTask { .. })));
    assert!(matches!(&outcomes[2], TaskOutcome::Success(s) if s == "ok-2"));
    assert!(!all_failed(&outcomes));
}

#[tokio::test]
async fn test_all_failed_batch() {
    let executor = AgentExecutor::new(EngineContext::permissive());
    let outcomes = executor
        .spawn((0..3).map(|i| async move {
            Err::<(), _>(DelveError::Parse(format!("bad {}", i)))
        }))
        .await;
    assert_eq!(outcomes.len(), 3);
    assert!(all_failed(&outcomes));
}
