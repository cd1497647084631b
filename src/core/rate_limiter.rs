// src/core/rate_limiter.rs — Sliding-window request limiter with token bucket
//
// Every unit of external work calls `acquire()` first. Admission requires
// every configured window (and the token bucket, when set) to have room at
// the same instant. Waiters sleep outside the lock and re-check from scratch
// on wake, since concurrent callers may take the freed capacity first.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::infra::config::RateLimitConfig;
use crate::infra::errors::DelveError;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// A request ceiling over a trailing time window.
#[derive(Debug, Clone)]
pub struct RateWindow {
    pub name: String,
    /// Short label used in wait reasons ("req/min").
    pub unit: String,
    pub duration: Duration,
    pub max_requests: u32,
}

fn short_unit(name: &str) -> &str {
    match name {
        "minute" => "min",
        "hour" => "hr",
        other => other,
    }
}

impl RateWindow {
    pub fn new(name: &str, duration: Duration, limit: i64) -> Result<Self, DelveError> {
        if limit <= 0 || limit > u32::MAX as i64 {
            return Err(DelveError::InvalidLimit {
                window: name.into(),
                limit,
            });
        }
        Ok(Self {
            name: name.into(),
            unit: short_unit(name).into(),
            duration,
            max_requests: limit as u32,
        })
    }

    pub fn per_minute(limit: i64) -> Result<Self, DelveError> {
        Self::new("minute", MINUTE, limit)
    }

    pub fn per_hour(limit: i64) -> Result<Self, DelveError> {
        Self::new("hour", HOUR, limit)
    }

    pub fn per_day(limit: i64) -> Result<Self, DelveError> {
        Self::new("day", DAY, limit)
    }
}

/// Token ceiling per fixed cadence. The counter resets to zero every `cadence`.
#[derive(Debug, Clone)]
pub struct TokenLimit {
    pub max_tokens: u64,
    pub cadence: Duration,
}

impl TokenLimit {
    pub fn per_minute(limit: i64) -> Result<Self, DelveError> {
        if limit <= 0 {
            return Err(DelveError::InvalidLimit {
                window: "tokens".into(),
                limit,
            });
        }
        Ok(Self {
            max_tokens: limit as u64,
            cadence: MINUTE,
        })
    }
}

/// A recorded delay and the constraint that caused it.
#[derive(Debug, Clone)]
pub struct WaitEvent {
    pub wait: Duration,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowUsage {
    pub name: String,
    pub current: usize,
    pub limit: u32,
}

#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub wait_count: usize,
    pub total_wait: Duration,
    pub windows: Vec<WindowUsage>,
    pub tokens_used: u64,
    pub tokens_limit: Option<u64>,
}

struct LimiterState {
    timestamps: Vec<VecDeque<Instant>>,
    bucket_used: u64,
    bucket_reset: Instant,
    total_requests: u64,
    total_tokens: u64,
    waits: Vec<WaitEvent>,
}

pub struct RateLimiter {
    windows: Vec<RateWindow>,
    token_limit: Option<TokenLimit>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(windows: Vec<RateWindow>, token_limit: Option<TokenLimit>) -> Self {
        let cadence = token_limit.as_ref().map(|t| t.cadence).unwrap_or(MINUTE);
        let state = LimiterState {
            timestamps: vec![VecDeque::new(); windows.len()],
            bucket_used: 0,
            bucket_reset: Instant::now() + cadence,
            total_requests: 0,
            total_tokens: 0,
            waits: Vec::new(),
        };
        Self {
            windows,
            token_limit,
            state: Mutex::new(state),
        }
    }

    /// Build from config. Unset windows are disabled; non-positive limits are rejected.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, DelveError> {
        let mut windows = Vec::new();
        if let Some(limit) = config.requests_per_minute {
            windows.push(RateWindow::per_minute(limit)?);
        }
        if let Some(limit) = config.requests_per_hour {
            windows.push(RateWindow::per_hour(limit)?);
        }
        if let Some(limit) = config.requests_per_day {
            windows.push(RateWindow::per_day(limit)?);
        }
        let token_limit = config
            .tokens_per_minute
            .map(TokenLimit::per_minute)
            .transpose()?;
        Ok(Self::new(windows, token_limit))
    }

    /// A limiter with no windows. Admits everything immediately.
    pub fn unlimited() -> Self {
        Self::new(Vec::new(), None)
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until the request fits every window and the token bucket, then record it.
    pub async fn acquire(&self, estimated_tokens: u64) {
        loop {
            let wait = {
                let mut state = self.lock();
                let now = Instant::now();
                self.refresh(&mut state, now);

                match self.required_wait(&state, now, estimated_tokens) {
                    None => {
                        for ts in state.timestamps.iter_mut() {
                            ts.push_back(now);
                        }
                        state.bucket_used += estimated_tokens;
                        state.total_requests += 1;
                        state.total_tokens += estimated_tokens;
                        return;
                    }
                    Some((wait, reason)) => {
                        tracing::debug!(
                            wait_ms = wait.as_millis() as u64,
                            reason = %reason,
                            "Rate limit reached, waiting"
                        );
                        state.waits.push(WaitEvent { wait, reason });
                        wait
                    }
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking check: would a zero-cost request be admitted right now?
    pub fn can_proceed(&self) -> bool {
        let mut state = self.lock();
        let now = Instant::now();
        self.refresh(&mut state, now);
        self.required_wait(&state, now, 0).is_none()
    }

    pub fn stats(&self) -> RateLimiterStats {
        let mut state = self.lock();
        let now = Instant::now();
        self.refresh(&mut state, now);

        RateLimiterStats {
            total_requests: state.total_requests,
            total_tokens: state.total_tokens,
            wait_count: state.waits.len(),
            total_wait: state.waits.iter().map(|w| w.wait).sum(),
            windows: self
                .windows
                .iter()
                .zip(state.timestamps.iter())
                .map(|(w, ts)| WindowUsage {
                    name: w.name.clone(),
                    current: ts.len(),
                    limit: w.max_requests,
                })
                .collect(),
            tokens_used: state.bucket_used,
            tokens_limit: self.token_limit.as_ref().map(|t| t.max_tokens),
        }
    }

    pub fn wait_events(&self) -> Vec<WaitEvent> {
        self.lock().waits.clone()
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        for ts in state.timestamps.iter_mut() {
            ts.clear();
        }
        state.bucket_used = 0;
        state.bucket_reset = Instant::now() + self.cadence();
        state.total_requests = 0;
        state.total_tokens = 0;
        state.waits.clear();
    }

    fn cadence(&self) -> Duration {
        self.token_limit
            .as_ref()
            .map(|t| t.cadence)
            .unwrap_or(MINUTE)
    }

    /// Purge timestamps that have aged out and roll the token bucket over.
    fn refresh(&self, state: &mut LimiterState, now: Instant) {
        for (window, ts) in self.windows.iter().zip(state.timestamps.iter_mut()) {
            while let Some(&oldest) = ts.front() {
                if now.duration_since(oldest) >= window.duration {
                    ts.pop_front();
                } else {
                    break;
                }
            }
        }

        if now >= state.bucket_reset {
            state.bucket_used = 0;
            state.bucket_reset = now + self.cadence();
        }
    }

    /// Longest wait over all violated constraints, or `None` if admissible now.
    fn required_wait(
        &self,
        state: &LimiterState,
        now: Instant,
        estimated_tokens: u64,
    ) -> Option<(Duration, String)> {
        let mut worst: Option<(Duration, String)> = None;
        let mut consider = |wait: Duration, reason: String| {
            if worst.as_ref().map_or(true, |(w, _)| wait > *w) {
                worst = Some((wait, reason));
            }
        };

        for (window, ts) in self.windows.iter().zip(state.timestamps.iter()) {
            if ts.len() < window.max_requests as usize {
                continue;
            }
            if let Some(&oldest) = ts.front() {
                let wait = window.duration.saturating_sub(now.duration_since(oldest));
                consider(
                    wait,
                    format!(
                        "{} limit ({} req/{})",
                        window.name, window.max_requests, window.unit
                    ),
                );
            }
        }

        if let Some(limit) = &self.token_limit {
            // An oversized request is admitted into an empty bucket rather than starving.
            let over = state.bucket_used + estimated_tokens > limit.max_tokens;
            if over && state.bucket_used > 0 {
                consider(
                    state.bucket_reset.saturating_duration_since(now),
                    format!("token limit ({} tokens/min)", limit.max_tokens),
                );
            }
        }

        worst.filter(|(wait, _)| !wait.is_zero())
    }
}

// ---------------------------------------------------------------------------
// Per-provider limiters
// ---------------------------------------------------------------------------

/// Published limits for known providers.
pub fn provider_preset(provider: &str) -> RateLimitConfig {
    match provider {
        "anthropic" => RateLimitConfig {
            requests_per_minute: Some(50),
            requests_per_hour: None,
            requests_per_day: Some(1000),
            tokens_per_minute: Some(40_000),
        },
        "openai" => RateLimitConfig {
            requests_per_minute: Some(60),
            requests_per_hour: None,
            requests_per_day: Some(10_000),
            tokens_per_minute: Some(90_000),
        },
        "google" => RateLimitConfig {
            requests_per_minute: Some(15),
            requests_per_hour: None,
            requests_per_day: Some(1500),
            tokens_per_minute: None,
        },
        _ => RateLimitConfig {
            requests_per_minute: Some(50),
            requests_per_hour: None,
            requests_per_day: None,
            tokens_per_minute: None,
        },
    }
}

/// Lazily-built limiter per provider id.
#[derive(Default)]
pub struct ProviderRateLimiters {
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl ProviderRateLimiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an explicit limiter for a provider, replacing any preset.
    pub fn insert(&self, provider: &str, limiter: Arc<RateLimiter>) {
        self.limiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(provider.to_string(), limiter);
    }

    pub fn get(&self, provider: &str) -> Result<Arc<RateLimiter>, DelveError> {
        let mut limiters = self.limiters.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(limiter) = limiters.get(provider) {
            return Ok(limiter.clone());
        }
        let limiter = Arc::new(RateLimiter::from_config(&provider_preset(provider))?);
        limiters.insert(provider.to_string(), limiter.clone());
        Ok(limiter)
    }

    pub fn stats(&self) -> Vec<(String, RateLimiterStats)> {
        let limiters = self.limiters.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = limiters
            .iter()
            .map(|(name, l)| (name.clone(), l.stats()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_per_minute(n: i64) -> RateLimiter {
        RateLimiter::new(vec![RateWindow::per_minute(n).unwrap()], None)
    }

    /// Paused-clock sleeps land on millisecond ticks.
    fn assert_waited(elapsed: Duration, secs: u64) {
        let expected = Duration::from_secs(secs);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(5),
            "waited {:?}, expected {:?}",
            elapsed,
            expected
        );
    }

    // ─── Configuration ──────────────────────────────────────────

    #[test]
    fn test_non_positive_limits_rejected() {
        assert!(matches!(
            RateWindow::per_minute(0),
            Err(DelveError::InvalidLimit { .. })
        ));
        assert!(RateWindow::per_hour(-5).is_err());
        assert!(TokenLimit::per_minute(0).is_err());

        let config = RateLimitConfig {
            requests_per_day: Some(0),
            ..Default::default()
        };
        assert!(RateLimiter::from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_skips_unset_windows() {
        let limiter = RateLimiter::from_config(&RateLimitConfig::default()).unwrap();
        let stats = limiter.stats();
        let names: Vec<_> = stats.windows.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["minute", "day"]);
        assert_eq!(stats.tokens_limit, Some(40_000));
    }

    // ─── Admission ──────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_acquire_under_limit_is_immediate() {
        let limiter = limiter_per_minute(3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(0).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!limiter.can_proceed());
        assert_eq!(limiter.stats().total_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_until_oldest_expires() {
        let limiter = limiter_per_minute(2);
        limiter.acquire(0).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.acquire(0).await;

        let start = Instant::now();
        limiter.acquire(0).await;
        // First request at t=0 frees its slot at t=60; we asked at t=10.
        assert_waited(start.elapsed(), 50);

        let waits = limiter.wait_events();
        assert_eq!(waits.len(), 1);
        assert_eq!(waits[0].reason, "minute limit (2 req/min)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_can_proceed_does_not_record() {
        let limiter = limiter_per_minute(1);
        assert!(limiter.can_proceed());
        assert!(limiter.can_proceed());
        assert_eq!(limiter.stats().total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_over_violated_windows() {
        let limiter = RateLimiter::new(
            vec![
                RateWindow::per_minute(1).unwrap(),
                RateWindow::new("ten_minutes", Duration::from_secs(600), 1).unwrap(),
            ],
            None,
        );
        limiter.acquire(0).await;
        let start = Instant::now();
        limiter.acquire(0).await;
        assert_waited(start.elapsed(), 600);
    }

    // ─── Token bucket ───────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_waits_for_reset() {
        let limiter = RateLimiter::new(vec![], Some(TokenLimit::per_minute(1000).unwrap()));
        limiter.acquire(800).await;

        let start = Instant::now();
        limiter.acquire(300).await;
        assert_waited(start.elapsed(), 60);
        assert_eq!(limiter.stats().tokens_used, 300);
        assert_eq!(limiter.stats().total_tokens, 1100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_admitted_into_empty_bucket() {
        let limiter = RateLimiter::new(vec![], Some(TokenLimit::per_minute(100).unwrap()));
        let start = Instant::now();
        limiter.acquire(500).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    // ─── Stats / reset ──────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_everything() {
        let limiter = limiter_per_minute(1);
        limiter.acquire(10).await;
        limiter.reset();
        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.windows[0].current, 0);
        assert!(limiter.can_proceed());
    }

    #[test]
    fn test_unlimited_always_proceeds() {
        let limiter = RateLimiter::unlimited();
        tokio_test::block_on(async {
            for _ in 0..100 {
                limiter.acquire(1_000_000).await;
            }
        });
        assert!(limiter.can_proceed());
        assert_eq!(limiter.stats().total_requests, 100);
    }

    // ─── Provider presets ───────────────────────────────────────

    #[tokio::test]
    async fn test_provider_limiters_are_shared() {
        let registry = ProviderRateLimiters::new();
        let a = registry.get("anthropic").unwrap();
        let b = registry.get("anthropic").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let stats = a.stats();
        assert_eq!(stats.windows[0].limit, 50);
        assert_eq!(stats.tokens_limit, Some(40_000));

        let unknown = registry.get("mystery").unwrap();
        assert_eq!(unknown.stats().windows[0].limit, 50);
        assert_eq!(registry.stats().len(), 2);
    }
}
