// src/provider/retry.rs — Retry with exponential backoff for model providers
//
// Wraps any ModelProvider with automatic retry on transient failures.
// Retries: rate limits (429), server errors (5xx), timeouts, connection resets.
// Does NOT retry: bad request (400), auth errors (401, 403), tool rejections.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{AgentHandle, ModelClass, ModelProvider, Reply, ToolReply};
use crate::infra::errors::DelveError;

/// Default retry configuration.
const MAX_RETRIES: u32 = 4;
const INITIAL_DELAY_MS: u64 = 2_000;
const BACKOFF_FACTOR: f64 = 2.0;
const MAX_DELAY_MS: u64 = 30_000;
const JITTER_FRACTION: f64 = 0.2;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
            backoff_factor: BACKOFF_FACTOR,
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            jitter_fraction: JITTER_FRACTION,
        }
    }
}

/// A provider wrapper that adds retry with exponential backoff.
///
/// Delegates all trait methods to the inner provider, retrying `send_message()`
/// and `call_tool()` on transient errors.
pub struct RetryProvider {
    inner: Arc<dyn ModelProvider>,
    config: RetryConfig,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn ModelProvider>) -> Self {
        Self {
            inner,
            config: RetryConfig::default(),
        }
    }

    pub fn with_config(inner: Arc<dyn ModelProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Calculate the delay for a given retry attempt (0-indexed).
    fn delay_for_attempt(&self, attempt: u32, rate_limit_delay: Option<Duration>) -> Duration {
        // If the server told us how long to wait, use that (with a small buffer).
        if let Some(rl_delay) = rate_limit_delay {
            return rl_delay + Duration::from_millis(100);
        }

        let base_ms = self.config.initial_delay.as_millis() as f64
            * self.config.backoff_factor.powi(attempt as i32);
        let capped_ms = base_ms.min(self.config.max_delay.as_millis() as f64);

        let jitter = deterministic_jitter(attempt, self.config.jitter_fraction);
        let final_ms = (capped_ms * jitter).max(100.0);

        Duration::from_millis(final_ms as u64)
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, DelveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DelveError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !should_retry(&e) || attempt >= self.config.max_retries {
                        return Err(e);
                    }

                    let delay = self.delay_for_attempt(attempt, rate_limit_delay(&e));
                    tracing::warn!(
                        provider = self.inner.id(),
                        op,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {}",
                        e
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Determine if an error should be retried.
fn should_retry(error: &DelveError) -> bool {
    match error {
        DelveError::RateLimited { .. } => true,
        DelveError::Provider { retriable, .. } => *retriable,
        _ => false,
    }
}

/// Extract rate-limit retry delay from the error, if available.
fn rate_limit_delay(error: &DelveError) -> Option<Duration> {
    match error {
        DelveError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
            Some(Duration::from_millis(*retry_after_ms))
        }
        _ => None,
    }
}

/// Deterministic jitter for a given attempt to keep retries reproducible in tests.
/// Returns a multiplier in [1 - fraction, 1 + fraction].
fn deterministic_jitter(attempt: u32, fraction: f64) -> f64 {
    let hash = (attempt.wrapping_mul(2654435761)) as f64 / u32::MAX as f64;
    1.0 + fraction * (2.0 * hash - 1.0)
}

#[async_trait]
impl ModelProvider for RetryProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn model_id(&self, class: ModelClass) -> String {
        self.inner.model_id(class)
    }

    fn cost(&self, class: ModelClass, input_tokens: u32, output_tokens: u32) -> f64 {
        self.inner.cost(class, input_tokens, output_tokens)
    }

    fn create_agent(&self, class: ModelClass, system: &str, tools: &[&str]) -> AgentHandle {
        self.inner.create_agent(class, system, tools)
    }

    async fn send_message(&self, agent: &AgentHandle, text: &str) -> Result<Reply, DelveError> {
        self.with_retry("send_message", || self.inner.send_message(agent, text))
            .await
    }

    async fn call_tool(
        &self,
        agent: &AgentHandle,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolReply, DelveError> {
        self.with_retry("call_tool", || {
            self.inner.call_tool(agent, tool, arguments.clone())
        })
        .await
    }

    fn token_count(&self, text: &str) -> usize {
        self.inner.token_count(text)
    }
}
