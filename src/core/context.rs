// src/core/context.rs — Shared engine context and cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::cost::CostTracker;
use super::rate_limiter::RateLimiter;
use crate::hooks::HookPipeline;
use crate::infra::config::Config;
use crate::infra::errors::DelveError;
use crate::provider::TokenUsage;

/// The governors every unit of work goes through. Built once at startup and
/// handed to the orchestrator, executor and workers by reference.
#[derive(Clone)]
pub struct EngineContext {
    pub limiter: Arc<RateLimiter>,
    pub costs: Arc<CostTracker>,
    pub hooks: Arc<HookPipeline>,
}

impl EngineContext {
    pub fn new(limiter: RateLimiter, costs: CostTracker, hooks: HookPipeline) -> Self {
        Self {
            limiter: Arc::new(limiter),
            costs: Arc::new(costs),
            hooks: Arc::new(hooks),
        }
    }

    /// Limiter, ledger and standard hook chains from the loaded config.
    pub fn from_config(config: &Config) -> Result<Self, DelveError> {
        Ok(Self::new(
            RateLimiter::from_config(&config.rate_limit)?,
            CostTracker::from_config(&config.budget),
            HookPipeline::standard(&config.hooks, &config.context),
        ))
    }

    /// No rate limits, no alerts, no hooks. Handy for tests and embedding.
    pub fn permissive() -> Self {
        Self::new(
            RateLimiter::unlimited(),
            CostTracker::new(0.0, Vec::new()),
            HookPipeline::new(),
        )
    }

    /// Feed reported usage into the cost ledger.
    pub fn record_usage(&self, model: &str, usage: &TokenUsage) -> f64 {
        self.costs.add_usage(
            model,
            usage.input_tokens as u64,
            usage.output_tokens as u64,
        )
    }
}

/// Cooperative cancellation. Checked by the orchestrator at iteration
/// boundaries; in-flight tasks are left to drain.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
