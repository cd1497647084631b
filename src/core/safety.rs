// src/core/safety.rs — End-of-iteration stop conditions

use super::types::{IterationDecision, OrchestratorConfig, TerminationReason};

/// Decides whether the loop keeps researching. Checked once per iteration,
/// after verification, so a single iteration may overshoot the cost limit.
#[derive(Debug, Clone)]
pub struct StopConditions {
    pub cost_limit: f64,
    pub confidence_threshold: f32,
    pub max_iterations: usize,
}

impl StopConditions {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            cost_limit: config.cost_limit,
            confidence_threshold: config.confidence_threshold,
            max_iterations: config.max_iterations,
        }
    }

    /// Guards in order: budget, confidence, iteration count. Comparisons are inclusive.
    pub fn check(&self, iteration_index: usize, confidence: f32, cost_usd: f64) -> IterationDecision {
        if cost_usd >= self.cost_limit {
            return IterationDecision::Complete(TerminationReason::BudgetExhausted);
        }

        if confidence >= self.confidence_threshold {
            return IterationDecision::Complete(TerminationReason::ConfidenceMet);
        }

        if iteration_index + 1 >= self.max_iterations {
            return IterationDecision::Complete(TerminationReason::MaxIterations);
        }

        IterationDecision::Continue
    }
}
