// src/agents/mod.rs — Collaborators driven by the research loop
//
// The orchestrator depends only on these traits. The LLM-backed
// implementations live in the submodules.

pub mod optimizer;
pub mod planner;
pub mod search;
pub mod synthesizer;
pub mod verifier;

use async_trait::async_trait;

use crate::core::types::{Finding, VerificationResult};
use crate::infra::errors::DelveError;

/// Proposes research angles for the next iteration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Planner: Send + Sync {
    /// Up to `count` angles for `query`, avoiding those in `covered`.
    async fn plan(
        &self,
        query: &str,
        covered: &[String],
        count: usize,
    ) -> Result<Vec<String>, DelveError>;
}

/// Researches one angle. One call per task in an iteration's batch.
#[async_trait]
pub trait ResearchWorker: Send + Sync {
    async fn research(&self, query: &str, angle: &str) -> Result<Finding, DelveError>;
}

/// Scores the accumulated findings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VerificationGate: Send + Sync {
    async fn evaluate(
        &self,
        query: &str,
        findings: &[Finding],
        confidence_threshold: f32,
    ) -> Result<VerificationResult, DelveError>;
}

/// Shapes the finding set before synthesis.
#[async_trait]
pub trait ContextOptimizer: Send + Sync {
    async fn optimize(
        &self,
        findings: &[Finding],
        verification: Option<&VerificationResult>,
    ) -> Result<Vec<Finding>, DelveError>;
}

/// Writes the final report body.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        query: &str,
        findings: &[Finding],
        verification: Option<&VerificationResult>,
    ) -> Result<String, DelveError>;
}
