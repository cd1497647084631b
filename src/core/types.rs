// src/core/types.rs — Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::infra::config::{ContextConfig, ResearchConfig};

/// One search performed by a worker, after post-search hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub provider: String,
    pub key_points: Vec<String>,
    pub source_url: String,
    /// In [0, 1].
    pub relevance: f32,
    pub raw_size: usize,
    pub compressed_size: usize,
}

/// Aggregated output of one worker task for one angle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub angle: String,
    pub searches: Vec<SearchResult>,
    pub summary: String,
    pub token_total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationDecision {
    Continue,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub confidence: f32,
    pub coverage_score: f32,
    pub depth_score: f32,
    pub source_quality_score: f32,
    pub consistency_score: f32,
    pub gaps: Vec<String>,
    pub recommended_angles: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    pub decision: VerificationDecision,
    #[serde(default)]
    pub reasoning: String,
}

/// Conservative confidence used whenever scoring itself fails.
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

impl VerificationResult {
    /// Build from sub-scores; confidence is their mean. Scores are clamped to [0, 1].
    pub fn from_scores(
        coverage: f32,
        depth: f32,
        source_quality: f32,
        consistency: f32,
        decision: VerificationDecision,
    ) -> Self {
        let c = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        let (coverage, depth, source_quality, consistency) =
            (c(coverage), c(depth), c(source_quality), c(consistency));
        Self {
            confidence: (coverage + depth + source_quality + consistency) / 4.0,
            coverage_score: coverage,
            depth_score: depth,
            source_quality_score: source_quality,
            consistency_score: consistency,
            gaps: Vec::new(),
            recommended_angles: Vec::new(),
            strengths: Vec::new(),
            decision,
            reasoning: String::new(),
        }
    }

    /// Substitute result when the gate errored or its output was unusable.
    /// Never reads as success.
    pub fn fallback(gap: &str) -> Self {
        let mut r = Self::from_scores(
            FALLBACK_CONFIDENCE,
            FALLBACK_CONFIDENCE,
            FALLBACK_CONFIDENCE,
            FALLBACK_CONFIDENCE,
            VerificationDecision::Continue,
        );
        r.gaps = vec![gap.to_string()];
        r
    }
}

/// Result of one worker task. Failures are values, not panics.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Success(T),
    Failure(crate::infra::errors::DelveError),
}

impl<T> TaskOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }
}

/// Orchestrator states. `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Planning,
    Executing,
    Verifying,
    Continuing,
    Completing,
    Finalizing,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Verifying => "verifying",
            Self::Continuing => "continuing",
            Self::Completing => "completing",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// Why the loop stopped researching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    ConfidenceMet,
    MaxIterations,
    BudgetExhausted,
    Cancelled,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConfidenceMet => "confidence met",
            Self::MaxIterations => "max iterations",
            Self::BudgetExhausted => "budget exhausted",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of the end-of-iteration guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationDecision {
    Continue,
    Complete(TerminationReason),
}

impl std::fmt::Display for IterationDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Complete(reason) => write!(f, "complete ({})", reason),
        }
    }
}

/// Loop state owned by the orchestrator; mutated only between iterations.
#[derive(Debug, Clone, Default)]
pub struct IterationState {
    pub iteration_index: usize,
    pub cumulative_findings: Vec<Finding>,
    pub cumulative_cost: f64,
    pub last_verification: Option<VerificationResult>,
    pub verification_history: Vec<f32>,
    pub failed_iterations: usize,
}

impl IterationState {
    pub fn covered_angles(&self) -> Vec<String> {
        self.cumulative_findings
            .iter()
            .map(|f| f.angle.clone())
            .collect()
    }

    pub fn total_searches(&self) -> usize {
        self.cumulative_findings
            .iter()
            .map(|f| f.searches.len())
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub iterations: usize,
    pub total_angles: usize,
    pub total_searches: usize,
    pub total_cost: f64,
    pub final_confidence: f32,
    pub verification_history: Vec<f32>,
    pub termination: TerminationReason,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub query: String,
    pub content: String,
    pub findings: Vec<Finding>,
    pub verification: Option<VerificationResult>,
    pub metadata: ReportMetadata,
}

/// Tunables for the research loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_iterations: usize,
    pub confidence_threshold: f32,
    pub angles_per_iteration: usize,
    pub searches_per_angle: usize,
    pub cost_limit: f64,
    /// Most recent findings always kept verbatim when optimizing context.
    pub recent_context: usize,
    pub context_target_tokens: usize,
    /// Fuzzy threshold for treating two angles as the same; `None` compares names.
    pub angle_similarity: Option<f64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_configs(&ResearchConfig::default(), &ContextConfig::default())
    }
}

impl OrchestratorConfig {
    pub fn from_configs(research: &ResearchConfig, context: &ContextConfig) -> Self {
        Self {
            max_iterations: research.max_iterations as usize,
            confidence_threshold: research.confidence_threshold,
            angles_per_iteration: research.angles_per_iteration,
            searches_per_angle: research.searches_per_angle,
            cost_limit: research.cost_limit_usd,
            recent_context: context.recent_messages,
            context_target_tokens: context.target_tokens,
            angle_similarity: research.angle_similarity,
        }
    }
}

/// Progress notifications emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    PhaseChanged {
        phase: Phase,
    },
    IterationStart {
        iteration: usize,
        max_iterations: usize,
    },
    AnglesPlanned {
        iteration: usize,
        angles: Vec<String>,
    },
    TaskFailed {
        angle: String,
        error: String,
    },
    IterationEnd {
        iteration: usize,
        confidence: f32,
        decision: IterationDecision,
        cost_so_far: f64,
    },
    Complete {
        iterations: usize,
        confidence: f32,
        cost: f64,
        termination: TerminationReason,
    },
}
