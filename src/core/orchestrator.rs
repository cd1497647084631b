// src/core/orchestrator.rs — Research iteration controller

use std::sync::Arc;

use super::context::{CancelFlag, EngineContext};
use super::executor::{all_failed, AgentExecutor};
use super::safety::StopConditions;
use super::types::*;
use crate::agents::planner::{exclude_covered, fallback_angles};
use crate::agents::synthesizer::{fallback_report, metadata_footer};
use crate::agents::{ContextOptimizer, Planner, ResearchWorker, Synthesizer, VerificationGate};
use crate::infra::errors::DelveError;

/// The external collaborators the loop drives.
#[derive(Clone)]
pub struct Agents {
    pub planner: Arc<dyn Planner>,
    pub worker: Arc<dyn ResearchWorker>,
    pub gate: Arc<dyn VerificationGate>,
    pub optimizer: Arc<dyn ContextOptimizer>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// Drives plan → execute → verify until a stop condition holds, then
/// finalizes. Always produces a report.
pub struct ResearchOrchestrator {
    ctx: EngineContext,
    executor: AgentExecutor,
    agents: Agents,
    config: OrchestratorConfig,
    stop: StopConditions,
    cancel: CancelFlag,
    on_progress: Option<Box<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl ResearchOrchestrator {
    pub fn new(ctx: EngineContext, agents: Agents, config: OrchestratorConfig) -> Self {
        Self {
            executor: AgentExecutor::new(ctx.clone()),
            ctx,
            agents,
            stop: StopConditions::from_config(&config),
            config,
            cancel: CancelFlag::new(),
            on_progress: None,
        }
    }

    /// Set a callback for real-time progress events.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    /// Share a cancellation flag. Honored at iteration boundaries.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    fn enter(&self, phase: Phase) {
        tracing::debug!(phase = %phase, "Phase");
        self.emit(ProgressEvent::PhaseChanged { phase });
    }

    /// Run the full research loop for `query`.
    ///
    /// Only an empty query is an error. Every downstream failure degrades to
    /// a conservative default and the run still ends with a report.
    pub async fn run(&self, query: &str) -> Result<ResearchReport, DelveError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DelveError::Validation("research query is empty".into()));
        }

        tracing::info!(
            query = %query,
            max_iterations = self.config.max_iterations,
            threshold = self.config.confidence_threshold,
            "Starting research"
        );

        let mut state = IterationState::default();
        let mut iterations = 0;
        let mut termination = TerminationReason::MaxIterations;

        for i in 0..self.config.max_iterations {
            if self.cancel.is_cancelled() {
                tracing::info!(iteration = i + 1, "Research cancelled");
                termination = TerminationReason::Cancelled;
                break;
            }

            state.iteration_index = i;
            iterations = i + 1;
            self.emit(ProgressEvent::IterationStart {
                iteration: i + 1,
                max_iterations: self.config.max_iterations,
            });

            // Planning
            self.enter(Phase::Planning);
            let angles = self.plan(query, &state).await;
            self.emit(ProgressEvent::AnglesPlanned {
                iteration: i + 1,
                angles: angles.clone(),
            });

            // Executing
            self.enter(Phase::Executing);
            let produced = self.execute(query, &angles).await;
            if produced.is_none() {
                state.failed_iterations += 1;
                tracing::warn!(
                    iteration = i + 1,
                    angles = angles.len(),
                    "Iteration produced no findings"
                );
            }
            state
                .cumulative_findings
                .extend(produced.unwrap_or_default());

            // Verifying
            self.enter(Phase::Verifying);
            let verification = self.verify(query, &state.cumulative_findings).await;
            // Includes the gate's own spend.
            state.cumulative_cost = self.ctx.costs.get_cost();
            let confidence = verification.confidence;
            state.verification_history.push(confidence);
            state.last_verification = Some(verification);

            let decision = self.stop.check(i, confidence, state.cumulative_cost);
            tracing::info!(
                iteration = i + 1,
                confidence,
                cost = state.cumulative_cost,
                decision = %decision,
                "Iteration finished"
            );
            self.emit(ProgressEvent::IterationEnd {
                iteration: i + 1,
                confidence,
                decision,
                cost_so_far: state.cumulative_cost,
            });

            match decision {
                IterationDecision::Continue => self.enter(Phase::Continuing),
                IterationDecision::Complete(reason) => {
                    self.enter(Phase::Completing);
                    termination = reason;
                    break;
                }
            }
        }

        let report = self.finalize(query, state, iterations, termination).await;
        self.enter(Phase::Done);
        Ok(report)
    }

    /// Angles for this iteration: planner output, then gap-filling angles
    /// from the last verification, then the fixed fallback set. Covered
    /// angles are always excluded.
    async fn plan(&self, query: &str, state: &IterationState) -> Vec<String> {
        let covered = state.covered_angles();
        let count = self.config.angles_per_iteration;
        let similarity = self.config.angle_similarity;

        let proposed = match self.agents.planner.plan(query, &covered, count).await {
            Ok(angles) => angles,
            Err(e) => {
                tracing::warn!("Planner failed, using fallback angles: {}", e);
                fallback_angles(query, count)
            }
        };
        let mut angles = exclude_covered(proposed, &covered, similarity);

        if angles.is_empty() {
            if let Some(v) = &state.last_verification {
                angles = exclude_covered(v.recommended_angles.clone(), &covered, similarity);
            }
        }
        if angles.is_empty() {
            angles = exclude_covered(fallback_angles(query, count), &covered, similarity);
        }

        angles.truncate(count);
        angles
    }

    /// Fan out one task per angle. `None` when nothing succeeded.
    async fn execute(&self, query: &str, angles: &[String]) -> Option<Vec<Finding>> {
        let tasks = angles
            .iter()
            .map(|angle| self.agents.worker.research(query, angle));
        let outcomes = self.executor.spawn(tasks).await;

        if outcomes.is_empty() || all_failed(&outcomes) {
            for (angle, outcome) in angles.iter().zip(outcomes) {
                if let TaskOutcome::Failure(e) = outcome {
                    self.report_failure(angle, &e);
                }
            }
            return None;
        }

        let mut findings = Vec::new();
        for (angle, outcome) in angles.iter().zip(outcomes) {
            match outcome {
                TaskOutcome::Success(finding) => findings.push(finding),
                TaskOutcome::Failure(e) => self.report_failure(angle, &e),
            }
        }
        Some(findings)
    }

    fn report_failure(&self, angle: &str, error: &DelveError) {
        tracing::warn!(angle = %angle, "Research task failed: {}", error);
        self.emit(ProgressEvent::TaskFailed {
            angle: angle.to_string(),
            error: error.to_string(),
        });
    }

    async fn verify(&self, query: &str, findings: &[Finding]) -> VerificationResult {
        match self
            .agents
            .gate
            .evaluate(query, findings, self.config.confidence_threshold)
            .await
        {
            Ok(v) if v.confidence.is_finite() => v,
            Ok(_) => {
                tracing::warn!("Verification returned a non-finite confidence, using fallback");
                VerificationResult::fallback("Verification failed: non-finite confidence")
            }
            Err(e) => {
                tracing::warn!("Verification failed, using conservative fallback: {}", e);
                VerificationResult::fallback(&format!("Verification failed: {}", e))
            }
        }
    }

    async fn finalize(
        &self,
        query: &str,
        state: IterationState,
        iterations: usize,
        termination: TerminationReason,
    ) -> ResearchReport {
        self.enter(Phase::Finalizing);
        let verification = state.last_verification.clone();

        let optimized = match self
            .agents
            .optimizer
            .optimize(&state.cumulative_findings, verification.as_ref())
            .await
        {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Context optimization failed, using all findings: {}", e);
                state.cumulative_findings.clone()
            }
        };

        let body = match self
            .agents
            .synthesizer
            .synthesize(query, &optimized, verification.as_ref())
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => fallback_report(query, &optimized, "synthesizer returned an empty report"),
            Err(e) => {
                tracing::warn!("Synthesis failed, writing fallback report: {}", e);
                fallback_report(query, &optimized, &e.to_string())
            }
        };

        let total_cost = self.ctx.costs.get_cost();
        let metadata = ReportMetadata {
            iterations,
            total_angles: state.cumulative_findings.len(),
            total_searches: state.total_searches(),
            total_cost,
            final_confidence: verification.as_ref().map(|v| v.confidence).unwrap_or(0.0),
            verification_history: state.verification_history.clone(),
            termination,
            timestamp: chrono::Utc::now(),
        };
        let content = format!("{}{}", body, metadata_footer(query, &metadata));

        tracing::info!(
            iterations,
            termination = %termination,
            cost = total_cost,
            failed_iterations = state.failed_iterations,
            "Research complete"
        );
        self.emit(ProgressEvent::Complete {
            iterations,
            confidence: metadata.final_confidence,
            cost: total_cost,
            termination,
        });

        ResearchReport {
            query: query.to_string(),
            content,
            findings: state.cumulative_findings,
            verification,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{MockPlanner, MockVerificationGate};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoWorker;

    #[async_trait]
    impl ResearchWorker for EchoWorker {
        async fn research(&self, _query: &str, angle: &str) -> Result<Finding, DelveError> {
            if angle.contains("broken") {
                return Err(DelveError::EmptyTask {
                    angle: angle.to_string(),
                });
            }
            Ok(Finding {
                angle: angle.to_string(),
                searches: vec![],
                summary: format!("about {}", angle),
                token_total: 0,
            })
        }
    }

    struct PassThrough;

    #[async_trait]
    impl ContextOptimizer for PassThrough {
        async fn optimize(
            &self,
            findings: &[Finding],
            _verification: Option<&VerificationResult>,
        ) -> Result<Vec<Finding>, DelveError> {
            Ok(findings.to_vec())
        }
    }

    struct FailingSynth;

    #[async_trait]
    impl Synthesizer for FailingSynth {
        async fn synthesize(
            &self,
            _query: &str,
            _findings: &[Finding],
            _verification: Option<&VerificationResult>,
        ) -> Result<String, DelveError> {
            Err(DelveError::Parse("synth down".into()))
        }
    }

    fn scored(confidence: f32) -> VerificationResult {
        VerificationResult::from_scores(
            confidence,
            confidence,
            confidence,
            confidence,
            VerificationDecision::Continue,
        )
    }

    fn orchestrator(planner: MockPlanner, gate: MockVerificationGate, config: OrchestratorConfig) -> ResearchOrchestrator {
        ResearchOrchestrator::new(
            EngineContext::permissive(),
            Agents {
                planner: Arc::new(planner),
                worker: Arc::new(EchoWorker),
                gate: Arc::new(gate),
                optimizer: Arc::new(PassThrough),
                synthesizer: Arc::new(FailingSynth),
            },
            config,
        )
    }

    fn config(max_iterations: usize, threshold: f32) -> OrchestratorConfig {
        OrchestratorConfig {
            max_iterations,
            confidence_threshold: threshold,
            angles_per_iteration: 2,
            ..OrchestratorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_planner_failure_uses_fallback_angles() {
        let mut planner = MockPlanner::new();
        planner
            .expect_plan()
            .times(1)
            .returning(|_, _, _| Err(DelveError::Parse("bad json".into())));
        let mut gate = MockVerificationGate::new();
        gate.expect_evaluate().returning(|_, _, _| Ok(scored(0.9)));

        let report = orchestrator(planner, gate, config(3, 0.85))
            .run("rust")
            .await
            .unwrap();
        let angles: Vec<_> = report.findings.iter().map(|f| f.angle.as_str()).collect();
        assert_eq!(
            angles,
            vec!["rust - Overview and fundamentals", "rust - Current state and trends"]
        );
        assert_eq!(report.metadata.termination, TerminationReason::ConfidenceMet);
    }

    #[tokio::test]
    async fn test_covered_angles_excluded_on_next_iteration() {
        let mut planner = MockPlanner::new();
        planner
            .expect_plan()
            .returning(|_, _, _| Ok(vec!["history".into(), "economics".into()]));
        let mut gate = MockVerificationGate::new();
        gate.expect_evaluate()
            .returning(|_, _, _| {
                let mut v = scored(0.2);
                v.recommended_angles = vec!["regulation".into()];
                Ok(v)
            });

        let report = orchestrator(planner, gate, config(2, 0.85))
            .run("rust")
            .await
            .unwrap();
        let angles: Vec<_> = report.findings.iter().map(|f| f.angle.as_str()).collect();
        assert_eq!(angles, vec!["history", "economics", "regulation"]);
        assert_eq!(report.metadata.iterations, 2);
    }

    #[tokio::test]
    async fn test_verification_error_is_never_success() {
        let mut planner = MockPlanner::new();
        planner.expect_plan().returning(|_, _, _| Ok(vec!["a".into()]));
        let mut gate = MockVerificationGate::new();
        gate.expect_evaluate()
            .returning(|_, _, _| Err(DelveError::Parse("garbled".into())));

        let report = orchestrator(planner, gate, config(1, 0.4))
            .run("rust")
            .await
            .unwrap();
        let v = report.verification.unwrap();
        assert_eq!(v.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(v.decision, VerificationDecision::Continue);
        assert!(v.gaps[0].to_lowercase().contains("verification failed"));
        // 0.5 >= 0.4, so the fallback confidence still meets this low threshold
        assert_eq!(report.metadata.termination, TerminationReason::ConfidenceMet);
    }

    #[tokio::test]
    async fn test_all_tasks_failing_counts_as_failed_iteration() {
        let mut planner = MockPlanner::new();
        planner
            .expect_plan()
            .returning(|_, _, _| Ok(vec!["broken one".into(), "broken two".into()]));
        let mut gate = MockVerificationGate::new();
        gate.expect_evaluate().returning(|_, findings, _| {
            assert!(findings.is_empty());
            Ok(scored(0.1))
        });

        let failures = Arc::new(Mutex::new(0));
        let f = failures.clone();
        let report = orchestrator(planner, gate, config(1, 0.85))
            .with_progress(move |e| {
                if let ProgressEvent::TaskFailed { .. } = e {
                    *f.lock().unwrap() += 1;
                }
            })
            .run("rust")
            .await
            .unwrap();

        assert_eq!(*failures.lock().unwrap(), 2);
        assert!(report.findings.is_empty());
        assert!(report.content.contains("No findings were collected."));
    }

    #[tokio::test]
    async fn test_synthesis_failure_yields_fallback_with_footer() {
        let mut planner = MockPlanner::new();
        planner.expect_plan().returning(|_, _, _| Ok(vec!["a".into()]));
        let mut gate = MockVerificationGate::new();
        gate.expect_evaluate().returning(|_, _, _| Ok(scored(0.95)));

        let report = orchestrator(planner, gate, config(5, 0.85))
            .run("rust")
            .await
            .unwrap();
        assert!(report.content.starts_with("# Research Report"));
        assert!(report.content.contains("synth down"));
        assert!(report.content.contains("## Research Metadata"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_still_reports() {
        let mut planner = MockPlanner::new();
        planner.expect_plan().times(0);
        let gate = MockVerificationGate::new();

        let orch = orchestrator(planner, gate, config(5, 0.85));
        orch.cancel_flag().cancel();
        let report = orch.run("rust").await.unwrap();
        assert_eq!(report.metadata.iterations, 0);
        assert_eq!(report.metadata.termination, TerminationReason::Cancelled);
        assert!(!report.content.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let orch = orchestrator(MockPlanner::new(), MockVerificationGate::new(), config(1, 0.5));
        assert!(matches!(orch.run("   ").await, Err(DelveError::Validation(_))));
    }

    #[tokio::test]
    async fn test_phase_sequence() {
        let mut planner = MockPlanner::new();
        planner.expect_plan().returning(|_, _, _| Ok(vec!["a".into()]));
        let mut gate = MockVerificationGate::new();
        let mut calls = 0;
        gate.expect_evaluate().returning(move |_, _, _| {
            calls += 1;
            Ok(scored(if calls == 1 { 0.2 } else { 0.9 }))
        });

        let phases = Arc::new(Mutex::new(Vec::new()));
        let p = phases.clone();
        orchestrator(planner, gate, config(5, 0.85))
            .with_progress(move |e| {
                if let ProgressEvent::PhaseChanged { phase } = e {
                    p.lock().unwrap().push(phase);
                }
            })
            .run("rust")
            .await
            .unwrap();

        use Phase::*;
        assert_eq!(
            *phases.lock().unwrap(),
            vec![
                Planning, Executing, Verifying, Continuing,
                Planning, Executing, Verifying, Completing,
                Finalizing, Done,
            ]
        );
    }
}
