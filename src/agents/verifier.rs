// src/agents/verifier.rs — Sufficiency scoring of accumulated findings

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::VerificationGate;
use crate::core::context::EngineContext;
use crate::core::decode::decode_or;
use crate::core::executor::AgentExecutor;
use crate::core::types::{Finding, VerificationDecision, VerificationResult, FALLBACK_CONFIDENCE};
use crate::infra::errors::DelveError;
use crate::provider::{ModelClass, ModelProvider};

/// Gap recorded when the model's answer could not be decoded.
pub const UNPARSEABLE_GAP: &str = "Could not parse verification response";

const VERIFIER_SYSTEM_PROMPT: &str = r#"You are a research quality control specialist.
Evaluate whether research findings adequately answer the user's query.

Score each criterion from 0.0 to 1.0:
1. coverage: are all aspects of the query addressed?
2. depth: is the information detailed and specific?
3. source_quality: are sources authoritative and current?
4. consistency: do findings agree, or are contradictions explained?

Overall confidence is the average of the four scores.

Respond with JSON only:
{
  "coverage_score": 0.0,
  "depth_score": 0.0,
  "source_quality_score": 0.0,
  "consistency_score": 0.0,
  "gaps": ["..."],
  "recommended_angles": ["..."],
  "strengths": ["..."],
  "decision": "continue" | "complete",
  "reasoning": "..."
}

It is better to request more research than to deliver an incomplete answer."#;

/// Raw shape of the model's answer. Everything is optional; scores are
/// clamped and confidence recomputed afterwards.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVerification {
    coverage_score: Option<f32>,
    depth_score: Option<f32>,
    source_quality_score: Option<f32>,
    consistency_score: Option<f32>,
    gaps: Vec<String>,
    recommended_angles: Vec<String>,
    strengths: Vec<String>,
    decision: Option<String>,
    reasoning: String,
}

impl RawVerification {
    /// Terminal value for an undecodable answer: neutral scores, Continue.
    fn unparseable() -> Self {
        let neutral = Some(FALLBACK_CONFIDENCE);
        Self {
            coverage_score: neutral,
            depth_score: neutral,
            source_quality_score: neutral,
            consistency_score: neutral,
            gaps: vec![UNPARSEABLE_GAP.to_string()],
            decision: Some("continue".into()),
            reasoning: "Failed to parse verification response".into(),
            ..Self::default()
        }
    }

    fn into_result(self, threshold: f32) -> VerificationResult {
        let score = |s: Option<f32>| s.unwrap_or(0.0);
        let mut result = VerificationResult::from_scores(
            score(self.coverage_score),
            score(self.depth_score),
            score(self.source_quality_score),
            score(self.consistency_score),
            VerificationDecision::Continue,
        );
        // A "complete" verdict only stands when the recomputed confidence backs it.
        let says_complete = self
            .decision
            .as_deref()
            .map(|d| d.trim().eq_ignore_ascii_case("complete"))
            .unwrap_or(false);
        if says_complete && result.confidence >= threshold {
            result.decision = VerificationDecision::Complete;
        }
        result.gaps = self.gaps;
        result.recommended_angles = self.recommended_angles;
        result.strengths = self.strengths;
        result.reasoning = self.reasoning;
        result
    }
}

/// Decode a verifier answer. Never fails: undecodable text yields the
/// neutral fallback with an explanatory gap.
pub fn parse_verification(text: &str, threshold: f32) -> VerificationResult {
    decode_or(text, RawVerification::unparseable()).into_result(threshold)
}

/// Render findings for the verifier prompt.
pub fn format_findings(findings: &[Finding]) -> String {
    findings
        .iter()
        .enumerate()
        .map(|(i, f)| {
            format!(
                "ANGLE {}: {}\nNumber of searches: {}\nSummary: {}\n",
                i + 1,
                f.angle,
                f.searches.len(),
                if f.summary.is_empty() {
                    "No summary available"
                } else {
                    f.summary.as_str()
                }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Model-free quality snapshot of a finding set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualitySnapshot {
    pub total_angles: usize,
    pub total_searches: usize,
    pub avg_searches_per_angle: f32,
    pub key_points_per_search: f32,
    pub has_summaries: bool,
    /// Heuristic in [0, 1].
    pub score: f32,
}

/// Cheap heuristic check, no model call. Useful as a pre-filter or when the
/// gate is unavailable.
pub fn quick_quality_check(findings: &[Finding]) -> QualitySnapshot {
    let total_angles = findings.len();
    let total_searches: usize = findings.iter().map(|f| f.searches.len()).sum();
    let total_points: usize = findings
        .iter()
        .flat_map(|f| f.searches.iter())
        .map(|s| s.key_points.len())
        .sum();

    let avg_searches_per_angle = if total_angles > 0 {
        total_searches as f32 / total_angles as f32
    } else {
        0.0
    };
    let key_points_per_search = if total_searches > 0 {
        total_points as f32 / total_searches as f32
    } else {
        0.0
    };
    let has_summaries = total_angles > 0 && findings.iter().all(|f| !f.summary.trim().is_empty());

    // Saturating sub-scores: 5 angles, 5 searches per angle, 3 key points per search.
    let breadth = (total_angles as f32 / 5.0).min(1.0);
    let depth = (avg_searches_per_angle / 5.0).min(1.0);
    let density = (key_points_per_search / 3.0).min(1.0);
    let summaries = if has_summaries { 1.0 } else { 0.0 };

    QualitySnapshot {
        total_angles,
        total_searches,
        avg_searches_per_angle,
        key_points_per_search,
        has_summaries,
        score: (breadth + depth + density + summaries) / 4.0,
    }
}

pub struct LlmVerifier {
    provider: Arc<dyn ModelProvider>,
    executor: AgentExecutor,
}

impl LlmVerifier {
    pub fn new(provider: Arc<dyn ModelProvider>, ctx: EngineContext) -> Self {
        Self {
            provider,
            executor: AgentExecutor::new(ctx),
        }
    }
}

#[async_trait]
impl VerificationGate for LlmVerifier {
    async fn evaluate(
        &self,
        query: &str,
        findings: &[Finding],
        confidence_threshold: f32,
    ) -> Result<VerificationResult, DelveError> {
        let agent = self
            .provider
            .create_agent(ModelClass::Big, VERIFIER_SYSTEM_PROMPT, &[]);
        let prompt = format!(
            "Evaluate whether the research findings adequately answer this query.\n\n\
             ORIGINAL QUERY:\n{}\n\nRESEARCH FINDINGS:\n{}\n\n\
             CONFIDENCE THRESHOLD: {:.2}\n\n\
             Score every criterion, list gaps, recommended angles and strengths, \
             then decide \"continue\" or \"complete\" and explain why.",
            query,
            format_findings(findings),
            confidence_threshold
        );
        let reply = self
            .executor
            .send_message(self.provider.as_ref(), &agent, &prompt)
            .await?;

        let result = parse_verification(&reply.text, confidence_threshold);
        tracing::debug!(
            confidence = result.confidence,
            gaps = result.gaps.len(),
            "Verification scored"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{SearchResult, FALLBACK_CONFIDENCE};

    fn finding(angle: &str, searches: usize, points: usize) -> Finding {
        Finding {
            angle: angle.into(),
            searches: (0..searches)
                .map(|i| SearchResult {
                    query: format!("q{}", i),
                    provider: "tavily".into(),
                    key_points: (0..points).map(|p| format!("p{}", p)).collect(),
                    source_url: String::new(),
                    relevance: 0.5,
                    raw_size: 0,
                    compressed_size: 0,
                })
                .collect(),
            summary: "summary".into(),
            token_total: 0,
        }
    }

    #[test]
    fn test_parse_recomputes_confidence() {
        let text = r#"```json
{"confidence": 0.99, "coverage_score": 0.8, "depth_score": 0.6,
 "source_quality_score": 0.9, "consistency_score": 0.7,
 "gaps": ["pricing"], "strengths": ["sources"], "decision": "continue",
 "reasoning": "thin on pricing"}
```"#;
        let r = parse_verification(text, 0.85);
        assert!((r.confidence - 0.75).abs() < 1e-6);
        assert_eq!(r.gaps, vec!["pricing"]);
        assert_eq!(r.strengths, vec!["sources"]);
        assert_eq!(r.decision, VerificationDecision::Continue);
        assert_eq!(r.reasoning, "thin on pricing");
    }

    #[test]
    fn test_parse_complete_requires_threshold() {
        let text = r#"{"coverage_score": 0.5, "depth_score": 0.5,
            "source_quality_score": 0.5, "consistency_score": 0.5, "decision": "complete"}"#;
        assert_eq!(parse_verification(text, 0.85).decision, VerificationDecision::Continue);
        assert_eq!(parse_verification(text, 0.5).decision, VerificationDecision::Complete);
    }

    #[test]
    fn test_parse_clamps_scores() {
        let text = r#"{"coverage_score": 3.0, "depth_score": -1.0,
            "source_quality_score": 1.0, "consistency_score": 1.0}"#;
        let r = parse_verification(text, 0.85);
        assert_eq!(r.coverage_score, 1.0);
        assert_eq!(r.depth_score, 0.0);
        assert!((r.confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_parse_garbage_falls_back() {
        let r = parse_verification("I think it's fine.", 0.85);
        assert_eq!(r.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(r.gaps, vec![UNPARSEABLE_GAP]);
        assert_eq!(r.decision, VerificationDecision::Continue);
        // A lenient threshold still never turns the fallback into Complete.
        assert_eq!(
            parse_verification("{ not json", 0.3).decision,
            VerificationDecision::Continue
        );
    }

    #[test]
    fn test_format_findings() {
        let text = format_findings(&[finding("history", 2, 1)]);
        assert!(text.contains("ANGLE 1: history"));
        assert!(text.contains("Number of searches: 2"));
    }

    #[test]
    fn test_quick_quality_check() {
        let empty = quick_quality_check(&[]);
        assert_eq!(empty.score, 0.0);
        assert!(!empty.has_summaries);

        let full: Vec<Finding> = (0..5).map(|i| finding(&format!("a{}", i), 5, 3)).collect();
        let snap = quick_quality_check(&full);
        assert_eq!(snap.total_searches, 25);
        assert!((snap.score - 1.0).abs() < 1e-6);

        let thin = quick_quality_check(&[finding("a", 1, 0)]);
        assert!(thin.score < 0.5);
    }
}
