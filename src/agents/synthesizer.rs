// src/agents/synthesizer.rs — Final report writing

use std::sync::Arc;

use async_trait::async_trait;

use super::Synthesizer;
use crate::core::context::EngineContext;
use crate::core::executor::AgentExecutor;
use crate::core::types::{Finding, ReportMetadata, VerificationResult};
use crate::infra::errors::DelveError;
use crate::provider::{ModelClass, ModelProvider};

const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are a research report synthesis specialist.
Write a well-structured Markdown report with these sections:
1. Executive Summary (3-4 sentences)
2. Key Findings, grouped by theme rather than by source
3. Detailed Analysis, comparing perspectives and explaining contradictions
4. Confidence Assessment: strong areas, uncertain areas, known gaps
5. Sources and Citations
6. Recommendations for further research, if any

Be accurate and objective. Make no unsupported claims and keep facts
distinct from interpretation."#;

/// Search details shown per angle in the prompt.
const SEARCHES_PER_ANGLE_IN_PROMPT: usize = 3;
const POINTS_PER_SEARCH_IN_PROMPT: usize = 5;

pub fn format_findings(findings: &[Finding]) -> String {
    let mut out = String::new();
    for (i, finding) in findings.iter().enumerate() {
        out.push_str(&format!(
            "\n=== ANGLE {}: {} ===\nNumber of searches: {}\nKey findings:\n",
            i + 1,
            finding.angle,
            finding.searches.len()
        ));
        for (j, search) in finding
            .searches
            .iter()
            .take(SEARCHES_PER_ANGLE_IN_PROMPT)
            .enumerate()
        {
            out.push_str(&format!(
                "  Search {} ({}, relevance: {:.1}):\n",
                j + 1,
                search.provider,
                search.relevance
            ));
            for point in search.key_points.iter().take(POINTS_PER_SEARCH_IN_PROMPT) {
                out.push_str(&format!("  - {}\n", point));
            }
            if !search.source_url.is_empty() {
                out.push_str(&format!("  Source: {}\n", search.source_url));
            }
        }
        out.push_str(&format!("Summary:\n{}\n", finding.summary));
    }
    out
}

fn format_verification(verification: Option<&VerificationResult>) -> String {
    let Some(v) = verification else {
        return String::new();
    };
    let list = |items: &[String], empty: &str| {
        if items.is_empty() {
            format!("- {}", empty)
        } else {
            items
                .iter()
                .map(|s| format!("- {}", s))
                .collect::<Vec<_>>()
                .join("\n")
        }
    };
    format!(
        "\nVERIFICATION ASSESSMENT:\nOverall Confidence: {:.2}\n\nStrengths:\n{}\n\nIdentified Gaps:\n{}\n",
        v.confidence,
        list(&v.strengths, "None noted"),
        list(&v.gaps, "None identified")
    )
}

/// Statistics footer appended to every report.
pub fn metadata_footer(query: &str, metadata: &ReportMetadata) -> String {
    let history = metadata
        .verification_history
        .iter()
        .map(|c| format!("{:.2}", c))
        .collect::<Vec<_>>()
        .join(" → ");
    format!(
        "\n\n---\n## Research Metadata\n\n\
         **Query:** {}\n\n\
         - Iterations: {}\n\
         - Research angles: {}\n\
         - Searches performed: {}\n\
         - Final confidence: {:.2}\n\
         - Confidence history: {}\n\
         - Stopped because: {}\n\
         - Total cost: ${:.4}\n\
         - Generated: {}\n",
        query,
        metadata.iterations,
        metadata.total_angles,
        metadata.total_searches,
        metadata.final_confidence,
        if history.is_empty() { "n/a".to_string() } else { history },
        metadata.termination,
        metadata.total_cost,
        metadata.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

/// Plain report listing each angle's summary. Used when synthesis fails.
pub fn fallback_report(query: &str, findings: &[Finding], error: &str) -> String {
    let mut report = format!(
        "# Research Report\n\n**Query:** {}\n\n\
         **Status:** Report generation encountered an error.\n\n\
         ## Error Details\n\n{}\n\n## Available Findings\n",
        query, error
    );
    if findings.is_empty() {
        report.push_str("\nNo findings were collected.\n");
    }
    for (i, finding) in findings.iter().enumerate() {
        let summary = if finding.summary.trim().is_empty() {
            "No summary"
        } else {
            finding.summary.as_str()
        };
        report.push_str(&format!("\n### Angle {}: {}\n\n{}\n", i + 1, finding.angle, summary));
    }
    report.push_str(&format!(
        "\n---\n*Fallback report generated after a synthesis error.*\n*Total angles researched: {}*\n",
        findings.len()
    ));
    report
}

pub struct LlmSynthesizer {
    provider: Arc<dyn ModelProvider>,
    executor: AgentExecutor,
}

impl LlmSynthesizer {
    pub fn new(provider: Arc<dyn ModelProvider>, ctx: EngineContext) -> Self {
        Self {
            provider,
            executor: AgentExecutor::new(ctx),
        }
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(
        &self,
        query: &str,
        findings: &[Finding],
        verification: Option<&VerificationResult>,
    ) -> Result<String, DelveError> {
        let agent = self
            .provider
            .create_agent(ModelClass::Big, SYNTHESIS_SYSTEM_PROMPT, &[]);
        let prompt = format!(
            "Create a comprehensive research report for this query.\n\n\
             ORIGINAL QUERY:\n{}\n\nRESEARCH FINDINGS:\n{}\n{}\n\
             Synthesize across all sources instead of summarizing each one, \
             and make sure the report directly answers the query.",
            query,
            format_findings(findings),
            format_verification(verification)
        );
        let reply = self
            .executor
            .send_message(self.provider.as_ref(), &agent, &prompt)
            .await?;

        let text = reply.text.trim();
        if text.is_empty() {
            return Err(DelveError::Provider {
                provider: self.provider.id().to_string(),
                message: "empty synthesis response".into(),
                retriable: false,
            });
        }
        Ok(text.to_string())
    }
}
