// src/agents/search.rs — Per-angle search worker
//
// Runs `searches_per_angle` searches for one angle, rotating across search
// backends, then summarizes them with the small model. Tool output is
// untrusted: every field is optional and falls back to a default.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::ResearchWorker;
use crate::core::context::EngineContext;
use crate::core::executor::AgentExecutor;
use crate::core::types::{Finding, SearchResult};
use crate::infra::errors::DelveError;
use crate::provider::{AgentHandle, ModelClass, ModelProvider};

/// Search backends in rotation order, with the tool that reaches each.
pub const BACKENDS: [(&str, &str); 5] = [
    ("tavily", "search_tavily"),
    ("exa", "exa_search"),
    ("brave", "search_brave"),
    ("kagi", "search_kagi"),
    ("perplexity", "ai_perplexity"),
];

const QUERY_SUFFIXES: [&str; 5] = [
    "overview",
    "latest developments",
    "research papers",
    "industry applications",
    "future trends",
];

const DEFAULT_RELEVANCE: f32 = 0.5;
const MAX_KEY_POINTS: usize = 10;

const SEARCH_SYSTEM_PROMPT: &str = "You are a search specialist focused on a single research angle. \
Extract key facts and figures from each result, prefer authoritative sources, \
and keep summaries concise: the orchestrator needs compressed information.";

/// Query text for the `index`-th search of an angle.
pub fn search_query(query: &str, angle: &str, index: usize) -> String {
    match QUERY_SUFFIXES.get(index) {
        Some(suffix) => format!("{} {} {}", query, angle, suffix),
        None => format!("{} {}", query, angle),
    }
}

/// Backend name and tool name for the `index`-th search.
pub fn backend_for(index: usize) -> (&'static str, &'static str) {
    BACKENDS[index % BACKENDS.len()]
}

/// Pull a `SearchResult` out of an untrusted tool payload.
///
/// Accepts a single result object or a list/`results` wrapper whose first
/// object is used. Missing or malformed fields fall back to neutral values.
pub fn extract_result(query: &str, provider: &str, payload: &Value) -> Result<SearchResult, DelveError> {
    let item = match payload {
        Value::Object(map) if map.contains_key("results") => {
            payload["results"].as_array().and_then(|a| a.first())
        }
        Value::Array(items) => items.first(),
        Value::Object(_) => Some(payload),
        _ => None,
    }
    .filter(|v| v.is_object())
    .ok_or_else(|| DelveError::Tool {
        tool: provider.to_string(),
        message: "search returned no result object".into(),
    })?;

    let key_points: Vec<String> = match item.get("key_points") {
        Some(Value::Array(points)) => points
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .take(MAX_KEY_POINTS)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };

    let source_url = ["url", "source_url"]
        .iter()
        .find_map(|k| item.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    let relevance = item
        .get("relevance")
        .and_then(Value::as_f64)
        .map(|r| r as f32)
        .filter(|r| r.is_finite())
        .map(|r| r.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_RELEVANCE);

    let size = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| item.get(*k).and_then(Value::as_u64))
            .unwrap_or(0) as usize
    };

    Ok(SearchResult {
        query: query.to_string(),
        provider: provider.to_string(),
        key_points,
        source_url,
        relevance,
        raw_size: size(&["original_length", "original_size"]),
        compressed_size: size(&["compressed_length", "compressed_size"]),
    })
}

/// Summary used when the model call fails.
pub fn fallback_summary(sources: usize, angle: &str) -> String {
    format!(
        "Summary unavailable. Analyzed {} sources on {}.",
        sources, angle
    )
}

pub struct SearchWorker {
    provider: Arc<dyn ModelProvider>,
    executor: AgentExecutor,
    searches_per_angle: usize,
}

impl SearchWorker {
    pub fn new(provider: Arc<dyn ModelProvider>, ctx: EngineContext, searches_per_angle: usize) -> Self {
        Self {
            provider,
            executor: AgentExecutor::new(ctx),
            searches_per_angle,
        }
    }

    fn agent(&self, angle: &str) -> AgentHandle {
        let tools: Vec<&str> = BACKENDS.iter().map(|(_, tool)| *tool).collect();
        let system = format!("{}\n\nAssigned angle: {}", SEARCH_SYSTEM_PROMPT, angle);
        self.provider.create_agent(ModelClass::Small, &system, &tools)
    }

    async fn search_once(
        &self,
        agent: &AgentHandle,
        query: &str,
        index: usize,
    ) -> Result<SearchResult, DelveError> {
        let (backend, tool) = backend_for(index);
        let reply = self
            .executor
            .call_tool(self.provider.as_ref(), agent, tool, json!({ "query": query }))
            .await?;
        extract_result(query, backend, &reply.output)
    }

    async fn summarize(&self, agent: &AgentHandle, angle: &str, searches: &[SearchResult]) -> String {
        let lines: Vec<String> = searches
            .iter()
            .map(|s| {
                format!(
                    "- {}: {} (relevance: {:.1})",
                    s.provider,
                    s.key_points.join(", "),
                    s.relevance
                )
            })
            .collect();
        let prompt = format!(
            "Summarize findings for research angle: {}\n\n\
             FINDINGS FROM {} SEARCHES:\n{}\n\n\
             Write a 2-3 paragraph synthesis covering key patterns, the most significant \
             findings, where sources agree or disagree, and how confident the conclusions are.",
            angle,
            searches.len(),
            lines.join("\n")
        );

        match self
            .executor
            .send_message(self.provider.as_ref(), agent, &prompt)
            .await
        {
            Ok(reply) if !reply.text.trim().is_empty() => reply.text.trim().to_string(),
            Ok(_) => fallback_summary(searches.len(), angle),
            Err(e) => {
                tracing::warn!(angle = %angle, "Summary failed: {}", e);
                fallback_summary(searches.len(), angle)
            }
        }
    }
}

#[async_trait]
impl ResearchWorker for SearchWorker {
    async fn research(&self, query: &str, angle: &str) -> Result<Finding, DelveError> {
        let agent = self.agent(angle);
        let mut searches = Vec::new();
        let mut last_error = None;

        for index in 0..self.searches_per_angle {
            let q = search_query(query, angle, index);
            match self.search_once(&agent, &q, index).await {
                Ok(result) => searches.push(result),
                Err(e) => {
                    tracing::debug!(angle = %angle, query = %q, "Search failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if searches.is_empty() {
            return Err(last_error.unwrap_or(DelveError::EmptyTask {
                angle: angle.to_string(),
            }));
        }

        let summary = self.summarize(&agent, angle, &searches).await;
        let token_total = searches.iter().map(|s| s.compressed_size).sum();
        tracing::debug!(angle = %angle, searches = searches.len(), "Angle researched");

        Ok(Finding {
            angle: angle.to_string(),
            searches,
            summary,
            token_total,
        })
    }
}
