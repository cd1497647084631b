// src/agents/optimizer.rs — Relevance-based context selection before synthesis
//
// Findings are flattened into context entries (one per search, one per angle
// summary), run through the pre_message hooks, trimmed by relevance to the
// token target, recorded by the post_message hooks, then regrouped.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::ContextOptimizer;
use crate::core::token_budget::TokenBudget;
use crate::core::truncation::truncate_with_note;
use crate::core::types::{Finding, VerificationResult};
use crate::hooks::context::entry_tokens;
use crate::hooks::{HookContext, HookEvent, HookPipeline};
use crate::infra::errors::DelveError;

/// Recent entries are cut to this many chars when they alone exceed the target.
const RECENT_COMPRESS_CHARS: usize = 500;

/// Flatten findings into chronological context entries.
pub fn to_entries(findings: &[Finding]) -> Vec<Value> {
    let mut entries = Vec::new();
    for (fi, finding) in findings.iter().enumerate() {
        for (si, search) in finding.searches.iter().enumerate() {
            entries.push(json!({
                "role": "tool",
                "finding": fi,
                "search": si,
                "angle": finding.angle,
                "provider": search.provider,
                "url": search.source_url,
                "key_points": search.key_points,
                "relevance": search.relevance,
                "content": search.key_points.join("\n"),
            }));
        }
        entries.push(json!({
            "role": "assistant",
            "finding": fi,
            "angle": finding.angle,
            "content": finding.summary,
        }));
    }
    entries
}

/// Rebuild findings from the entries that survived, in original order.
/// Findings with no surviving entry are dropped.
pub fn from_entries(findings: &[Finding], entries: &[Value]) -> Vec<Finding> {
    let mut kept_searches: HashSet<(u64, u64)> = HashSet::new();
    let mut summaries: Vec<Option<String>> = vec![None; findings.len()];

    for entry in entries {
        let Some(fi) = entry.get("finding").and_then(Value::as_u64) else {
            continue;
        };
        match entry.get("search").and_then(Value::as_u64) {
            Some(si) => {
                kept_searches.insert((fi, si));
            }
            None => {
                if let Some(slot) = summaries.get_mut(fi as usize) {
                    *slot = entry
                        .get("content")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
            }
        }
    }

    findings
        .iter()
        .enumerate()
        .filter_map(|(fi, finding)| {
            let searches: Vec<_> = finding
                .searches
                .iter()
                .enumerate()
                .filter(|(si, _)| kept_searches.contains(&(fi as u64, *si as u64)))
                .map(|(_, s)| s.clone())
                .collect();
            let summary = summaries[fi].clone();
            if searches.is_empty() && summary.is_none() {
                return None;
            }
            Some(Finding {
                angle: finding.angle.clone(),
                token_total: searches.iter().map(|s| s.compressed_size).sum(),
                searches,
                summary: summary.unwrap_or_default(),
            })
        })
        .collect()
}

/// Heuristic relevance: 0.5 base, +0.2 for a source URL, +0.2 for key points.
pub fn relevance_score(entry: &Value) -> f32 {
    let mut score: f32 = 0.5;
    let has_url = ["url", "source_url"].iter().any(|k| {
        entry
            .get(*k)
            .and_then(Value::as_str)
            .is_some_and(|u| !u.is_empty())
    });
    if has_url {
        score += 0.2;
    }
    if entry
        .get("key_points")
        .and_then(Value::as_array)
        .is_some_and(|p| !p.is_empty())
    {
        score += 0.2;
    }
    score.min(1.0)
}

pub struct RelevanceOptimizer {
    hooks: Arc<HookPipeline>,
    /// Most recent entries always kept verbatim.
    recent_context: usize,
    target_tokens: usize,
}

impl RelevanceOptimizer {
    pub fn new(hooks: Arc<HookPipeline>, recent_context: usize, target_tokens: usize) -> Self {
        Self {
            hooks,
            recent_context,
            target_tokens,
        }
    }

    /// Keep the last `recent_context` entries, then fill the remaining token
    /// budget with older entries by score. Chronological order is preserved.
    pub fn select(&self, entries: Vec<Value>) -> Vec<Value> {
        if entries.len() <= self.recent_context {
            return entries;
        }

        let split = entries.len() - self.recent_context;
        let (older, recent) = entries.split_at(split);

        let recent_tokens: usize = recent.iter().map(entry_tokens).sum();
        if recent_tokens > self.target_tokens {
            tracing::debug!(recent_tokens, "Recent context alone exceeds target, compressing");
            return recent
                .iter()
                .map(|e| {
                    let mut e = e.clone();
                    if let Some(content) = e.get("content").and_then(Value::as_str) {
                        let t = truncate_with_note(content, RECENT_COMPRESS_CHARS);
                        e["content"] = Value::String(t.content);
                    }
                    e
                })
                .collect();
        }

        // Older duplicates by URL go first.
        let mut seen = HashSet::new();
        let mut scored: Vec<(usize, f32, usize)> = older
            .iter()
            .enumerate()
            .filter(|(_, e)| match e.get("url").and_then(Value::as_str) {
                Some(url) if !url.is_empty() => seen.insert(url.to_string()),
                _ => true,
            })
            .map(|(i, e)| (i, relevance_score(e), entry_tokens(e)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut budget = TokenBudget::new(self.target_tokens);
        budget.deduct(recent_tokens);
        let mut chosen = Vec::new();
        for (i, _, tokens) in scored {
            if !budget.try_deduct(tokens) {
                break;
            }
            chosen.push(i);
        }
        chosen.sort_unstable();

        chosen
            .into_iter()
            .map(|i| older[i].clone())
            .chain(recent.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl ContextOptimizer for RelevanceOptimizer {
    async fn optimize(
        &self,
        findings: &[Finding],
        _verification: Option<&VerificationResult>,
    ) -> Result<Vec<Finding>, DelveError> {
        let entries = to_entries(findings);
        let before = entries.len();

        let mut pre = HookContext::new(HookEvent::PreMessage);
        let entries = match self
            .hooks
            .execute(HookEvent::PreMessage, Value::Array(entries.clone()), &mut pre)
        {
            Ok(Value::Array(list)) => list,
            Ok(_) => {
                tracing::warn!("pre_message hooks returned a non-array payload, ignoring");
                entries
            }
            Err(abort) => {
                tracing::warn!("pre_message hooks aborted, using unoptimized context: {}", abort);
                entries
            }
        };

        let selected = self.select(entries);

        let mut post = HookContext::new(HookEvent::PostMessage);
        if let Err(abort) = self
            .hooks
            .execute(HookEvent::PostMessage, Value::Array(selected.clone()), &mut post)
        {
            tracing::warn!("post_message hooks aborted: {}", abort);
        }
        tracing::info!(
            before,
            after = selected.len(),
            tokens = ?post.get("total_tokens"),
            "Context optimized"
        );

        Ok(from_entries(findings, &selected))
    }
}
