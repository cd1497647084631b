// src/hooks/context.rs — Pre/post-message context hooks
//
// Payload is a JSON array of context entries: `{"role", "content", ...}`,
// oldest first. Entries with role "system" are never dropped.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{Hook, HookContext, HookEvent, HookOutcome, HookPipeline};
use crate::core::token_budget::{estimate_tokens, TokenBudget};
use crate::core::truncation::compress_with_note;
use crate::infra::config::ContextConfig;
use crate::infra::errors::DelveError;

pub fn register(pipeline: &HookPipeline, config: &ContextConfig) {
    pipeline.register(HookEvent::PreMessage, Arc::new(ContextDedup), 150);
    pipeline.register(
        HookEvent::PreMessage,
        Arc::new(CompressAged {
            keep_recent: config.compress_after,
            min_chars: config.compress_min_chars,
        }),
        125,
    );
    pipeline.register(
        HookEvent::PreMessage,
        Arc::new(Prioritize {
            max_messages: config.max_messages,
        }),
        100,
    );
    pipeline.register(
        HookEvent::PreMessage,
        Arc::new(TrimToBudget {
            max_tokens: config.max_tokens,
        }),
        50,
    );
    pipeline.register(HookEvent::PostMessage, Arc::new(ContextStats), 100);
}

fn entries(payload: &Value) -> Result<&Vec<Value>, DelveError> {
    payload
        .as_array()
        .ok_or_else(|| DelveError::Validation("context payload must be an array".into()))
}

fn is_system(entry: &Value) -> bool {
    entry.get("role").and_then(Value::as_str) == Some("system")
}

pub fn entry_tokens(entry: &Value) -> usize {
    estimate_tokens(&entry.to_string())
}

/// First URL-like field on an entry.
fn entry_url(entry: &Value) -> Option<&str> {
    ["url", "source", "link"]
        .iter()
        .find_map(|k| entry.get(*k).and_then(Value::as_str))
        .or_else(|| entry.pointer("/metadata/url").and_then(Value::as_str))
        .filter(|u| !u.is_empty())
}

// ─── dedup_context ──────────────────────────────────────────────────────────

/// Keeps the first entry per URL.
pub struct ContextDedup;

impl Hook for ContextDedup {
    fn name(&self) -> &str {
        "dedup_context"
    }

    fn call(&self, payload: &Value, ctx: &mut HookContext) -> Result<HookOutcome, DelveError> {
        let list = entries(payload)?;
        let mut seen: HashSet<String> = HashSet::new();
        let kept: Vec<Value> = list
            .iter()
            .filter(|e| match entry_url(e) {
                Some(url) => seen.insert(hex::encode(Sha256::digest(url.as_bytes()))),
                None => true,
            })
            .cloned()
            .collect();

        let removed = list.len() - kept.len();
        if removed == 0 {
            return Ok(HookOutcome::keep());
        }
        tracing::debug!(removed, "Removed duplicate context entries");
        ctx.set("context_duplicates_removed", json!(removed));
        Ok(HookOutcome::replace(Value::Array(kept)))
    }
}

// ─── compress_aged ──────────────────────────────────────────────────────────

/// Shortens long entries outside the most recent `keep_recent`.
pub struct CompressAged {
    pub keep_recent: usize,
    pub min_chars: usize,
}

impl Hook for CompressAged {
    fn name(&self) -> &str {
        "compress_aged"
    }

    fn call(&self, payload: &Value, _ctx: &mut HookContext) -> Result<HookOutcome, DelveError> {
        let list = entries(payload)?;
        if list.len() <= self.keep_recent {
            return Ok(HookOutcome::keep());
        }

        let cutoff = list.len() - self.keep_recent;
        let mut changed = false;
        let out: Vec<Value> = list
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                if i >= cutoff {
                    return entry.clone();
                }
                let Some(content) = entry.get("content").and_then(Value::as_str) else {
                    return entry.clone();
                };
                let t = compress_with_note(content, self.min_chars);
                if !t.was_truncated {
                    return entry.clone();
                }
                changed = true;
                let mut e = entry.clone();
                e["content"] = Value::String(t.content);
                e["compressed"] = Value::Bool(true);
                e
            })
            .collect();

        Ok(if changed {
            HookOutcome::replace(Value::Array(out))
        } else {
            HookOutcome::keep()
        })
    }
}

// ─── prioritize ─────────────────────────────────────────────────────────────

/// Caps the entry count: all system entries plus the newest others.
pub struct Prioritize {
    pub max_messages: usize,
}

impl Hook for Prioritize {
    fn name(&self) -> &str {
        "prioritize"
    }

    fn call(&self, payload: &Value, _ctx: &mut HookContext) -> Result<HookOutcome, DelveError> {
        let list = entries(payload)?;
        if list.len() <= self.max_messages {
            return Ok(HookOutcome::keep());
        }

        let (system, others): (Vec<&Value>, Vec<&Value>) = list.iter().partition(|e| is_system(e));
        let room = self.max_messages.saturating_sub(system.len());
        let skip = others.len().saturating_sub(room);

        tracing::debug!(
            system = system.len(),
            recent = others.len() - skip,
            "Prioritized context entries"
        );
        let kept: Vec<Value> = system
            .into_iter()
            .chain(others.into_iter().skip(skip))
            .cloned()
            .collect();
        Ok(HookOutcome::replace(Value::Array(kept)))
    }
}

// ─── trim_to_budget ─────────────────────────────────────────────────────────

/// Enforces the token ceiling. System entries are kept, then others from
/// newest backwards until the next one would not fit.
pub struct TrimToBudget {
    pub max_tokens: usize,
}

impl Hook for TrimToBudget {
    fn name(&self) -> &str {
        "trim_to_budget"
    }

    fn call(&self, payload: &Value, ctx: &mut HookContext) -> Result<HookOutcome, DelveError> {
        let list = entries(payload)?;
        let total: usize = list.iter().map(entry_tokens).sum();
        if total < self.max_tokens {
            return Ok(HookOutcome::keep());
        }

        let (system, others): (Vec<&Value>, Vec<&Value>) = list.iter().partition(|e| is_system(e));
        let mut budget = TokenBudget::new(self.max_tokens);
        budget.deduct(system.iter().map(|e| entry_tokens(e)).sum());

        let mut recent = Vec::new();
        for entry in others.iter().rev() {
            if !budget.try_deduct(entry_tokens(entry)) {
                break;
            }
            recent.push(*entry);
        }
        recent.reverse();

        let kept: Vec<Value> = system.into_iter().chain(recent).cloned().collect();
        let kept_tokens: usize = kept.iter().map(entry_tokens).sum();
        tracing::info!(
            before = list.len(),
            after = kept.len(),
            tokens = kept_tokens,
            "Context trimmed to budget"
        );
        ctx.set("tokens_before_trim", json!(total));
        ctx.set("tokens_after_trim", json!(kept_tokens));
        Ok(HookOutcome::replace(Value::Array(kept)))
    }
}

// ─── message_stats ──────────────────────────────────────────────────────────

/// Records size statistics for the assembled context. Never alters the payload.
pub struct ContextStats;

impl Hook for ContextStats {
    fn name(&self) -> &str {
        "message_stats"
    }

    fn call(&self, payload: &Value, ctx: &mut HookContext) -> Result<HookOutcome, DelveError> {
        let list = entries(payload)?;
        let mut roles: BTreeMap<String, usize> = BTreeMap::new();
        for entry in list {
            let role = entry
                .get("role")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            *roles.entry(role.to_string()).or_default() += 1;
        }
        ctx.set("message_count", json!(list.len()));
        ctx.set(
            "total_tokens",
            json!(list.iter().map(entry_tokens).sum::<usize>()),
        );
        ctx.set("role_counts", json!(roles));
        Ok(HookOutcome::keep())
    }
}
