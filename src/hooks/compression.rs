// src/hooks/compression.rs — Post-search dedup and compression (fail-open)
//
// Search payloads arrive as a single result object, an array of results, or
// an object with a `results` array. Both hooks handle all three shapes.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Value};

use super::{Hook, HookContext, HookEvent, HookOutcome, HookPipeline};
use crate::core::truncation::truncate_with_note;
use crate::infra::config::HooksConfig;
use crate::infra::errors::DelveError;

/// Fields that may carry bulky page text.
const CONTENT_FIELDS: &[&str] = &["content", "raw_content", "text"];

pub fn register(pipeline: &HookPipeline, config: &HooksConfig) {
    pipeline.register(HookEvent::PostSearch, Arc::new(UrlDedup), 150);
    if config.compression {
        pipeline.register(
            HookEvent::PostSearch,
            Arc::new(ResultCompression {
                min_chars: config.compress_min_chars,
                max_chars: config.max_result_chars,
            }),
            100,
        );
    }
}

/// Borrow the list of result items inside a payload, if it has one.
fn items(payload: &Value) -> Option<&Vec<Value>> {
    payload
        .as_array()
        .or_else(|| payload.get("results").and_then(Value::as_array))
}

/// Rebuild a payload of the same shape around new items.
fn with_items(payload: &Value, new_items: Vec<Value>) -> Value {
    if payload.is_array() {
        return Value::Array(new_items);
    }
    let mut out = payload.clone();
    out["results"] = Value::Array(new_items);
    out
}

// ─── Dedup ──────────────────────────────────────────────────────────────────

/// Drops later results whose `url` was already seen. Results without a URL are kept.
pub struct UrlDedup;

impl Hook for UrlDedup {
    fn name(&self) -> &str {
        "dedup_urls"
    }

    fn call(&self, payload: &Value, ctx: &mut HookContext) -> Result<HookOutcome, DelveError> {
        let list = match items(payload) {
            Some(l) => l,
            None => return Ok(HookOutcome::keep()),
        };

        let mut seen = HashSet::new();
        let unique: Vec<Value> = list
            .iter()
            .filter(|item| match item.get("url").and_then(Value::as_str) {
                Some(url) if !url.is_empty() => seen.insert(url.to_string()),
                _ => true,
            })
            .cloned()
            .collect();

        let removed = list.len() - unique.len();
        if removed == 0 {
            return Ok(HookOutcome::keep());
        }
        tracing::debug!(removed, "Removed duplicate search results");
        ctx.set("duplicates_removed", json!(removed));
        Ok(HookOutcome::replace(with_items(payload, unique)))
    }
}

// ─── Compression ────────────────────────────────────────────────────────────

/// Truncates oversized result text and records size statistics on each result.
pub struct ResultCompression {
    /// Results whose serialized size is below this are left alone.
    pub min_chars: usize,
    /// Content is cut to this many chars.
    pub max_chars: usize,
}

impl ResultCompression {
    fn compress_item(&self, item: &Value) -> Option<Value> {
        let original_size = item.to_string().chars().count();
        if original_size < self.min_chars || !item.is_object() {
            return None;
        }

        let mut out = item.clone();
        let mut changed = false;
        for field in CONTENT_FIELDS {
            if let Some(text) = item.get(*field).and_then(Value::as_str) {
                let t = truncate_with_note(text, self.max_chars);
                if t.was_truncated {
                    out[*field] = Value::String(t.content);
                    changed = true;
                }
            }
        }
        if !changed {
            return None;
        }

        let compressed_size = out.to_string().chars().count();
        out["original_size"] = json!(original_size);
        out["compressed_size"] = json!(compressed_size);
        out["compression_ratio"] = json!(compressed_size as f64 / original_size as f64);
        Some(out)
    }
}

impl Hook for ResultCompression {
    fn name(&self) -> &str {
        "compress_results"
    }

    fn call(&self, payload: &Value, ctx: &mut HookContext) -> Result<HookOutcome, DelveError> {
        if let Some(tool) = &ctx.tool {
            if !super::validation::is_search_tool(tool) {
                return Ok(HookOutcome::keep());
            }
        }

        let replaced = match items(payload) {
            Some(list) => {
                let mut any = false;
                let new_items: Vec<Value> = list
                    .iter()
                    .map(|item| match self.compress_item(item) {
                        Some(c) => {
                            any = true;
                            c
                        }
                        None => item.clone(),
                    })
                    .collect();
                any.then(|| with_items(payload, new_items))
            }
            None => self.compress_item(payload),
        };

        Ok(match replaced {
            Some(p) => HookOutcome::replace(p),
            None => HookOutcome::keep(),
        })
    }
}
