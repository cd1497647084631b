// src/hooks/validation.rs — Pre-tool validation (fail-closed)
//
// Rejects malformed search arguments and unsafe URLs before any network call.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use super::{Hook, HookContext, HookEvent, HookOutcome, HookPipeline};
use crate::core::truncation::truncate_chars;
use crate::infra::config::HooksConfig;
use crate::infra::errors::DelveError;

const MIN_QUERY_CHARS: usize = 3;
const MAX_QUERY_CHARS: usize = 1000;
const MAX_RESULTS_RANGE: std::ops::RangeInclusive<i64> = 1..=100;
const MAX_URL_CHARS: usize = 2000;
const URL_FIELDS: &[&str] = &["url", "target_url", "source_url"];
const BLOCKED_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0"];
const BLOCKED_PREFIXES: &[&str] = &["192.168."];
const SENSITIVE_KEYS: &[&str] = &["key", "token", "secret", "password"];
const LOG_VALUE_CHARS: usize = 100;

pub fn register(pipeline: &HookPipeline, config: &HooksConfig) {
    if config.validation {
        pipeline.register(HookEvent::PreTool, Arc::new(SearchValidation), 200);
        pipeline.register(HookEvent::PreTool, Arc::new(UrlValidation), 150);
    }
    pipeline.register(HookEvent::PreTool, Arc::new(ToolLogger), 50);
}

pub fn is_search_tool(name: &str) -> bool {
    name.contains("search") || name.contains("perplexity")
}

fn tool_name<'a>(payload: &'a Value, ctx: &'a HookContext) -> &'a str {
    payload["tool"]
        .as_str()
        .or(ctx.tool.as_deref())
        .unwrap_or("")
}

fn arguments(payload: &Value) -> Option<&Map<String, Value>> {
    payload["arguments"].as_object()
}

// ─── Search arguments ───────────────────────────────────────────────────────

/// Query length, result count and date range checks for search tools.
pub struct SearchValidation;

impl Hook for SearchValidation {
    fn name(&self) -> &str {
        "validate_search"
    }

    fn call(&self, payload: &Value, ctx: &mut HookContext) -> Result<HookOutcome, DelveError> {
        let tool = tool_name(payload, ctx);
        if !is_search_tool(tool) {
            return Ok(HookOutcome::keep());
        }
        let empty = Map::new();
        let args = arguments(payload).unwrap_or(&empty);

        if let Some(reason) = check_query(args.get("query")) {
            return Ok(HookOutcome::Abort(reason));
        }
        if let Some(reason) = check_max_results(args.get("max_results")) {
            return Ok(HookOutcome::Abort(reason));
        }
        if let Some(reason) = check_date_range(args.get("start_date"), args.get("end_date")) {
            return Ok(HookOutcome::Abort(reason));
        }
        Ok(HookOutcome::keep())
    }
}

fn check_query(query: Option<&Value>) -> Option<String> {
    let query = match query.and_then(Value::as_str).map(str::trim) {
        Some(q) if !q.is_empty() => q,
        _ => return Some("Search query cannot be empty".into()),
    };

    let len = query.chars().count();
    if len < MIN_QUERY_CHARS {
        return Some(format!(
            "Search query too short ({} chars, minimum {})",
            len, MIN_QUERY_CHARS
        ));
    }
    if len > MAX_QUERY_CHARS {
        return Some(format!(
            "Search query too long ({} chars, maximum {})",
            len, MAX_QUERY_CHARS
        ));
    }
    if query.chars().any(|c| matches!(c, '<' | '>' | '{' | '}')) {
        tracing::warn!(query = %truncate_chars(query, 80), "Search query contains special characters");
    }
    None
}

fn check_max_results(value: Option<&Value>) -> Option<String> {
    let value = value?;
    match value.as_i64() {
        Some(n) if MAX_RESULTS_RANGE.contains(&n) => None,
        Some(n) => Some(format!("max_results must be between 1 and 100, got {}", n)),
        None => Some(format!("max_results must be an integer, got {}", value)),
    }
}

fn check_date_range(start: Option<&Value>, end: Option<&Value>) -> Option<String> {
    let parse = |v: Option<&Value>| -> Result<Option<NaiveDate>, String> {
        match v.and_then(Value::as_str) {
            None => Ok(None),
            Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| format!("Invalid date '{}', expected YYYY-MM-DD", s)),
        }
    };
    let start = match parse(start) {
        Ok(d) => d,
        Err(e) => return Some(e),
    };
    let end = match parse(end) {
        Ok(d) => d,
        Err(e) => return Some(e),
    };
    match (start, end) {
        (Some(s), Some(e)) if s > e => Some(format!("start_date {} is after end_date {}", s, e)),
        _ => None,
    }
}

// ─── URLs ───────────────────────────────────────────────────────────────────

/// Scheme, length and host checks for every URL argument, on any tool.
pub struct UrlValidation;

impl Hook for UrlValidation {
    fn name(&self) -> &str {
        "validate_urls"
    }

    fn call(&self, payload: &Value, _ctx: &mut HookContext) -> Result<HookOutcome, DelveError> {
        let args = match arguments(payload) {
            Some(a) => a,
            None => return Ok(HookOutcome::keep()),
        };

        let mut urls: Vec<&str> = URL_FIELDS
            .iter()
            .filter_map(|f| args.get(*f).and_then(Value::as_str))
            .collect();
        if let Some(list) = args.get("urls").and_then(Value::as_array) {
            urls.extend(list.iter().filter_map(Value::as_str));
        }

        for raw in urls {
            if let Err(reason) = validate_url(raw) {
                return Ok(HookOutcome::Abort(reason));
            }
        }
        Ok(HookOutcome::keep())
    }
}

pub fn validate_url(raw: &str) -> Result<(), String> {
    if raw.chars().count() > MAX_URL_CHARS {
        return Err(format!("URL exceeds {} chars", MAX_URL_CHARS));
    }
    let parsed = url::Url::parse(raw).map_err(|e| format!("Invalid URL '{}': {}", raw, e))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!(
            "URL scheme '{}' not allowed (http/https only)",
            parsed.scheme()
        ));
    }

    let host = parsed.host_str().unwrap_or("");
    if BLOCKED_HOSTS.contains(&host) || BLOCKED_PREFIXES.iter().any(|p| host.starts_with(p)) {
        return Err(format!("URL host '{}' is not allowed", host));
    }
    Ok(())
}

// ─── Logging ────────────────────────────────────────────────────────────────

/// Logs every tool call with sensitive arguments redacted. Never modifies the payload.
pub struct ToolLogger;

impl Hook for ToolLogger {
    fn name(&self) -> &str {
        "log_tool"
    }

    fn call(&self, payload: &Value, ctx: &mut HookContext) -> Result<HookOutcome, DelveError> {
        let tool = tool_name(payload, ctx).to_string();
        let args = Value::Object(arguments(payload).map(redact).unwrap_or_default());
        tracing::debug!(tool = %tool, args = %args, "Tool call");
        Ok(HookOutcome::keep())
    }
}

pub fn redact(args: &Map<String, Value>) -> Map<String, Value> {
    args.iter()
        .map(|(k, v)| {
            let lower = k.to_lowercase();
            let shown = if SENSITIVE_KEYS.iter().any(|s| lower.contains(s)) {
                Value::String("***".into())
            } else {
                match v {
                    Value::String(s) => Value::String(truncate_chars(s, LOG_VALUE_CHARS).into()),
                    other => {
                        let text = other.to_string();
                        if text.chars().count() > LOG_VALUE_CHARS {
                            Value::String(truncate_chars(&text, LOG_VALUE_CHARS).into())
                        } else {
                            other.clone()
                        }
                    }
                }
            };
            (k.clone(), shown)
        })
        .collect()
}
