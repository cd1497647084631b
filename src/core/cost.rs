// src/core/cost.rs — Thread-safe cost ledger with budget alerts

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::infra::config::BudgetConfig;
use crate::infra::errors::DelveError;

// ─── Pricing ────────────────────────────────────────────────────────────────

/// USD per million tokens, with the provider it is billed by.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    pub provider: &'static str,
}

impl ModelPricing {
    const fn new(input_per_mtok: f64, output_per_mtok: f64, provider: &'static str) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
            provider,
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_mtok
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_mtok
    }
}

/// Known models. More specific identifiers come first so substring
/// matching picks `gpt-4o-mini` over `gpt-4o`.
const PRICING_TABLE: &[(&str, ModelPricing)] = &[
    // Anthropic
    ("claude-sonnet-4", ModelPricing::new(3.0, 15.0, "anthropic")),
    ("claude-opus-4", ModelPricing::new(15.0, 75.0, "anthropic")),
    ("claude-3-5-sonnet", ModelPricing::new(3.0, 15.0, "anthropic")),
    ("claude-3-5-haiku", ModelPricing::new(0.8, 4.0, "anthropic")),
    ("claude-haiku-3-5", ModelPricing::new(0.8, 4.0, "anthropic")),
    ("claude-3-opus", ModelPricing::new(15.0, 75.0, "anthropic")),
    // OpenAI
    ("gpt-4o-mini", ModelPricing::new(0.15, 0.6, "openai")),
    ("gpt-4o", ModelPricing::new(5.0, 15.0, "openai")),
    ("gpt-4-turbo", ModelPricing::new(10.0, 30.0, "openai")),
    ("gpt-3.5-turbo", ModelPricing::new(0.5, 1.5, "openai")),
    // Google
    ("gemini-2.0-flash", ModelPricing::new(0.0, 0.0, "google")),
    ("gemini-1.5-pro", ModelPricing::new(1.25, 5.0, "google")),
    ("gemini-1.5-flash", ModelPricing::new(0.075, 0.3, "google")),
];

/// Unknown models are billed at a mid-to-high tier rather than for free.
pub const DEFAULT_PRICING: ModelPricing = ModelPricing::new(3.0, 15.0, "unknown");

#[derive(Debug, Clone, PartialEq)]
pub enum PricingMatch {
    Exact,
    Partial(&'static str),
    Default,
}

/// Look up pricing: exact id, then substring either way, then the default.
pub fn resolve_pricing(model: &str) -> (ModelPricing, PricingMatch) {
    if let Some((_, p)) = PRICING_TABLE.iter().find(|(id, _)| *id == model) {
        return (*p, PricingMatch::Exact);
    }
    if !model.is_empty() {
        if let Some((id, p)) = PRICING_TABLE
            .iter()
            .find(|(id, _)| model.contains(id) || id.contains(model))
        {
            return (*p, PricingMatch::Partial(id));
        }
    }
    (DEFAULT_PRICING, PricingMatch::Default)
}

pub fn model_pricing(model: &str) -> ModelPricing {
    resolve_pricing(model).0
}

// ─── Records and alerts ─────────────────────────────────────────────────────

/// One priced call. Never mutated after it is appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertKind {
    /// Spending crossed this fraction of the budget.
    Threshold(f64),
    /// Spending reached the full budget.
    Exceeded,
}

#[derive(Debug, Clone)]
pub struct BudgetAlert {
    pub kind: AlertKind,
    pub spent: f64,
    pub limit: f64,
}

impl std::fmt::Display for BudgetAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            AlertKind::Threshold(t) => write!(
                f,
                "Budget alert: {:.0}% of ${:.2} used (${:.4})",
                t * 100.0,
                self.limit,
                self.spent
            ),
            AlertKind::Exceeded => write!(
                f,
                "Budget exceeded: ${:.4} / ${:.2}",
                self.spent, self.limit
            ),
        }
    }
}

pub type AlertCallback = Box<dyn Fn(&BudgetAlert) + Send + Sync>;

// ─── Snapshots ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CostBreakdownEntry {
    pub name: String,
    pub cost_usd: f64,
    pub cost_pct: f64,
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub budget_limit: f64,
    pub budget_used_pct: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub total_calls: u64,
    pub session_duration_secs: f64,
    pub cost_per_hour: f64,
    pub models_used: Vec<String>,
    pub providers_used: Vec<String>,
}

impl std::fmt::Display for CostSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "${:.4} total ({} calls, {} tokens, {} models)",
            self.total_cost,
            self.total_calls,
            self.total_tokens,
            self.models_used.len()
        )
    }
}

// ─── Tracker ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
struct Aggregate {
    cost: f64,
    calls: u64,
    input_tokens: u64,
    output_tokens: u64,
}

impl Aggregate {
    fn add(&mut self, cost: f64, input: u64, output: u64) {
        self.cost += cost;
        self.calls += 1;
        self.input_tokens += input;
        self.output_tokens += output;
    }
}

struct Ledger {
    total_cost: f64,
    input_tokens: u64,
    output_tokens: u64,
    by_model: HashMap<String, Aggregate>,
    by_provider: HashMap<String, Aggregate>,
    records: Vec<UsageRecord>,
    fired: HashSet<u64>,
    exceeded_fired: bool,
    alerts: Vec<BudgetAlert>,
    session_start: Instant,
}

impl Ledger {
    fn new() -> Self {
        Self {
            total_cost: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            by_model: HashMap::new(),
            by_provider: HashMap::new(),
            records: Vec::new(),
            fired: HashSet::new(),
            exceeded_fired: false,
            alerts: Vec::new(),
            session_start: Instant::now(),
        }
    }
}

/// Shared ledger of token usage and spend. All updates and snapshots go
/// through one lock so totals are never seen half-updated.
pub struct CostTracker {
    budget_limit: f64,
    alert_thresholds: Vec<f64>,
    on_alert: Option<AlertCallback>,
    ledger: Mutex<Ledger>,
}

impl CostTracker {
    pub fn new(budget_limit: f64, alert_thresholds: Vec<f64>) -> Self {
        let mut alert_thresholds = alert_thresholds;
        alert_thresholds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Self {
            budget_limit,
            alert_thresholds,
            on_alert: None,
            ledger: Mutex::new(Ledger::new()),
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.limit_usd, config.alert_thresholds.clone())
    }

    /// Deliver alerts to a callback in addition to the log.
    pub fn with_alert_callback(mut self, callback: AlertCallback) -> Self {
        self.on_alert = Some(callback);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Price and record one call. Returns the cost of this call.
    pub fn add_usage(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let (pricing, matched) = resolve_pricing(model);
        if matched == PricingMatch::Default {
            tracing::warn!(model, "Unknown model pricing, using conservative default");
        }
        let cost = pricing.cost(input_tokens, output_tokens);

        let fired = {
            let mut ledger = self.lock();
            ledger.total_cost += cost;
            ledger.input_tokens += input_tokens;
            ledger.output_tokens += output_tokens;
            ledger
                .by_model
                .entry(model.to_string())
                .or_default()
                .add(cost, input_tokens, output_tokens);
            ledger
                .by_provider
                .entry(pricing.provider.to_string())
                .or_default()
                .add(cost, input_tokens, output_tokens);
            ledger.records.push(UsageRecord {
                timestamp: Utc::now(),
                model: model.to_string(),
                provider: pricing.provider.to_string(),
                input_tokens,
                output_tokens,
                cost,
            });
            self.check_alerts(&mut ledger)
        };

        // Outside the lock so callbacks may read the tracker.
        for alert in &fired {
            tracing::warn!(spent = alert.spent, limit = alert.limit, "{}", alert);
            if let Some(cb) = &self.on_alert {
                cb(alert);
            }
        }

        cost
    }

    fn check_alerts(&self, ledger: &mut Ledger) -> Vec<BudgetAlert> {
        if self.budget_limit <= 0.0 {
            return Vec::new();
        }

        let used = ledger.total_cost / self.budget_limit;
        let mut fired = Vec::new();

        for &threshold in &self.alert_thresholds {
            if used >= threshold && ledger.fired.insert(threshold.to_bits()) {
                fired.push(BudgetAlert {
                    kind: AlertKind::Threshold(threshold),
                    spent: ledger.total_cost,
                    limit: self.budget_limit,
                });
            }
        }

        if used >= 1.0 && !ledger.exceeded_fired {
            ledger.exceeded_fired = true;
            fired.push(BudgetAlert {
                kind: AlertKind::Exceeded,
                spent: ledger.total_cost,
                limit: self.budget_limit,
            });
        }

        ledger.alerts.extend(fired.iter().cloned());
        fired
    }

    pub fn get_cost(&self) -> f64 {
        self.lock().total_cost
    }

    pub fn budget_limit(&self) -> f64 {
        self.budget_limit
    }

    pub fn get_summary(&self) -> CostSummary {
        let ledger = self.lock();
        let elapsed = ledger.session_start.elapsed();
        let hours = elapsed.as_secs_f64() / 3600.0;

        let mut models_used: Vec<String> = ledger.by_model.keys().cloned().collect();
        models_used.sort();
        let mut providers_used: Vec<String> = ledger.by_provider.keys().cloned().collect();
        providers_used.sort();

        CostSummary {
            total_cost: ledger.total_cost,
            budget_limit: self.budget_limit,
            budget_used_pct: if self.budget_limit > 0.0 {
                ledger.total_cost / self.budget_limit * 100.0
            } else {
                0.0
            },
            input_tokens: ledger.input_tokens,
            output_tokens: ledger.output_tokens,
            total_tokens: ledger.input_tokens + ledger.output_tokens,
            total_calls: ledger.records.len() as u64,
            session_duration_secs: elapsed.as_secs_f64(),
            cost_per_hour: if hours > 0.0 {
                ledger.total_cost / hours
            } else {
                0.0
            },
            models_used,
            providers_used,
        }
    }

    pub fn model_breakdown(&self) -> Vec<CostBreakdownEntry> {
        let ledger = self.lock();
        breakdown(&ledger.by_model, ledger.total_cost)
    }

    pub fn provider_breakdown(&self) -> Vec<CostBreakdownEntry> {
        let ledger = self.lock();
        breakdown(&ledger.by_provider, ledger.total_cost)
    }

    pub fn usage_history(&self) -> Vec<UsageRecord> {
        self.lock().records.clone()
    }

    pub fn alerts(&self) -> Vec<BudgetAlert> {
        self.lock().alerts.clone()
    }

    pub fn session_duration(&self) -> Duration {
        self.lock().session_start.elapsed()
    }

    /// Write the usage history as a JSON array.
    pub fn export_usage(&self, path: &Path) -> Result<(), DelveError> {
        let records = self.usage_history();
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Clear the ledger, fired alerts and session clock.
    pub fn reset(&self) {
        *self.lock() = Ledger::new();
    }
}

fn breakdown(map: &HashMap<String, Aggregate>, total: f64) -> Vec<CostBreakdownEntry> {
    let mut entries: Vec<_> = map
        .iter()
        .map(|(name, agg)| CostBreakdownEntry {
            name: name.clone(),
            cost_usd: agg.cost,
            cost_pct: if total > 0.0 {
                agg.cost / total * 100.0
            } else {
                0.0
            },
            calls: agg.calls,
            input_tokens: agg.input_tokens,
            output_tokens: agg.output_tokens,
        })
        .collect();
    entries.sort_by(|a, b| {
        b.cost_usd
            .partial_cmp(&a.cost_usd)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    entries
}
