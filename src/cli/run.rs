// src/cli/run.rs — Default command: research a query

use std::sync::Arc;

use crate::agents::optimizer::RelevanceOptimizer;
use crate::agents::planner::LlmPlanner;
use crate::agents::search::SearchWorker;
use crate::agents::synthesizer::LlmSynthesizer;
use crate::agents::verifier::LlmVerifier;
use crate::core::context::{CancelFlag, EngineContext};
use crate::core::cost::{BudgetAlert, CostTracker};
use crate::core::orchestrator::{Agents, ResearchOrchestrator};
use crate::core::rate_limiter::RateLimiter;
use crate::core::types::{OrchestratorConfig, ResearchReport};
use crate::hooks::HookPipeline;
use crate::infra::config::Config;
use crate::provider::anthropic::AnthropicProvider;
use crate::provider::retry::RetryProvider;
use crate::provider::ModelProvider;

use super::Cli;

/// Fold command-line overrides into the loaded config.
pub fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(n) = cli.iterations {
        config.research.max_iterations = n;
    }
    if let Some(c) = cli.confidence {
        config.research.confidence_threshold = c.clamp(0.0, 1.0);
    }
    if let Some(a) = cli.angles {
        config.research.angles_per_iteration = a;
    }
    if let Some(limit) = cli.cost_limit {
        config.research.cost_limit_usd = limit;
    }
}

/// Wire the LLM-backed collaborators around one provider.
pub fn build_agents(
    provider: Arc<dyn ModelProvider>,
    ctx: &EngineContext,
    config: &OrchestratorConfig,
) -> Agents {
    Agents {
        planner: Arc::new(LlmPlanner::new(provider.clone(), ctx.clone())),
        worker: Arc::new(SearchWorker::new(
            provider.clone(),
            ctx.clone(),
            config.searches_per_angle,
        )),
        gate: Arc::new(LlmVerifier::new(provider.clone(), ctx.clone())),
        optimizer: Arc::new(RelevanceOptimizer::new(
            ctx.hooks.clone(),
            config.recent_context,
            config.context_target_tokens,
        )),
        synthesizer: Arc::new(LlmSynthesizer::new(provider, ctx.clone())),
    }
}

fn engine_context(config: &Config, quiet: bool) -> anyhow::Result<EngineContext> {
    let mut costs = CostTracker::from_config(&config.budget);
    if !quiet {
        costs = costs.with_alert_callback(Box::new(|alert: &BudgetAlert| {
            eprintln!("[budget] {}", alert)
        }));
    }
    Ok(EngineContext::new(
        RateLimiter::from_config(&config.rate_limit)?,
        costs,
        HookPipeline::standard(&config.hooks, &config.context),
    ))
}

/// Run a research session end to end and emit the report.
pub async fn run_research(cli: &Cli, mut config: Config) -> anyhow::Result<()> {
    let query = cli.query_text();
    apply_overrides(&mut config, cli);

    let ctx = engine_context(&config, cli.quiet)?;
    let inner: Arc<dyn ModelProvider> = Arc::new(AnthropicProvider::from_config(&config.provider)?);
    let provider: Arc<dyn ModelProvider> = Arc::new(RetryProvider::new(inner));

    let orch_config = OrchestratorConfig::from_configs(&config.research, &config.context);
    let agents = build_agents(provider.clone(), &ctx, &orch_config);

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("[cancel] stopping after the current iteration...");
                cancel.cancel();
            }
        });
    }

    let mut orchestrator =
        ResearchOrchestrator::new(ctx.clone(), agents, orch_config).with_cancel(cancel);
    if !cli.quiet {
        orchestrator = orchestrator.with_progress(super::progress::terminal_progress());
        eprintln!(
            "[research] {} | models: {} / {}",
            truncate_query(&query, 60),
            config.provider.big_model,
            config.provider.small_model,
        );
    }

    let report = orchestrator.run(&query).await?;
    write_report(cli, &report).await?;

    if let Some(ref path) = cli.usage_out {
        ctx.costs.export_usage(path)?;
    }
    if !cli.quiet {
        print_usage(&ctx);
    }
    Ok(())
}

async fn write_report(cli: &Cli, report: &ResearchReport) -> anyhow::Result<()> {
    match cli.output {
        Some(ref path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, &report.content).await?;
            if !cli.quiet {
                eprintln!("[report] written to {}", path.display());
            }
        }
        None => println!("{}", report.content),
    }
    Ok(())
}

fn print_usage(ctx: &EngineContext) {
    let summary = ctx.costs.get_summary();
    let limiter = ctx.limiter.stats();
    eprintln!(
        "[usage] calls={} tokens={} cost=${:.4} ({:.1}% of budget) waits={} ({:.1}s)",
        summary.total_calls,
        summary.total_tokens,
        summary.total_cost,
        summary.budget_used_pct,
        limiter.wait_count,
        limiter.total_wait.as_secs_f64(),
    );
    for entry in ctx.costs.model_breakdown() {
        eprintln!(
            "  {:<32} ${:.4} ({:.0}%) calls={}",
            entry.name, entry.cost_usd, entry.cost_pct, entry.calls
        );
    }
}

fn truncate_query(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}
