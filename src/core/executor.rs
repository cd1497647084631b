// src/core/executor.rs — Concurrent fan-out with failure isolation
//
// `spawn` runs one batch of independent tasks and joins them all. The guarded
// call helpers are the unit of work a task performs: pre-tool validation,
// limiter admission, the provider call, usage accounting, post-search hooks.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::join_all;
use futures::FutureExt;
use serde_json::{json, Value};

use super::context::EngineContext;
use super::types::TaskOutcome;
use crate::hooks::{HookContext, HookEvent};
use crate::infra::errors::DelveError;
use crate::provider::{AgentHandle, ModelProvider, Reply, ToolReply};

pub struct AgentExecutor {
    ctx: EngineContext,
}

impl AgentExecutor {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Run every task concurrently and wait for all of them.
    ///
    /// One outcome per task, in input order. Errors and panics are captured
    /// per task and never cancel siblings.
    pub async fn spawn<T, Fut, I>(&self, tasks: I) -> Vec<TaskOutcome<T>>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<T, DelveError>>,
    {
        let guarded = tasks
            .into_iter()
            .map(|task| AssertUnwindSafe(task).catch_unwind());

        join_all(guarded)
            .await
            .into_iter()
            .map(|result| match result {
                Ok(Ok(value)) => TaskOutcome::Success(value),
                Ok(Err(e)) => TaskOutcome::Failure(e),
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    tracing::error!("Worker task panicked: {}", message);
                    TaskOutcome::Failure(DelveError::Other(anyhow::anyhow!(
                        "task panicked: {}",
                        message
                    )))
                }
            })
            .collect()
    }

    /// Call a tool through the full guard sequence.
    ///
    /// A `pre_tool` abort rejects the call before any limiter slot is used.
    /// The returned output is the `post_search` chain's final payload.
    pub async fn call_tool(
        &self,
        provider: &dyn ModelProvider,
        agent: &AgentHandle,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolReply, DelveError> {
        let mut pre = HookContext::for_tool(HookEvent::PreTool, tool);
        let checked = self.ctx.hooks.execute(
            HookEvent::PreTool,
            json!({"tool": tool, "arguments": arguments.clone()}),
            &mut pre,
        )?;
        let arguments = checked.get("arguments").cloned().unwrap_or(arguments);

        let estimate = provider.token_count(&arguments.to_string()) as u64;
        self.ctx.limiter.acquire(estimate).await;

        let reply = provider.call_tool(agent, tool, arguments).await?;
        self.ctx.record_usage(&agent.model, &reply.usage);

        let mut post = HookContext::for_tool(HookEvent::PostSearch, tool);
        let output = self
            .ctx
            .hooks
            .execute(HookEvent::PostSearch, reply.output, &mut post)?;

        Ok(ToolReply {
            output,
            usage: reply.usage,
        })
    }

    /// Send a message under the limiter and record its usage.
    pub async fn send_message(
        &self,
        provider: &dyn ModelProvider,
        agent: &AgentHandle,
        text: &str,
    ) -> Result<Reply, DelveError> {
        let estimate = provider.token_count(&agent.system) + provider.token_count(text);
        self.ctx.limiter.acquire(estimate as u64).await;

        let reply = provider.send_message(agent, text).await?;
        self.ctx.record_usage(&agent.model, &reply.usage);
        Ok(reply)
    }
}

/// True when a non-empty batch produced no successes.
pub fn all_failed<T>(outcomes: &[TaskOutcome<T>]) -> bool {
    !outcomes.is_empty() && outcomes.iter().all(|o| !o.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cost::CostTracker;
    use crate::core::rate_limiter::RateLimiter;
    use crate::hooks::{HookOutcome, HookPipeline};
    use crate::provider::{ModelClass, TokenUsage};
    use async_trait::async_trait;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoProvider {
        tool_calls: AtomicU32,
    }

    #[async_trait]
    impl ModelProvider for EchoProvider {
        fn id(&self) -> &str {
            "echo"
        }

        fn model_id(&self, _class: ModelClass) -> String {
            "claude-3-5-haiku-20241022".into()
        }

        fn cost(&self, _class: ModelClass, _input: u32, _output: u32) -> f64 {
            0.0
        }

        async fn send_message(&self, _agent: &AgentHandle, text: &str) -> Result<Reply, DelveError> {
            Ok(Reply {
                text: text.to_uppercase(),
                usage: TokenUsage::new(100, 10),
            })
        }

        async fn call_tool(
            &self,
            _agent: &AgentHandle,
            _tool: &str,
            arguments: Value,
        ) -> Result<ToolReply, DelveError> {
            self.tool_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolReply {
                output: json!([
                    {"url": "https://a.example", "echo": arguments},
                    {"url": "https://a.example"},
                ]),
                usage: TokenUsage::new(1_000_000, 0),
            })
        }
    }

    fn provider() -> EchoProvider {
        EchoProvider {
            tool_calls: AtomicU32::new(0),
        }
    }

    fn executor(hooks: HookPipeline) -> AgentExecutor {
        AgentExecutor::new(EngineContext::new(
            RateLimiter::unlimited(),
            CostTracker::new(0.0, vec![]),
            hooks,
        ))
    }

    #[tokio::test]
    async fn test_spawn_isolates_failures() {
        let exec = executor(HookPipeline::new());
        let tasks: Vec<BoxFuture<'static, Result<u32, DelveError>>> = vec![
            async { Ok::<u32, DelveError>(1) }.boxed(),
            async { Err::<u32, DelveError>(DelveError::Parse("bad".into())) }.boxed(),
            async { Ok::<u32, DelveError>(3) }.boxed(),
        ];
        let outcomes = exec.spawn(tasks).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert!(!outcomes[1].is_success());
        assert!(outcomes[2].is_success());
        assert!(!all_failed(&outcomes));
    }

    async fn explode() -> Result<u32, DelveError> {
        panic!("worker blew up")
    }

    #[tokio::test]
    async fn test_spawn_captures_panic() {
        let exec = executor(HookPipeline::new());
        let tasks: Vec<BoxFuture<'static, Result<u32, DelveError>>> = vec![
            explode().boxed(),
            async { Ok::<u32, DelveError>(2) }.boxed(),
        ];
        let outcomes = exec.spawn(tasks).await;
        match &outcomes[0] {
            TaskOutcome::Failure(e) => assert!(e.to_string().contains("worker blew up")),
            TaskOutcome::Success(_) => panic!("expected failure"),
        }
        assert!(outcomes[1].is_success());
    }

    #[tokio::test]
    async fn test_spawn_empty_batch() {
        let exec = executor(HookPipeline::new());
        let tasks: Vec<BoxFuture<'static, Result<u32, DelveError>>> = vec![];
        let outcomes = exec.spawn(tasks).await;
        assert!(outcomes.is_empty());
        assert!(!all_failed(&outcomes));
    }

    #[test]
    fn test_all_failed() {
        let outcomes: Vec<TaskOutcome<u32>> = vec![
            TaskOutcome::Failure(DelveError::NoProvider),
            TaskOutcome::Failure(DelveError::NoProvider),
        ];
        assert!(all_failed(&outcomes));
    }

    #[tokio::test]
    async fn test_call_tool_runs_post_search_and_records_usage() {
        let exec = executor(HookPipeline::standard(
            &Default::default(),
            &Default::default(),
        ));
        let p = provider();
        let agent = p.create_agent(ModelClass::Small, "sys", &["search_tavily"]);
        let reply = exec
            .call_tool(&p, &agent, "search_tavily", json!({"query": "rust async"}))
            .await
            .unwrap();

        // dedup_urls dropped the repeated URL
        assert_eq!(reply.output.as_array().unwrap().len(), 1);
        assert!((exec.context().costs.get_cost() - 0.8).abs() < 1e-9);
        assert_eq!(exec.context().limiter.stats().total_requests, 1);
    }

    #[tokio::test]
    async fn test_pre_tool_abort_skips_call_and_limiter() {
        let hooks = HookPipeline::new();
        hooks.register_fn(HookEvent::PreTool, "deny", 10, |_, _| {
            Ok(HookOutcome::Abort("blocked".into()))
        });
        let exec = executor(hooks);
        let p = provider();
        let agent = p.create_agent(ModelClass::Small, "sys", &["search_tavily"]);

        let err = exec
            .call_tool(&p, &agent, "search_tavily", json!({"query": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, DelveError::Validation(_)));
        assert_eq!(p.tool_calls.load(Ordering::SeqCst), 0);
        assert_eq!(exec.context().limiter.stats().total_requests, 0);
    }

    #[tokio::test]
    async fn test_pre_tool_can_rewrite_arguments() {
        let hooks = HookPipeline::new();
        hooks.register_fn(HookEvent::PreTool, "rewrite", 10, |p, _| {
            let mut p = p.clone();
            p["arguments"]["max_results"] = json!(3);
            Ok(HookOutcome::replace(p))
        });
        let exec = executor(hooks);
        let p = provider();
        let agent = p.create_agent(ModelClass::Small, "sys", &["search_exa"]);
        let reply = exec
            .call_tool(&p, &agent, "search_exa", json!({"query": "x"}))
            .await
            .unwrap();
        assert_eq!(reply.output[0]["echo"]["max_results"], 3);
    }

    #[tokio::test]
    async fn test_send_message_records_usage() {
        let exec = executor(HookPipeline::new());
        let p = provider();
        let agent = p.create_agent(ModelClass::Small, "sys", &[]);
        let reply = exec.send_message(&p, &agent, "hello").await.unwrap();
        assert_eq!(reply.text, "HELLO");
        assert_eq!(exec.context().costs.get_summary().total_calls, 1);
    }
}
