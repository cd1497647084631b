// src/provider/mod.rs — Model provider layer

pub mod anthropic;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::token_budget::estimate_tokens;
use crate::infra::errors::DelveError;

/// Core trait that all model providers implement.
///
/// The engine only ever talks to `Arc<dyn ModelProvider>`; concrete backends
/// live in sibling modules.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Concrete model identifier for a model class.
    fn model_id(&self, class: ModelClass) -> String;

    /// Price a call in USD.
    fn cost(&self, class: ModelClass, input_tokens: u32, output_tokens: u32) -> f64;

    /// Build an agent handle. Handles are plain configuration; no network call.
    fn create_agent(&self, class: ModelClass, system: &str, tools: &[&str]) -> AgentHandle {
        AgentHandle::new(class, self.model_id(class), system, tools)
    }

    async fn send_message(&self, agent: &AgentHandle, text: &str) -> Result<Reply, DelveError>;

    /// Invoke a named tool through the agent. The returned payload is untrusted
    /// and unbounded in size.
    async fn call_tool(
        &self,
        agent: &AgentHandle,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolReply, DelveError>;

    fn token_count(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Capability tier of a model. Big models plan, verify and synthesize;
/// small models run searches and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelClass {
    Big,
    Small,
}

impl ModelClass {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Big => "big",
            Self::Small => "small",
        }
    }
}

impl std::fmt::Display for ModelClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A configured agent: model, system prompt and the tools it may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHandle {
    pub id: String,
    pub class: ModelClass,
    pub model: String,
    pub system: String,
    pub tools: Vec<String>,
}

impl AgentHandle {
    pub fn new(class: ModelClass, model: String, system: &str, tools: &[&str]) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            class,
            model,
            system: system.to_string(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default)]
pub struct ToolReply {
    pub output: serde_json::Value,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}
