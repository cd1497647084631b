// src/agents/planner.rs — Angle planning

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::Planner;
use crate::core::context::EngineContext;
use crate::core::decode::decode;
use crate::core::executor::AgentExecutor;
use crate::infra::errors::DelveError;
use crate::provider::{ModelClass, ModelProvider};

const PLANNER_SYSTEM_PROMPT: &str = "You are a research planner. You break a research \
query into distinct, complementary angles that can be investigated in parallel. \
Prefer specific angles over generic ones and never repeat an angle that was already researched.";

const FALLBACK_SUFFIXES: [&str; 5] = [
    "Overview and fundamentals",
    "Current state and trends",
    "Technical details and implementation",
    "Applications and use cases",
    "Future outlook and predictions",
];

/// Fixed angle set used when planning fails.
pub fn fallback_angles(query: &str, count: usize) -> Vec<String> {
    FALLBACK_SUFFIXES
        .iter()
        .take(count)
        .map(|s| format!("{} - {}", query, s))
        .collect()
}

/// Angles match by trimmed, case-insensitive name. With `similarity` set,
/// names whose normalized Levenshtein similarity reaches it also match.
fn same_angle(a: &str, b: &str, similarity: Option<f64>) -> bool {
    let (a, b) = (a.trim().to_lowercase(), b.trim().to_lowercase());
    a == b || similarity.is_some_and(|t| strsim::normalized_levenshtein(&a, &b) >= t)
}

/// Drop blank candidates, repeats within the list, and anything already covered.
pub fn exclude_covered(
    candidates: Vec<String>,
    covered: &[String],
    similarity: Option<f64>,
) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for candidate in candidates {
        let candidate = candidate.trim().to_string();
        if candidate.is_empty() {
            continue;
        }
        if covered.iter().chain(kept.iter()).any(|c| same_angle(c, &candidate, similarity)) {
            tracing::debug!(angle = %candidate, "Skipping already covered angle");
            continue;
        }
        kept.push(candidate);
    }
    kept
}

/// Asks the big model for angles, expecting a JSON array of strings.
pub struct LlmPlanner {
    provider: Arc<dyn ModelProvider>,
    executor: AgentExecutor,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn ModelProvider>, ctx: EngineContext) -> Self {
        Self {
            provider,
            executor: AgentExecutor::new(ctx),
        }
    }

    fn build_prompt(query: &str, covered: &[String], count: usize) -> String {
        let mut prompt = format!(
            "Generate {count} distinct research angles for this query.\n\nQUERY: {query}\n"
        );
        if !covered.is_empty() {
            prompt.push_str("\nEXISTING RESEARCH ANGLES (avoid duplication):\n");
            for angle in covered {
                prompt.push_str(&format!("- {}\n", angle));
            }
            prompt.push_str("\nFocus on gaps and complementary perspectives.\n");
        }
        prompt.push_str(
            "\nRequirements:\n\
             1. Each angle covers a unique perspective\n\
             2. Angles are specific and focused\n\
             3. Angles complement each other\n\
             4. No overlap with existing research\n\n\
             Output a JSON array of strings only:\n\
             [\"angle 1\", \"angle 2\", ...]\n",
        );
        prompt
    }
}

/// Accepts `["a", "b"]` or `{"angles": ["a", "b"]}`.
pub fn parse_angles(text: &str) -> Result<Vec<String>, DelveError> {
    let value: Value = decode(text)?.value;
    let list = match &value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .get("angles")
            .and_then(Value::as_array)
            .ok_or_else(|| DelveError::Parse("planner output has no angle list".into()))?,
        _ => return Err(DelveError::Parse("planner output is not a list".into())),
    };
    let angles: Vec<String> = list
        .iter()
        .filter_map(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if angles.is_empty() {
        return Err(DelveError::Parse("planner returned no angles".into()));
    }
    Ok(angles)
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(
        &self,
        query: &str,
        covered: &[String],
        count: usize,
    ) -> Result<Vec<String>, DelveError> {
        let agent = self
            .provider
            .create_agent(ModelClass::Big, PLANNER_SYSTEM_PROMPT, &[]);
        let prompt = Self::build_prompt(query, covered, count);
        let reply = self
            .executor
            .send_message(self.provider.as_ref(), &agent, &prompt)
            .await?;

        let mut angles = parse_angles(&reply.text)?;
        angles.truncate(count);
        Ok(angles)
    }
}
