// src/provider/anthropic.rs — Anthropic Messages API provider

use async_trait::async_trait;

use super::{AgentHandle, ModelClass, ModelProvider, Reply, TokenUsage, ToolReply};
use crate::core::cost::model_pricing;
use crate::infra::config::ProviderConfig;
use crate::infra::errors::DelveError;

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;
const TEMPERATURE: f32 = 0.3;

pub struct AnthropicProvider {
    api_key: String,
    big_model: String,
    small_model: String,
    api_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String, big_model: String, small_model: String) -> Self {
        Self {
            api_key,
            big_model,
            small_model,
            api_url: DEFAULT_API_URL.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, reading the API key from the configured env var.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, DelveError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(DelveError::NoProvider)?;

        let mut provider = Self::new(
            api_key,
            config.big_model.clone(),
            config.small_model.clone(),
        );
        if let Some(url) = &config.base_url {
            provider.api_url = url.clone();
        }
        Ok(provider)
    }

    fn build_request_body(&self, agent: &AgentHandle, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": agent.model,
            "system": agent.system,
            "messages": [{ "role": "user", "content": text }],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        })
    }

    async fn post(&self, body: &serde_json::Value) -> Result<serde_json::Value, DelveError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| DelveError::Provider {
                provider: "anthropic".into(),
                message: e.to_string(),
                retriable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5);
            return Err(DelveError::RateLimited {
                provider: "anthropic".into(),
                retry_after_ms: retry_after * 1000,
            });
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(DelveError::Provider {
                provider: "anthropic".into(),
                message: format!("HTTP {}: {}", status, error_body),
                retriable: status.is_server_error(),
            });
        }

        response.json().await.map_err(|e| DelveError::Provider {
            provider: "anthropic".into(),
            message: format!("Failed to parse response: {}", e),
            retriable: false,
        })
    }
}

fn parse_usage(resp: &serde_json::Value) -> TokenUsage {
    TokenUsage {
        input_tokens: resp["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: resp["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
    }
}

fn content_blocks(resp: &serde_json::Value) -> &[serde_json::Value] {
    resp["content"].as_array().map(Vec::as_slice).unwrap_or(&[])
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn model_id(&self, class: ModelClass) -> String {
        match class {
            ModelClass::Big => self.big_model.clone(),
            ModelClass::Small => self.small_model.clone(),
        }
    }

    fn cost(&self, class: ModelClass, input_tokens: u32, output_tokens: u32) -> f64 {
        let pricing = model_pricing(&self.model_id(class));
        pricing.cost(input_tokens as u64, output_tokens as u64)
    }

    async fn send_message(&self, agent: &AgentHandle, text: &str) -> Result<Reply, DelveError> {
        let body = self.build_request_body(agent, text);
        let resp = self.post(&body).await?;

        let text = content_blocks(&resp)
            .iter()
            .filter(|c| c["type"] == "text")
            .filter_map(|c| c["text"].as_str())
            .collect::<Vec<_>>()
            .join("");

        Ok(Reply {
            text,
            usage: parse_usage(&resp),
        })
    }

    async fn call_tool(
        &self,
        agent: &AgentHandle,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolReply, DelveError> {
        if !agent.has_tool(tool) {
            return Err(DelveError::Tool {
                tool: tool.into(),
                message: "not available for this agent".into(),
            });
        }

        let mut body = self.build_request_body(
            agent,
            &format!("Execute tool: {} with arguments: {}", tool, arguments),
        );
        body["tools"] = serde_json::json!([{
            "name": tool,
            "description": format!("Tool: {}", tool),
            "input_schema": { "type": "object", "additionalProperties": true },
        }]);
        body["tool_choice"] = serde_json::json!({ "type": "tool", "name": tool });

        let resp = self.post(&body).await?;

        let output = content_blocks(&resp)
            .iter()
            .find(|c| c["type"] == "tool_use")
            .map(|c| c["input"].clone())
            .ok_or_else(|| DelveError::Tool {
                tool: tool.into(),
                message: "No tool use in response".into(),
            })?;

        Ok(ToolReply {
            output,
            usage: parse_usage(&resp),
        })
    }
}
