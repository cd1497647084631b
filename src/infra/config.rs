// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub research: ResearchConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub hooks: HooksConfig,

    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub max_iterations: u8,
    pub confidence_threshold: f32,
    pub angles_per_iteration: usize,
    pub searches_per_angle: usize,
    pub cost_limit_usd: f64,
    /// Opt-in fuzzy angle matching (normalized Levenshtein, 0..=1).
    /// Unset means angles match by name only.
    pub angle_similarity: Option<f64>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            confidence_threshold: 0.85,
            angles_per_iteration: 5,
            searches_per_angle: 5,
            cost_limit_usd: 1.0,
            angle_similarity: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub limit_usd: f64,
    /// Fractions of `limit_usd` that raise a one-shot alert.
    pub alert_thresholds: Vec<f64>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            limit_usd: 10.0,
            alert_thresholds: vec![0.5, 0.75, 0.9],
        }
    }
}

/// Request ceilings per sliding window. `None` disables a window;
/// `Some(0)` is rejected when the limiter is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: Option<i64>,
    pub requests_per_hour: Option<i64>,
    pub requests_per_day: Option<i64>,
    pub tokens_per_minute: Option<i64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: Some(50),
            requests_per_hour: None,
            requests_per_day: Some(1000),
            tokens_per_minute: Some(40_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_tokens: usize,
    pub target_tokens: usize,
    /// Most recent entries always retained verbatim by the optimizer.
    pub recent_messages: usize,
    /// Entries older than the last `compress_after` are eligible for compression.
    pub compress_after: usize,
    pub compress_min_chars: usize,
    pub max_messages: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 150_000,
            target_tokens: 100_000,
            recent_messages: 6,
            compress_after: 10,
            compress_min_chars: 500,
            max_messages: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub validation: bool,
    pub compression: bool,
    pub max_result_chars: usize,
    pub compress_min_chars: usize,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            validation: true,
            compression: true,
            max_result_chars: 2000,
            compress_min_chars: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub big_model: String,
    pub small_model: String,
    pub api_key_env: String,
    pub base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            big_model: "claude-sonnet-4-20250514".into(),
            small_model: "claude-3-5-haiku-20241022".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            base_url: None,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
