// src/config/analytics.rs
use std::{env, fs, path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::insight::gemini::DEFAULT_ENDPOINT;
use crate::insight::RetryPolicy;
use crate::merge::MissingCategoryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/analytics.toml";
pub const ENV_CONFIG_PATH: &str = "ANALYTICS_CONFIG_PATH";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";

fn default_window_days() -> u32 {
    30
}
fn default_provider() -> String {
    "gemini".into()
}
fn default_model() -> String {
    "gemini-1.5-pro-latest".into()
}
fn default_api_key() -> String {
    "ENV".into()
}
fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.into()
}
fn default_temperature() -> f32 {
    1.0
}
fn default_call_timeout_secs() -> u64 {
    60
}
fn default_max_attempts() -> u32 {
    3
}
fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Trailing window for new transactions and sessions.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "gemini" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from GEMINI_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub missing_category: MissingCategoryPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Customers analysed at once by the batch driver.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            llm: LlmConfig::default(),
            merge: MergeConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: default_api_key(),
            endpoint: default_endpoint(),
            temperature: default_temperature(),
            call_timeout_secs: default_call_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl AnalyticsConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let mut cfg: AnalyticsConfig = toml::from_str(s).context("invalid analytics config")?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read analytics config at {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    /// `$ANALYTICS_CONFIG_PATH`, then `config/analytics.toml`, then built-in defaults.
    pub fn load_default() -> anyhow::Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            return Self::load_from_file(p);
        }
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            return Self::load_from_file(DEFAULT_CONFIG_PATH);
        }
        info!("no analytics config found; using defaults");
        Ok(Self::default())
    }

    /// Put out-of-range values back to their defaults.
    pub fn sanitize(&mut self) {
        self.llm.provider = self.llm.provider.trim().to_lowercase();
        if self.window_days == 0 {
            warn!("window_days must be positive; using default");
            self.window_days = default_window_days();
        }
        if self.llm.max_attempts == 0 {
            warn!("llm.max_attempts must be positive; using default");
            self.llm.max_attempts = default_max_attempts();
        }
        if self.llm.call_timeout_secs == 0 {
            self.llm.call_timeout_secs = default_call_timeout_secs();
        }
        if !self.llm.temperature.is_finite() || !(0.0..=2.0).contains(&self.llm.temperature) {
            warn!(temperature = self.llm.temperature, "temperature out of range; using default");
            self.llm.temperature = default_temperature();
        }
        if self.batch.concurrency == 0 {
            self.batch.concurrency = default_concurrency();
        }
    }

    /// Default backoffs with the configured attempt budget.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm.max_attempts,
            ..RetryPolicy::default()
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.call_timeout_secs)
    }
}

impl LlmConfig {
    /// The configured key, or `GEMINI_API_KEY` when the key is "ENV".
    pub fn resolve_api_key(&self) -> anyhow::Result<String> {
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            env::var(ENV_GEMINI_API_KEY)
                .map_err(|_| anyhow::anyhow!("Missing {ENV_GEMINI_API_KEY} env var"))
        } else {
            Ok(self.api_key.clone())
        }
    }
}
