// src/insight/provider.rs
//! Text-completion provider abstraction and factory.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::LlmConfig;
use crate::insight::gemini::GeminiProvider;

/// Failure classes the retry policy distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Timeout,
    RateLimited,
    MalformedOutput,
    SafetyBlocked,
    Other,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::MalformedOutput => "malformed",
            FailureKind::SafetyBlocked => "safety_blocked",
            FailureKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("completion deadline exceeded")]
    Timeout,
    #[error("rate limited / resource exhausted: {0}")]
    RateLimited(String),
    #[error("blocked by safety filters: {0}")]
    SafetyBlocked(String),
    #[error("malformed provider output: {0}")]
    Malformed(String),
    #[error("provider failure: {0}")]
    Other(String),
}

impl ProviderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderError::Timeout => FailureKind::Timeout,
            ProviderError::RateLimited(_) => FailureKind::RateLimited,
            ProviderError::SafetyBlocked(_) => FailureKind::SafetyBlocked,
            ProviderError::Malformed(_) => FailureKind::MalformedOutput,
            ProviderError::Other(_) => FailureKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Ask the provider for a JSON-only body.
    pub json_mode: bool,
    pub temperature: f32,
}

/// Low-level provider: one remote call, no retries.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
    fn name(&self) -> &'static str;
}

pub type DynProvider = Arc<dyn CompletionProvider>;

/// Returns the same body for every request; used for local runs and `AI_TEST_MODE=mock`.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    pub response: String,
}

impl StaticProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }

    /// A provider that always reports "no change".
    pub fn no_changes() -> Self {
        Self::new(
            r#"{"profile_change_summary":{"total_changes_detected":0,"change_significance":"minor","changed_metrics":[]},"overall_profile_shift":{"primary_direction":"neutral","key_observations":[]}}"#,
        )
    }
}

#[async_trait]
impl CompletionProvider for StaticProvider {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, ProviderError> {
        Ok(self.response.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Factory: build a provider according to config and environment.
///
/// * `AI_TEST_MODE=mock` or `provider = "mock"` -> [`StaticProvider::no_changes`]
/// * `provider = "gemini"` -> [`GeminiProvider`] (API key resolved from config/env)
pub fn build_provider(cfg: &LlmConfig) -> anyhow::Result<DynProvider> {
    let mock_env = std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false);
    if mock_env || cfg.provider == "mock" {
        return Ok(Arc::new(StaticProvider::no_changes()));
    }
    match cfg.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiProvider::from_config(cfg)?)),
        other => anyhow::bail!("Unsupported LLM provider in config: {other}"),
    }
}
