// src/insight/gemini.rs
//! Gemini `generateContent` provider. Requires an API key (config or `GEMINI_API_KEY`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::provider::{CompletionProvider, CompletionRequest, ProviderError};
use crate::config::LlmConfig;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("adaptive-insights/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(cfg: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = cfg.resolve_api_key()?;
        Self::new(
            api_key,
            cfg.model.clone(),
            cfg.endpoint.clone(),
            Duration::from_secs(cfg.call_timeout_secs),
        )
    }

    fn url(&self) -> String {
        let model = self.model.trim_start_matches("models/");
        format!("{}/v1beta/models/{model}:generateContent", self.endpoint)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Req<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Resp {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<RespContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RespContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}

#[derive(Debug, Deserialize)]
struct RespPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

fn build_request(request: &CompletionRequest) -> Req<'_> {
    Req {
        contents: vec![Content {
            role: "user",
            parts: vec![Part {
                text: &request.prompt,
            }],
        }],
        generation_config: GenerationConfig {
            temperature: request.temperature,
            response_mime_type: request.json_mode.then_some("application/json"),
        },
        safety_settings: vec![SafetySetting {
            category: "HARM_CATEGORY_DANGEROUS_CONTENT",
            threshold: "BLOCK_NONE",
        }],
    }
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(snippet),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout,
        s => ProviderError::Other(format!("HTTP {s}: {snippet}")),
    }
}

/// Pull the completion text out of a decoded response body.
fn extract_text(resp: Resp) -> Result<String, ProviderError> {
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::SafetyBlocked(reason));
    }
    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Other("response has no candidates".into()))?;
    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(ProviderError::SafetyBlocked("finish reason SAFETY".into()));
    }
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ProviderError::Malformed("empty completion text".into()));
    }
    Ok(text)
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::Other("missing Gemini API key".into()));
        }
        let resp = self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Other(e.to_string())
                }
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Other(e.to_string())
            }
        })?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        let decoded: Resp =
            serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
        extract_text(decoded)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
