// src/insight/client.rs
//! Retrying client around a [`CompletionProvider`].
//!
//! Bounded attempts with a fixed backoff per failure kind. Each call is also capped by
//! its own timeout, independent of the backoff intervals. Exhausting the budget is a
//! result, not an error: callers treat it as "no insights this cycle".

use std::time::Duration;

use metrics::counter;
use tracing::{info, warn};

use super::provider::{CompletionRequest, DynProvider, FailureKind, ProviderError};
use super::{parse_report, ChangeReport};
use crate::metrics::describe_metrics;

/// `error` value of an unparseable outcome.
pub const PARSE_ERROR_MESSAGE: &str = "could not parse response";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout_backoff: Duration,
    pub rate_limit_backoff: Duration,
    pub malformed_backoff: Duration,
    pub other_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_backoff: Duration::from_secs(1),
            rate_limit_backoff: Duration::from_secs(10),
            malformed_backoff: Duration::from_secs(1),
            other_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            timeout_backoff: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
            malformed_backoff: Duration::ZERO,
            other_backoff: Duration::ZERO,
        }
    }

    pub fn backoff_for(&self, kind: FailureKind) -> Duration {
        match kind {
            FailureKind::Timeout => self.timeout_backoff,
            FailureKind::RateLimited => self.rate_limit_backoff,
            FailureKind::MalformedOutput => self.malformed_backoff,
            FailureKind::SafetyBlocked | FailureKind::Other => self.other_backoff,
        }
    }
}

/// Result of a retried completion. `T` is whatever the response parser produces; the
/// change report by default.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome<T = ChangeReport> {
    Report(T),
    /// The final attempt returned text the parser rejected.
    Unparseable { error: String, raw_response: String },
    /// Every attempt failed at the provider level.
    Exhausted {
        attempts: u32,
        last_error: ProviderError,
    },
}

impl<T> AnalysisOutcome<T> {
    pub fn report(&self) -> Option<&T> {
        match self {
            AnalysisOutcome::Report(r) => Some(r),
            _ => None,
        }
    }
}

enum Failure {
    Provider(ProviderError),
    Parse { detail: String, raw_response: String },
}

impl Failure {
    fn kind(&self) -> FailureKind {
        match self {
            Failure::Provider(e) => e.kind(),
            Failure::Parse { .. } => FailureKind::MalformedOutput,
        }
    }
}

pub struct InsightClient {
    provider: DynProvider,
    policy: RetryPolicy,
    call_timeout: Duration,
    temperature: f32,
}

impl InsightClient {
    pub fn new(provider: DynProvider, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            call_timeout: Duration::from_secs(60),
            temperature: 1.0,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Ask for a change report.
    pub async fn analyze(&self, prompt: &str) -> AnalysisOutcome {
        self.complete_json(prompt, parse_report).await
    }

    /// Ask for a JSON body and parse it with `parse`, retrying provider failures and
    /// unparseable replies alike.
    pub async fn complete_json<T, F>(&self, prompt: &str, parse: F) -> AnalysisOutcome<T>
    where
        F: Fn(&str) -> Result<T, serde_json::Error>,
    {
        describe_metrics();
        let request = CompletionRequest {
            prompt: prompt.to_string(),
            json_mode: true,
            temperature: self.temperature,
        };
        let attempts = self.policy.max_attempts.max(1);
        let mut last = Failure::Provider(ProviderError::Other("no attempt made".into()));

        for attempt in 1..=attempts {
            let failure = match self.attempt(&request, &parse).await {
                Ok(report) => {
                    counter!("analytics_llm_attempts_total", "result" => "ok").increment(1);
                    return AnalysisOutcome::Report(report);
                }
                Err(f) => f,
            };
            let kind = failure.kind();
            counter!("analytics_llm_attempts_total", "result" => kind.as_str()).increment(1);

            let backoff = self.policy.backoff_for(kind);
            match &failure {
                Failure::Provider(e) if kind == FailureKind::Other => warn!(
                    provider = self.provider.name(),
                    attempt,
                    error = %e,
                    "completion failed; retrying in {:?}",
                    backoff
                ),
                Failure::Provider(e) => info!(
                    provider = self.provider.name(),
                    attempt,
                    kind = kind.as_str(),
                    error = %e,
                    "completion failed; retrying in {:?}",
                    backoff
                ),
                Failure::Parse { detail, .. } => info!(
                    provider = self.provider.name(),
                    attempt,
                    error = %detail,
                    "response did not parse; retrying in {:?}",
                    backoff
                ),
            }

            if attempt < attempts && !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
            last = failure;
        }

        warn!(
            provider = self.provider.name(),
            attempts, "failed to obtain a usable response after all attempts"
        );
        match last {
            Failure::Parse { raw_response, .. } => AnalysisOutcome::Unparseable {
                error: PARSE_ERROR_MESSAGE.to_string(),
                raw_response,
            },
            Failure::Provider(last_error) => AnalysisOutcome::Exhausted {
                attempts,
                last_error,
            },
        }
    }

    async fn attempt<T, F>(&self, request: &CompletionRequest, parse: &F) -> Result<T, Failure>
    where
        F: Fn(&str) -> Result<T, serde_json::Error>,
    {
        let text = match tokio::time::timeout(self.call_timeout, self.provider.complete(request))
            .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(Failure::Provider(e)),
            Err(_elapsed) => return Err(Failure::Provider(ProviderError::Timeout)),
        };
        match parse(&text) {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(Failure::Parse {
                detail: e.to_string(),
                raw_response: text,
            }),
        }
    }
}
