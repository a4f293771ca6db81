//! # Analytics Engine
//! Per-customer orchestration:
//! `FETCH_NEW -> FETCH_HISTORY -> SUMMARIZE -> BUILD_CONTEXT -> LLM_ANALYZE -> MERGE -> PERSIST`.
//!
//! One call is one cycle for one customer. A storage failure at any stage is logged with
//! the stage and customer id and returned; nothing is written unless PERSIST completes.
//! Isolating failures across customers is the batch driver's job (see [`crate::batch`]).
//!
//! [`AnalyticsEngine::generate_initial`] runs the same stages over a customer's whole
//! record to produce a first profile.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::AnalyticsConfig;
use crate::context;
use crate::error::AnalyticsError;
use crate::fetcher::DataFetcher;
use crate::initial::{self, InitialInsights};
use crate::insight::{AnalysisOutcome, DynProvider, InsightClient, ProviderError};
use crate::locks::CustomerLocks;
use crate::merge::{merge, MergeOutcome, MissingCategoryPolicy, NoUpdateReason, ProfileWriter};
use crate::metrics::describe_metrics;
use crate::model::{Category, CustomerInsightProfile};
use crate::store::{DynStore, StoreError};
use crate::summarize::summarize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    FetchNew,
    FetchHistory,
    Summarize,
    BuildContext,
    LlmAnalyze,
    Merge,
    Persist,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::FetchNew => "FETCH_NEW",
            Stage::FetchHistory => "FETCH_HISTORY",
            Stage::Summarize => "SUMMARIZE",
            Stage::BuildContext => "BUILD_CONTEXT",
            Stage::LlmAnalyze => "LLM_ANALYZE",
            Stage::Merge => "MERGE",
            Stage::Persist => "PERSIST",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the model produced nothing usable this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum NoInsightsReason {
    Exhausted {
        attempts: u32,
        last_error: ProviderError,
    },
    Unparseable {
        error: String,
        raw_response: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The stored profile was overwritten with `profile`.
    Updated {
        profile: CustomerInsightProfile,
        applied: Vec<Category>,
    },
    /// Nothing to write.
    Unchanged(NoUpdateReason),
    /// The model call degraded; nothing written.
    NoInsights(NoInsightsReason),
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Updated { .. } => "updated",
            CycleOutcome::Unchanged(_) => "unchanged",
            CycleOutcome::NoInsights(_) => "no_insights",
        }
    }

    pub fn applied(&self) -> &[Category] {
        match self {
            CycleOutcome::Updated { applied, .. } => applied,
            _ => &[],
        }
    }
}

pub struct AnalyticsEngine {
    store: DynStore,
    fetcher: DataFetcher,
    writer: ProfileWriter,
    insights: InsightClient,
    policy: MissingCategoryPolicy,
    locks: CustomerLocks,
}

impl AnalyticsEngine {
    pub fn new(store: DynStore, insights: InsightClient) -> Self {
        Self {
            fetcher: DataFetcher::new(store.clone()),
            writer: ProfileWriter::new(store.clone()),
            store,
            insights,
            policy: MissingCategoryPolicy::default(),
            locks: CustomerLocks::new(),
        }
    }

    pub fn from_config(store: DynStore, provider: DynProvider, cfg: &AnalyticsConfig) -> Self {
        let insights = InsightClient::new(provider, cfg.retry_policy())
            .with_call_timeout(cfg.call_timeout())
            .with_temperature(cfg.llm.temperature);
        Self::new(store, insights).with_missing_category_policy(cfg.merge.missing_category)
    }

    pub fn with_missing_category_policy(mut self, policy: MissingCategoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn missing_category_policy(&self) -> MissingCategoryPolicy {
        self.policy
    }

    /// Run one analysis cycle for `customer_id` over the trailing `window_days` days.
    pub async fn run_analysis(
        &self,
        customer_id: &str,
        window_days: i64,
    ) -> Result<CycleOutcome, AnalyticsError> {
        self.run_analysis_at(Utc::now(), customer_id, window_days)
            .await
    }

    /// [`run_analysis`](Self::run_analysis) with an explicit clock.
    pub async fn run_analysis_at(
        &self,
        now: DateTime<Utc>,
        customer_id: &str,
        window_days: i64,
    ) -> Result<CycleOutcome, AnalyticsError> {
        let customer_id = validate_customer_id(customer_id)?;
        let window = validate_window(window_days)?;
        describe_metrics();

        let _exclusive = self.locks.acquire(customer_id).await;
        let started = Instant::now();
        let result = self.cycle(now, customer_id, window).await;

        histogram!("analytics_cycle_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        let outcome = match &result {
            Ok(o) => o.label(),
            Err(_) => "failed",
        };
        counter!("analytics_cycles_total", "outcome" => outcome).increment(1);
        result
    }

    async fn cycle(
        &self,
        now: DateTime<Utc>,
        customer_id: &str,
        window_days: u32,
    ) -> Result<CycleOutcome, AnalyticsError> {
        let new_data = self
            .fetcher
            .fetch_new_data_at(now, customer_id, window_days)
            .await
            .map_err(|e| failed(Stage::FetchNew, customer_id, e))?;

        let historical = self
            .fetcher
            .fetch_historical_context(customer_id)
            .await
            .map_err(|e| failed(Stage::FetchHistory, customer_id, e))?;
        let current = self
            .fetcher
            .fetch_current_profile(customer_id)
            .await
            .map_err(|e| failed(Stage::FetchHistory, customer_id, e))?;

        let summary = summarize(&new_data);
        if summary.is_empty() {
            info!(customer_id, window_days, "no records in window; summary is empty");
        }

        let prompt = context::build(&historical, &summary);

        let report = match take_report(customer_id, self.insights.analyze(&prompt).await) {
            Ok(report) => report,
            Err(reason) => return Ok(CycleOutcome::NoInsights(reason)),
        };

        match merge(&current, &report, self.policy) {
            MergeOutcome::NoUpdate(reason) => {
                info!(customer_id, ?reason, "profile unchanged; nothing written");
                Ok(CycleOutcome::Unchanged(reason))
            }
            MergeOutcome::Updated { profile, applied } => {
                self.persist(now, customer_id, &profile, &applied).await?;
                info!(customer_id, applied = ?applied, "customer insight profile overwritten");
                Ok(CycleOutcome::Updated { profile, applied })
            }
        }
    }

    /// Build and store a first profile for `customer_id` from all of its records.
    ///
    /// The stored profile is replaced by the categories the model answered usably, and
    /// each of them gets a history entry. Nothing is written when none is usable.
    pub async fn generate_initial(&self, customer_id: &str) -> Result<CycleOutcome, AnalyticsError> {
        self.generate_initial_at(Utc::now(), customer_id).await
    }

    /// [`generate_initial`](Self::generate_initial) with an explicit clock.
    pub async fn generate_initial_at(
        &self,
        now: DateTime<Utc>,
        customer_id: &str,
    ) -> Result<CycleOutcome, AnalyticsError> {
        let customer_id = validate_customer_id(customer_id)?;
        describe_metrics();

        let _exclusive = self.locks.acquire(customer_id).await;
        let started = Instant::now();
        let result = self.initial_cycle(now, customer_id).await;

        histogram!("analytics_cycle_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        let outcome = match &result {
            Ok(o) => o.label(),
            Err(_) => "failed",
        };
        counter!("analytics_initial_runs_total", "outcome" => outcome).increment(1);
        result
    }

    async fn initial_cycle(
        &self,
        now: DateTime<Utc>,
        customer_id: &str,
    ) -> Result<CycleOutcome, AnalyticsError> {
        let data = self
            .fetcher
            .fetch_all_data(customer_id)
            .await
            .map_err(|e| failed(Stage::FetchNew, customer_id, e))?;
        let info = self
            .fetcher
            .fetch_customer_info(customer_id)
            .await
            .map_err(|e| failed(Stage::FetchHistory, customer_id, e))?;

        let summary = summarize(&data);
        let prompt = initial::build_prompt(&info, &summary);

        let outcome = self
            .insights
            .complete_json(&prompt, initial::parse_initial)
            .await;
        let insights: InitialInsights = match take_report(customer_id, outcome) {
            Ok(insights) => insights,
            Err(reason) => return Ok(CycleOutcome::NoInsights(reason)),
        };

        let (profile, applied) = insights.into_profile();
        if applied.is_empty() {
            info!(customer_id, "initial pass produced no usable category; nothing written");
            return Ok(CycleOutcome::Unchanged(NoUpdateReason::NothingApplied));
        }
        self.persist(now, customer_id, &profile, &applied).await?;
        info!(customer_id, applied = ?applied, "initial insight profile written");
        Ok(CycleOutcome::Updated { profile, applied })
    }

    async fn persist(
        &self,
        now: DateTime<Utc>,
        customer_id: &str,
        profile: &CustomerInsightProfile,
        applied: &[Category],
    ) -> Result<(), AnalyticsError> {
        self.writer
            .persist(customer_id, profile, applied, now)
            .await
            .map_err(|e| failed(Stage::Persist, customer_id, e))?;
        counter!("analytics_profile_writes_total").increment(1);
        Ok(())
    }
}

/// The parsed reply, or the logged reason there is none this cycle.
fn take_report<T>(customer_id: &str, outcome: AnalysisOutcome<T>) -> Result<T, NoInsightsReason> {
    match outcome {
        AnalysisOutcome::Report(parsed) => Ok(parsed),
        AnalysisOutcome::Exhausted {
            attempts,
            last_error,
        } => {
            warn!(customer_id, attempts, error = %last_error, "no insights this cycle");
            Err(NoInsightsReason::Exhausted {
                attempts,
                last_error,
            })
        }
        AnalysisOutcome::Unparseable {
            error,
            raw_response,
        } => {
            warn!(
                customer_id,
                raw_len = raw_response.len(),
                "no insights this cycle: {error}"
            );
            Err(NoInsightsReason::Unparseable {
                error,
                raw_response,
            })
        }
    }
}

fn failed(stage: Stage, customer_id: &str, source: StoreError) -> AnalyticsError {
    error!(customer_id, %stage, error = %source, "analysis cycle failed");
    AnalyticsError::Storage { stage, source }
}

fn validate_customer_id(customer_id: &str) -> Result<&str, AnalyticsError> {
    let id = customer_id.trim();
    if id.is_empty() {
        return Err(AnalyticsError::Validation("customer id must not be empty".into()));
    }
    if id.contains('/') {
        return Err(AnalyticsError::Validation(format!(
            "customer id '{id}' must not contain '/'"
        )));
    }
    Ok(id)
}

fn validate_window(window_days: i64) -> Result<u32, AnalyticsError> {
    u32::try_from(window_days)
        .ok()
        .filter(|d| *d > 0)
        .ok_or_else(|| {
            AnalyticsError::Validation(format!(
                "window must be a positive number of days, got {window_days}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_screaming_snake() {
        assert_eq!(Stage::FetchNew.to_string(), "FETCH_NEW");
        assert_eq!(Stage::LlmAnalyze.to_string(), "LLM_ANALYZE");
        assert_eq!(
            serde_json::to_value(Stage::BuildContext).unwrap(),
            serde_json::json!("BUILD_CONTEXT")
        );
    }

    #[test]
    fn customer_ids_are_validated() {
        assert_eq!(validate_customer_id("  c-42 ").unwrap(), "c-42");
        assert!(validate_customer_id("").is_err());
        assert!(validate_customer_id("   ").is_err());
        assert!(validate_customer_id("a/b").is_err());
    }

    #[test]
    fn windows_must_be_positive() {
        assert_eq!(validate_window(30).unwrap(), 30);
        assert!(validate_window(0).is_err());
        assert!(validate_window(-7).is_err());
        assert!(validate_window(i64::MAX).is_err());
    }
}
