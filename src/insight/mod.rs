// src/insight/mod.rs
//! Model-facing side of the pipeline: the change report schema, response parsing,
//! the provider abstraction and the retrying client.

pub mod client;
pub mod gemini;
pub mod provider;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Category, InsightValue};

pub use client::{AnalysisOutcome, InsightClient, RetryPolicy, PARSE_ERROR_MESSAGE};
pub use provider::{
    build_provider, CompletionProvider, CompletionRequest, DynProvider, FailureKind, ProviderError,
    StaticProvider,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSignificance {
    Minor,
    Moderate,
    Substantial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSignificance {
    Minor,
    Significant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftDirection {
    Positive,
    Negative,
    Neutral,
}

/// Parsed model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub profile_change_summary: ProfileChangeSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_profile_shift: Option<ProfileShift>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileChangeSummary {
    pub total_changes_detected: i64,
    pub change_significance: ProfileSignificance,
    #[serde(default)]
    pub changed_metrics: Vec<ChangedMetric>,
}

/// One reported change. `metric_name` and both values stay loosely typed so that one
/// odd metric never fails the whole report; the merger decides what to do with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedMetric {
    pub metric_name: String,
    #[serde(default)]
    pub old_value: Option<Value>,
    pub new_value: Value,
    #[serde(default)]
    pub change_percentage: Option<f64>,
    #[serde(default)]
    pub change_significance: Option<MetricSignificance>,
    #[serde(default)]
    pub confidence_level: Option<ConfidenceLevel>,
    #[serde(default)]
    pub potential_implications: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileShift {
    pub primary_direction: ShiftDirection,
    #[serde(default)]
    pub key_observations: Vec<String>,
}

impl ChangeReport {
    pub fn new(
        total_changes_detected: i64,
        change_significance: ProfileSignificance,
        changed_metrics: Vec<ChangedMetric>,
    ) -> Self {
        Self {
            profile_change_summary: ProfileChangeSummary {
                total_changes_detected,
                change_significance,
                changed_metrics,
            },
            overall_profile_shift: None,
        }
    }

    /// A report claiming no change at all.
    pub fn unchanged() -> Self {
        Self::new(0, ProfileSignificance::Minor, Vec::new())
    }

    pub fn total_changes_detected(&self) -> i64 {
        self.profile_change_summary.total_changes_detected
    }

    pub fn changed_metrics(&self) -> &[ChangedMetric] {
        &self.profile_change_summary.changed_metrics
    }
}

impl ChangedMetric {
    pub fn new(metric_name: impl Into<String>, new_value: InsightValue) -> Self {
        Self {
            metric_name: metric_name.into(),
            old_value: None,
            new_value: new_value.into(),
            change_percentage: None,
            change_significance: None,
            confidence_level: None,
            potential_implications: Vec::new(),
        }
    }

    pub fn from_value(mut self, old_value: InsightValue) -> Self {
        self.old_value = Some(old_value.into());
        self
    }

    /// `new_value` narrowed to a storable shape, if it has one.
    pub fn insight_value(&self) -> Option<InsightValue> {
        InsightValue::from_json(&self.new_value)
    }

    /// `None` when the model reported a field outside the four categories.
    pub fn category(&self) -> Option<Category> {
        self.metric_name.parse().ok()
    }
}

/// Strip whitespace and an optional Markdown code fence around the JSON body.
pub fn clean_response(raw: &str) -> &str {
    static RE_FENCE: OnceCell<Regex> = OnceCell::new();
    let re = RE_FENCE.get_or_init(|| {
        Regex::new(r"(?s)^```[A-Za-z]*\s*\n?(.*?)\s*```$").expect("valid fence regex")
    });
    let trimmed = raw.trim();
    match re.captures(trimmed).and_then(|c| c.get(1)) {
        Some(body) => body.as_str(),
        None => trimmed,
    }
}

pub fn parse_report(raw: &str) -> Result<ChangeReport, serde_json::Error> {
    serde_json::from_str(clean_response(raw))
}
