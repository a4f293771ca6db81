//! # Context Builder
//! Deterministic prompt construction from the historical profile and the new-data
//! summary. Sampling parameters live with the insight client, not here.

use serde::Serialize;

use crate::model::{Category, HistoricalProfile};
use crate::summarize::DataSummary;

/// Response schema the model must follow, embedded verbatim in every prompt.
pub const RESPONSE_SCHEMA: &str = r#"{
  "profile_change_summary": {
    "total_changes_detected": <int>,
    "change_significance": "minor|moderate|substantial",
    "changed_metrics": [
      {"metric_name": "life_stage|life_events|spending_patterns|retention_risk",
       "old_value": <any>, "new_value": <any>,
       "change_percentage": <number>,
       "change_significance": "minor|significant",
       "confidence_level": "low|medium|high",
       "potential_implications": [<string>, ...]}
    ]
  },
  "overall_profile_shift": {"primary_direction": "positive|negative|neutral", "key_observations": [<string>, ...]}
}"#;

/// Payload for one model call.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AnalysisContext<'a> {
    pub historical_profile: &'a HistoricalProfile,
    pub data_summary: &'a DataSummary,
}

impl<'a> AnalysisContext<'a> {
    pub fn new(historical_profile: &'a HistoricalProfile, data_summary: &'a DataSummary) -> Self {
        Self {
            historical_profile,
            data_summary,
        }
    }

    pub fn to_prompt(&self) -> String {
        let historical = to_pretty_json(self.historical_profile);
        let summary = to_pretty_json(self.data_summary);
        let fields = Category::ALL
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "You are an analysis engine that detects meaningful changes in a customer profile \
by comparing the customer's historical profile with a summary of their recent activity.

Historical Customer Profile:
{historical}

New Data Summary:
{summary}

Instructions:
- Compare the historical profile with the recent data and report only meaningful shifts.
- Report changes ONLY for these customer data fields: {fields}.
- Every entry in changed_metrics must use one of those field names as metric_name.
- new_value must be a string label, a list of strings, or an object with scalar fields.
- If nothing meaningful changed, set total_changes_detected to 0 and return an empty changed_metrics list.
- An empty or near-empty data summary is not evidence of change.

Respond with JSON only, exactly in this format:
{schema}
",
            schema = RESPONSE_SCHEMA,
        )
    }
}

/// Build the prompt text for one customer cycle.
pub fn build(historical: &HistoricalProfile, summary: &DataSummary) -> String {
    AnalysisContext::new(historical, summary).to_prompt()
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
