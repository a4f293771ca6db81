//! # Initial Insights
//! First profile for a customer: one model pass over the customer's whole record,
//! answered with one value per category. Used to seed `CustomerInsights/{id}` and the
//! per-category history before any incremental analysis can run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::insight::clean_response;
use crate::model::{Category, CustomerInsightProfile, InsightValue};
use crate::store::Document;
use crate::summarize::DataSummary;

/// Reply format for the initial pass, embedded verbatim in the prompt.
pub const INITIAL_SCHEMA: &str = r#"{
  "life_stage": {"stage": <string>, "confidence": "low|medium|high", "reasoning": <string>},
  "life_events": {"events": [<string>, ...], "confidence": "low|medium|high"},
  "spending_patterns": {"top_categories": [<string>, ...], "discipline": <string>, "notes": <string>},
  "retention_risk": {"level": "low|medium|high", "drivers": [<string>, ...]}
}"#;

#[derive(Debug, Clone, Copy, Serialize)]
struct InitialContext<'a> {
    customer_info: &'a Document,
    data_summary: &'a DataSummary,
}

pub fn build_prompt(customer_info: &Document, summary: &DataSummary) -> String {
    let context = InitialContext {
        customer_info,
        data_summary: summary,
    };
    let payload = serde_json::to_string_pretty(&context).unwrap_or_else(|_| "{}".to_string());

    format!(
        "You are an analysis engine that builds a first insight profile for a bank customer \
from their details and a summary of their full transaction and app activity history.

Customer Data:
{payload}

Instructions:
- Produce exactly one entry for each of: life_stage, life_events, spending_patterns, retention_risk.
- Base every value on the data provided; say so in the confidence field when evidence is thin.
- Each value must be a JSON object; life_events may also be a list of event names.

Respond with JSON only, exactly in this format:
{INITIAL_SCHEMA}
"
    )
}

/// Parsed reply: top-level key -> raw value. Anything that is not a JSON object fails.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct InitialInsights(BTreeMap<String, Value>);

impl InitialInsights {
    /// Keep the known categories whose value has a shape the category accepts.
    ///
    /// Returns the profile and the categories it holds, in [`Category::ALL`] order.
    pub fn into_profile(self) -> (CustomerInsightProfile, Vec<Category>) {
        let mut profile = CustomerInsightProfile::new();
        let mut present = Vec::new();
        for (key, raw) in self.0 {
            let Ok(category) = key.parse::<Category>() else {
                warn!(key = %key, "ignoring unknown key in initial insights");
                continue;
            };
            match InsightValue::from_json(&raw).filter(|v| category.accepts(v)) {
                Some(value) => {
                    profile.set(category, value);
                    present.push(category);
                }
                None => warn!(%category, value = %raw, "ignoring initial insight with an unusable shape"),
            }
        }
        present.sort();
        (profile, present)
    }
}

pub fn parse_initial(raw: &str) -> Result<InitialInsights, serde_json::Error> {
    serde_json::from_str(clean_response(raw))
}
