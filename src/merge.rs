//! # Change Merger
//! Applies a model change report to the stored profile behind a significance gate:
//! a new document is produced only when at least one category value actually changes,
//! and it always replaces the stored document as a whole.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::insight::ChangeReport;
use crate::model::{Category, CustomerInsightProfile, InsightValue};
use crate::store::{layout, Document, DynStore, StoreError};

/// What to do with a reported category that has no key in the stored profile yet.
///
/// `Skip` keeps the long-standing behaviour: a category is never created by a merge,
/// so a customer whose profile lacks a key can never receive a first value for it.
/// `Insert` lets the merge create the key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingCategoryPolicy {
    #[default]
    Skip,
    Insert,
}

impl MissingCategoryPolicy {
    pub fn admits(self, profile: &CustomerInsightProfile, category: Category) -> bool {
        match self {
            MissingCategoryPolicy::Skip => profile.contains(category),
            MissingCategoryPolicy::Insert => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoUpdateReason {
    /// The report's `total_changes_detected` was below 1.
    NoChangesReported,
    /// Changes were reported but none survived the key/shape/equality checks.
    NothingApplied,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Updated {
        profile: CustomerInsightProfile,
        applied: Vec<Category>,
    },
    NoUpdate(NoUpdateReason),
}

pub fn merge(
    current: &CustomerInsightProfile,
    report: &ChangeReport,
    policy: MissingCategoryPolicy,
) -> MergeOutcome {
    if report.total_changes_detected() < 1 {
        return MergeOutcome::NoUpdate(NoUpdateReason::NoChangesReported);
    }

    let mut updated = current.clone();
    let mut applied = Vec::new();

    for metric in report.changed_metrics() {
        let Some(category) = metric.category() else {
            warn!(metric = %metric.metric_name, "skipping change for unknown metric");
            continue;
        };
        let Some(value) = metric.insight_value().filter(|v| category.accepts(v)) else {
            warn!(
                %category,
                new_value = %metric.new_value,
                "skipping change with a value shape the category does not hold"
            );
            continue;
        };
        if !policy.admits(current, category) {
            debug!(%category, "skipping change for a category absent from the profile");
            continue;
        }
        if current.get(category) == Some(&value) {
            debug!(%category, "reported value equals the stored one");
            continue;
        }
        updated.set(category, value);
        if !applied.contains(&category) {
            applied.push(category);
        }
    }

    if applied.is_empty() {
        MergeOutcome::NoUpdate(NoUpdateReason::NothingApplied)
    } else {
        MergeOutcome::Updated {
            profile: updated,
            applied,
        }
    }
}

/// History entry for one category value: a record's own fields, or `{"value": ..}`
/// for labels and lists, stamped with `created_at`.
pub fn history_entry(value: &InsightValue, at: DateTime<Utc>) -> Document {
    let mut doc: Document = match value {
        InsightValue::Record(fields) => fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        other => {
            let mut doc = Document::new();
            doc.insert("value".into(), Value::from(other.clone()));
            doc
        }
    };
    doc.insert(
        layout::CREATED_AT_FIELD.into(),
        Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    doc
}

/// Persists merged profiles to `CustomerInsights/{id}` together with their
/// `CustomerData/{id}/{category}` history.
pub struct ProfileWriter {
    store: DynStore,
}

impl ProfileWriter {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Append one history entry per category in `changed`, then overwrite the profile.
    ///
    /// History goes first so that a stored profile always has a matching history entry.
    /// If any write fails, the entries appended so far are deleted again before the
    /// error is returned.
    pub async fn persist(
        &self,
        customer_id: &str,
        profile: &CustomerInsightProfile,
        changed: &[Category],
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut appended = Vec::with_capacity(changed.len());
        for &category in changed {
            let Some(value) = profile.get(category) else {
                continue;
            };
            let collection = layout::history_collection(customer_id, category);
            match self.store.add(&collection, history_entry(value, at)).await {
                Ok(path) => appended.push(path),
                Err(e) => {
                    self.roll_back(&appended).await;
                    return Err(e);
                }
            }
        }
        if let Err(e) = self.overwrite(customer_id, profile).await {
            self.roll_back(&appended).await;
            return Err(e);
        }
        Ok(())
    }

    async fn roll_back(&self, appended: &[String]) {
        for path in appended {
            if let Err(e) = self.store.delete(path).await {
                warn!(path = %path, error = %e, "could not remove history entry after failed persist");
            }
        }
    }

    /// Full-document overwrite.
    pub async fn overwrite(
        &self,
        customer_id: &str,
        profile: &CustomerInsightProfile,
    ) -> Result<(), StoreError> {
        let doc = match serde_json::to_value(profile)? {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(StoreError::Corrupt {
                    path: layout::profile_doc(customer_id),
                    reason: format!("profile serialized to non-object {other}"),
                })
            }
        };
        self.store.set(&layout::profile_doc(customer_id), doc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::insight::{ChangedMetric, ProfileSignificance};

    fn starting_profile() -> CustomerInsightProfile {
        CustomerInsightProfile::new()
            .with(Category::LifeStage, InsightValue::label("young_adult"))
            .with(Category::RetentionRisk, InsightValue::label("low"))
    }

    fn report(total: i64, metrics: Vec<ChangedMetric>) -> ChangeReport {
        ChangeReport::new(total, ProfileSignificance::Moderate, metrics)
    }

    #[test]
    fn life_stage_change_is_applied() {
        let r = report(
            1,
            vec![ChangedMetric::new("life_stage", InsightValue::label("family_formation"))
                .from_value(InsightValue::label("young_adult"))],
        );
        let out = merge(&starting_profile(), &r, MissingCategoryPolicy::Skip);
        let expected = CustomerInsightProfile::new()
            .with(Category::LifeStage, InsightValue::label("family_formation"))
            .with(Category::RetentionRisk, InsightValue::label("low"));
        assert_eq!(
            out,
            MergeOutcome::Updated {
                profile: expected,
                applied: vec![Category::LifeStage],
            }
        );
    }

    #[test]
    fn absent_category_is_not_created_by_default() {
        let r = report(
            1,
            vec![ChangedMetric::new("life_events", InsightValue::label("new_child"))],
        );
        let out = merge(&starting_profile(), &r, MissingCategoryPolicy::Skip);
        assert_eq!(out, MergeOutcome::NoUpdate(NoUpdateReason::NothingApplied));
    }

    #[test]
    fn insert_policy_creates_absent_category() {
        let r = report(
            1,
            vec![ChangedMetric::new("life_events", InsightValue::list(["new_child"]))],
        );
        match merge(&starting_profile(), &r, MissingCategoryPolicy::Insert) {
            MergeOutcome::Updated { profile, applied } => {
                assert_eq!(applied, vec![Category::LifeEvents]);
                assert_eq!(profile.len(), 3);
                assert_eq!(
                    profile.get(Category::LifeEvents),
                    Some(&InsightValue::list(["new_child"]))
                );
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn zero_reported_changes_short_circuit() {
        // even with a metric listed, the total gates the merge
        let r = report(
            0,
            vec![ChangedMetric::new("life_stage", InsightValue::label("retiree"))],
        );
        let out = merge(&starting_profile(), &r, MissingCategoryPolicy::Skip);
        assert_eq!(out, MergeOutcome::NoUpdate(NoUpdateReason::NoChangesReported));

        let negative = report(-1, vec![]);
        assert_eq!(
            merge(&starting_profile(), &negative, MissingCategoryPolicy::Insert),
            MergeOutcome::NoUpdate(NoUpdateReason::NoChangesReported)
        );
    }

    #[test]
    fn unchanged_values_do_not_trigger_a_write() {
        let r = report(
            2,
            vec![
                ChangedMetric::new("life_stage", InsightValue::label("young_adult")),
                ChangedMetric::new("retention_risk", InsightValue::label("low")),
            ],
        );
        let out = merge(&starting_profile(), &r, MissingCategoryPolicy::Skip);
        assert_eq!(out, MergeOutcome::NoUpdate(NoUpdateReason::NothingApplied));
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let r = report(
            1,
            vec![ChangedMetric::new("retention_risk", InsightValue::label("high"))],
        );
        let first = match merge(&starting_profile(), &r, MissingCategoryPolicy::Skip) {
            MergeOutcome::Updated { profile, .. } => profile,
            other => panic!("expected update, got {other:?}"),
        };
        let second = merge(&first, &r, MissingCategoryPolicy::Skip);
        assert_eq!(second, MergeOutcome::NoUpdate(NoUpdateReason::NothingApplied));
    }

    #[test]
    fn unknown_names_and_wrong_shapes_are_skipped() {
        let r = report(
            3,
            vec![
                ChangedMetric::new("credit_score", InsightValue::label("excellent")),
                ChangedMetric::new("life_stage", InsightValue::list(["a", "b"])),
                ChangedMetric::new("retention_risk", InsightValue::label("medium")),
            ],
        );
        match merge(&starting_profile(), &r, MissingCategoryPolicy::Skip) {
            MergeOutcome::Updated { profile, applied } => {
                assert_eq!(applied, vec![Category::RetentionRisk]);
                assert_eq!(
                    profile.get(Category::LifeStage),
                    Some(&InsightValue::label("young_adult"))
                );
                assert_eq!(profile.len(), 2);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn unshaped_values_skip_only_their_metric() {
        let mut odd = ChangedMetric::new("retention_risk", InsightValue::label("x"));
        odd.new_value = serde_json::json!(0.8);
        let mut moved = ChangedMetric::new("life_stage", InsightValue::label("family_formation"));
        moved.old_value = Some(serde_json::json!(0.2));

        match merge(&starting_profile(), &report(2, vec![odd, moved]), MissingCategoryPolicy::Skip) {
            MergeOutcome::Updated { profile, applied } => {
                assert_eq!(applied, vec![Category::LifeStage]);
                assert_eq!(
                    profile.get(Category::RetentionRisk),
                    Some(&InsightValue::label("low"))
                );
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn record_values_update_label_categories() {
        let mut stage = BTreeMap::new();
        stage.insert("stage".to_string(), serde_json::json!("young_adult"));
        stage.insert("confidence".to_string(), serde_json::json!("high"));
        let current = CustomerInsightProfile::new()
            .with(Category::LifeStage, InsightValue::Record(stage.clone()));

        stage.insert("stage".to_string(), serde_json::json!("family_formation"));
        let r = report(
            1,
            vec![ChangedMetric::new("life_stage", InsightValue::Record(stage.clone()))],
        );
        match merge(&current, &r, MissingCategoryPolicy::Skip) {
            MergeOutcome::Updated { profile, applied } => {
                assert_eq!(applied, vec![Category::LifeStage]);
                assert_eq!(profile.get(Category::LifeStage), Some(&InsightValue::Record(stage)));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn history_entries_carry_a_timestamp() {
        use chrono::TimeZone;
        let at = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();

        let label = history_entry(&InsightValue::label("family_formation"), at);
        assert_eq!(
            Value::Object(label),
            serde_json::json!({"value": "family_formation", "created_at": "2024-06-30T12:00:00.000000Z"})
        );

        let mut fields = BTreeMap::new();
        fields.insert("top_category".to_string(), serde_json::json!("groceries"));
        let record = history_entry(&InsightValue::Record(fields), at);
        assert_eq!(record["top_category"], "groceries");
        assert!(record.contains_key("created_at"));
        assert!(!record.contains_key("value"));
    }

    #[test]
    fn policy_gate_is_the_only_difference() {
        let empty = CustomerInsightProfile::new();
        assert!(!MissingCategoryPolicy::Skip.admits(&empty, Category::LifeStage));
        assert!(MissingCategoryPolicy::Insert.admits(&empty, Category::LifeStage));
        assert!(MissingCategoryPolicy::Skip.admits(&starting_profile(), Category::LifeStage));
    }
}
