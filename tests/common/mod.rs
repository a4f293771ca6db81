// tests/common/mod.rs
//
// Shared fixtures for integration tests: a scripted model provider, a store that
// fails on chosen paths, and seed data for one customer.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use adaptive_insights::insight::{
    CompletionProvider, CompletionRequest, InsightClient, ProviderError, RetryPolicy,
};
use adaptive_insights::store::{Document, DocumentStore, Query};
use adaptive_insights::{AnalyticsEngine, DynStore, MemoryStore, StoreError};

pub enum Step {
    Reply(String),
    Fail(ProviderError),
    /// Never answers within any sane timeout.
    Hang,
}

/// Plays back a fixed script of replies, one per call, and keeps every prompt it saw.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(body: impl Into<String>) -> Arc<Self> {
        Self::new(vec![Step::Reply(body.into())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(body)) => Ok(body),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Other("woke up".into()))
            }
            None => Err(ProviderError::Other("script exhausted".into())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Delegates to a [`MemoryStore`] but fails operations on paths under `prefix`:
/// every operation by default, only writes when built with [`FailingStore::on_writes`].
pub struct FailingStore {
    pub inner: Arc<MemoryStore>,
    prefix: String,
    writes_only: bool,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryStore>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
            writes_only: false,
        }
    }

    pub fn on_writes(inner: Arc<MemoryStore>, prefix: impl Into<String>) -> Self {
        Self {
            writes_only: true,
            ..Self::new(inner, prefix)
        }
    }

    fn check_read(&self, path: &str) -> Result<(), StoreError> {
        if self.writes_only {
            Ok(())
        } else {
            self.check(path)
        }
    }

    fn check(&self, path: &str) -> Result<(), StoreError> {
        if path.starts_with(&self.prefix) {
            Err(StoreError::Unavailable(format!("injected failure at {path}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        self.check_read(path)?;
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, doc: Document) -> Result<(), StoreError> {
        self.check(path)?;
        self.inner.set(path, doc).await
    }

    async fn add(&self, collection: &str, doc: Document) -> Result<String, StoreError> {
        self.check(collection)?;
        self.inner.add(collection, doc).await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.check(path)?;
        self.inner.delete(path).await
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.check_read(collection)?;
        self.inner.query(collection, query).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        self.check_read(collection)?;
        self.inner.list(collection).await
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
}

pub fn doc(v: Value) -> Document {
    v.as_object().cloned().expect("fixture must be an object")
}

/// Customer record, two in-window transactions, one session and a stored profile of
/// `life_stage = young_adult`, `retention_risk = low`.
pub fn seed_customer(store: &MemoryStore, id: &str) {
    store.insert(
        &format!("CustomerData/{id}"),
        doc(json!({"name": format!("Customer {id}"), "age": 34})),
    );
    store.insert(
        &format!("CustomerData/{id}/life_stage/h1"),
        doc(json!({"created_at": "2024-03-01T00:00:00Z", "value": "young_adult"})),
    );
    store.insert(
        &format!("TransactionData/{id}/transactions/t1"),
        doc(json!({
            "Transaction_Amount": 120.0,
            "Transaction_Date": "2024-06-10",
            "Merchant": "Baby World",
            "Merchant_Category": "children"
        })),
    );
    store.insert(
        &format!("TransactionData/{id}/transactions/t2"),
        doc(json!({
            "Transaction_Amount": 45.5,
            "Transaction_Date": "2024-06-12",
            "Merchant": "FreshMart",
            "Merchant_Category": "groceries"
        })),
    );
    store.insert(
        &format!("AppActivity/{id}"),
        doc(json!({"sessions": [
            {"date": "2024-06-11T09:30:00Z", "session_duration": 300, "visited": ["home", "family_accounts"]}
        ]})),
    );
    store.insert(
        &format!("CustomerInsights/{id}"),
        doc(json!({"life_stage": "young_adult", "retention_risk": "low"})),
    );
}

pub fn life_stage_report() -> String {
    json!({
        "profile_change_summary": {
            "total_changes_detected": 1,
            "change_significance": "moderate",
            "changed_metrics": [{
                "metric_name": "life_stage",
                "old_value": "young_adult",
                "new_value": "family_formation",
                "change_significance": "significant",
                "confidence_level": "high",
                "potential_implications": ["family products"]
            }]
        },
        "overall_profile_shift": {
            "primary_direction": "positive",
            "key_observations": ["children's purchases"]
        }
    })
    .to_string()
}

pub fn life_events_report() -> String {
    json!({
        "profile_change_summary": {
            "total_changes_detected": 1,
            "change_significance": "minor",
            "changed_metrics": [{
                "metric_name": "life_events",
                "new_value": "new_child"
            }]
        }
    })
    .to_string()
}

/// A `life_stage` change next to a `retention_risk` metric whose old value is a number.
pub fn mixed_value_report() -> String {
    json!({
        "profile_change_summary": {
            "total_changes_detected": 2,
            "change_significance": "moderate",
            "changed_metrics": [
                {
                    "metric_name": "life_stage",
                    "old_value": "young_adult",
                    "new_value": "family_formation"
                },
                {
                    "metric_name": "retention_risk",
                    "old_value": 0.2,
                    "new_value": "medium"
                }
            ]
        }
    })
    .to_string()
}

/// Initial-pass reply covering all four categories.
pub fn initial_report() -> String {
    json!({
        "life_stage": {"stage": "young_adult", "confidence": "medium"},
        "life_events": ["started_first_job"],
        "spending_patterns": {"top_categories": ["groceries", "children"], "discipline": "steady"},
        "retention_risk": {"level": "low", "drivers": []}
    })
    .to_string()
}

pub fn no_change_report() -> String {
    json!({
        "profile_change_summary": {
            "total_changes_detected": 0,
            "change_significance": "minor",
            "changed_metrics": []
        }
    })
    .to_string()
}

/// Engine with instant retries so failure paths do not sleep.
pub fn engine(store: DynStore, provider: Arc<dyn CompletionProvider>) -> AnalyticsEngine {
    AnalyticsEngine::new(store, InsightClient::new(provider, RetryPolicy::immediate(3)))
}
