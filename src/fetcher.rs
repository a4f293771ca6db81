//! # Data Fetcher
//! Windowed reads of a customer's transactions and app sessions, and point reads of
//! the latest historical insight per category. Store failures are returned as-is;
//! retrying is up to the caller.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::model::{
    ActivitySession, Category, CustomerInsightProfile, HistoricalProfile, NewData, Transaction,
};
use crate::store::{layout, Direction, Document, DynStore, Query, StoreError};

pub struct DataFetcher {
    store: DynStore,
}

impl DataFetcher {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Records dated within the last `window_days` days.
    pub async fn fetch_new_data(
        &self,
        customer_id: &str,
        window_days: u32,
    ) -> Result<NewData, StoreError> {
        self.fetch_new_data_at(Utc::now(), customer_id, window_days)
            .await
    }

    /// Same as [`fetch_new_data`](Self::fetch_new_data) with an explicit clock.
    ///
    /// Transactions are compared at day granularity (`YYYY-MM-DD` range query);
    /// sessions are compared against the full cutoff timestamp.
    pub async fn fetch_new_data_at(
        &self,
        now: DateTime<Utc>,
        customer_id: &str,
        window_days: u32,
    ) -> Result<NewData, StoreError> {
        let cutoff = now - Duration::days(i64::from(window_days));
        let data = self.load(customer_id, Some(cutoff)).await?;
        debug!(
            customer_id,
            window_days,
            transactions = data.transactions.len(),
            sessions = data.activity.len(),
            "fetched new data"
        );
        Ok(data)
    }

    /// Every transaction and session on record, regardless of date.
    pub async fn fetch_all_data(&self, customer_id: &str) -> Result<NewData, StoreError> {
        let data = self.load(customer_id, None).await?;
        debug!(
            customer_id,
            transactions = data.transactions.len(),
            sessions = data.activity.len(),
            "fetched full history"
        );
        Ok(data)
    }

    async fn load(
        &self,
        customer_id: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<NewData, StoreError> {
        let tx_collection = layout::transactions_collection(customer_id);
        let mut q = Query::new();
        if let Some(cutoff) = cutoff {
            q = q.where_gte(
                layout::TRANSACTION_DATE_FIELD,
                Value::String(cutoff.format("%Y-%m-%d").to_string()),
            );
        }
        let transactions = self
            .store
            .query(&tx_collection, &q)
            .await?
            .into_iter()
            .map(|d| decode::<Transaction>(&tx_collection, d))
            .collect::<Result<Vec<_>, _>>()?;

        let activity_path = layout::activity_doc(customer_id);
        let sessions: Vec<ActivitySession> = match self.store.get(&activity_path).await? {
            Some(mut doc) => match doc.remove(layout::SESSIONS_FIELD) {
                Some(v) => serde_json::from_value(v).map_err(|e| corrupt(&activity_path, e))?,
                None => Vec::new(),
            },
            None => Vec::new(),
        };
        let activity = match cutoff {
            Some(cutoff) => sessions.into_iter().filter(|s| s.date >= cutoff).collect(),
            None => sessions,
        };

        Ok(NewData {
            transactions,
            activity,
        })
    }

    /// The `CustomerData/{id}` document, empty when the customer has none.
    pub async fn fetch_customer_info(&self, customer_id: &str) -> Result<Document, StoreError> {
        Ok(self
            .store
            .get(&layout::customer_doc(customer_id))
            .await?
            .unwrap_or_default())
    }

    /// Base customer document plus the newest history document per category.
    pub async fn fetch_historical_context(
        &self,
        customer_id: &str,
    ) -> Result<HistoricalProfile, StoreError> {
        let basic_customer_info = self.fetch_customer_info(customer_id).await?;

        let latest_first = Query::new()
            .order_by(layout::CREATED_AT_FIELD, Direction::Descending)
            .limit(1);
        let mut latest = BTreeMap::new();
        for category in Category::ALL {
            let collection = layout::history_collection(customer_id, category);
            if let Some(doc) = self
                .store
                .query(&collection, &latest_first)
                .await?
                .into_iter()
                .next()
            {
                latest.insert(category, doc);
            }
        }

        debug!(customer_id, categories = latest.len(), "fetched historical context");
        Ok(HistoricalProfile {
            basic_customer_info,
            latest,
        })
    }

    /// The stored current-state profile, empty when none has been written yet.
    ///
    /// A known category holding a shape it does not accept makes the document corrupt;
    /// unknown keys are carried through untouched.
    pub async fn fetch_current_profile(
        &self,
        customer_id: &str,
    ) -> Result<CustomerInsightProfile, StoreError> {
        let path = layout::profile_doc(customer_id);
        let profile: CustomerInsightProfile = match self.store.get(&path).await? {
            Some(doc) => decode(&path, doc)?,
            None => return Ok(CustomerInsightProfile::default()),
        };
        for category in Category::ALL {
            if let Some(value) = profile.get(category).filter(|v| !category.accepts(v)) {
                return Err(StoreError::Corrupt {
                    path,
                    reason: format!("{category} cannot hold a {}", value.shape()),
                });
            }
        }
        Ok(profile)
    }
}

fn decode<T: DeserializeOwned>(path: &str, doc: Document) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| corrupt(path, e))
}

fn corrupt(path: &str, e: serde_json::Error) -> StoreError {
    StoreError::Corrupt {
        path: path.to_string(),
        reason: e.to_string(),
    }
}
