//! Batch driver: one analysis cycle (or initial generation) for every customer in
//! `CustomerData`.
//!
//! A customer whose cycle fails is recorded and skipped; the rest of the batch continues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::engine::{AnalyticsEngine, CycleOutcome};
use crate::error::AnalyticsError;
use crate::store::{layout, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerFailure {
    pub customer_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub no_insights: usize,
    pub failed: Vec<CustomerFailure>,
}

impl BatchReport {
    fn record(&mut self, customer_id: String, result: Result<CycleOutcome, AnalyticsError>) {
        self.processed += 1;
        match result {
            Ok(CycleOutcome::Updated { .. }) => self.updated += 1,
            Ok(CycleOutcome::Unchanged(_)) => self.unchanged += 1,
            Ok(CycleOutcome::NoInsights(_)) => self.no_insights += 1,
            Err(e) => self.failed.push(CustomerFailure {
                customer_id,
                error: e.to_string(),
            }),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.processed - self.failed.len()
    }
}

/// What a batch does for each customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Incremental cycle over the trailing `window_days` days.
    Analyze { window_days: i64 },
    /// First profile from the customer's whole record.
    Initialize,
}

impl BatchMode {
    async fn run(
        self,
        engine: &AnalyticsEngine,
        customer_id: &str,
    ) -> Result<CycleOutcome, AnalyticsError> {
        match self {
            BatchMode::Analyze { window_days } => engine.run_analysis(customer_id, window_days).await,
            BatchMode::Initialize => engine.generate_initial(customer_id).await,
        }
    }
}

/// Run every customer through an analysis cycle, at most `concurrency` at a time.
///
/// Only listing the customers can fail the batch as a whole.
pub async fn run_batch(
    engine: Arc<AnalyticsEngine>,
    window_days: i64,
    concurrency: usize,
) -> Result<BatchReport, StoreError> {
    run_batch_with(engine, BatchMode::Analyze { window_days }, concurrency).await
}

pub async fn run_batch_with(
    engine: Arc<AnalyticsEngine>,
    mode: BatchMode,
    concurrency: usize,
) -> Result<BatchReport, StoreError> {
    let started = Instant::now();
    let customers = engine.store().list(layout::CUSTOMERS).await?;
    info!(customers = customers.len(), ?mode, "starting analysis batch");

    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = JoinSet::new();
    let mut owners = HashMap::with_capacity(customers.len());
    for customer_id in customers {
        let engine = engine.clone();
        let permits = permits.clone();
        let task_customer = customer_id.clone();
        let handle = set.spawn(async move {
            // the semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            mode.run(&engine, &task_customer).await
        });
        owners.insert(handle.id(), customer_id);
    }

    let mut report = BatchReport::default();
    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((id, result)) => {
                let customer_id = owners.remove(&id).unwrap_or_default();
                if let Err(e) = &result {
                    warn!(customer_id = %customer_id, error = %e, "customer skipped");
                }
                report.record(customer_id, result);
            }
            Err(e) => {
                let customer_id = owners.remove(&e.id()).unwrap_or_default();
                error!(customer_id = %customer_id, error = %e, "analysis task aborted");
                report.processed += 1;
                report.failed.push(CustomerFailure {
                    customer_id,
                    error: e.to_string(),
                });
            }
        }
    }
    report
        .failed
        .sort_by(|a, b| a.customer_id.cmp(&b.customer_id));

    info!(
        processed = report.processed,
        updated = report.updated,
        unchanged = report.unchanged,
        no_insights = report.no_insights,
        failed = report.failed.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "analysis batch finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NoInsightsReason;
    use crate::engine::Stage;
    use crate::insight::ProviderError;
    use crate::merge::NoUpdateReason;

    #[test]
    fn report_counts_each_outcome() {
        let mut r = BatchReport::default();
        r.record(
            "a".into(),
            Ok(CycleOutcome::Unchanged(NoUpdateReason::NoChangesReported)),
        );
        r.record(
            "b".into(),
            Ok(CycleOutcome::NoInsights(NoInsightsReason::Exhausted {
                attempts: 3,
                last_error: ProviderError::Timeout,
            })),
        );
        r.record(
            "c".into(),
            Err(AnalyticsError::Storage {
                stage: Stage::FetchNew,
                source: StoreError::Unavailable("down".into()),
            }),
        );
        assert_eq!(r.processed, 3);
        assert_eq!(r.unchanged, 1);
        assert_eq!(r.no_insights, 1);
        assert_eq!(r.succeeded(), 2);
        assert_eq!(r.failed[0].customer_id, "c");
        assert!(r.failed[0].error.contains("FETCH_NEW"));
    }
}
