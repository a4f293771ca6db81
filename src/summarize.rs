//! # Summarizer
//! Pure reduction of a window of raw records into the compact statistics sent to the
//! model. Ordered maps keep the serialized summary (and thus the prompt) deterministic.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{ActivitySession, NewData, Transaction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Aggregate {
    pub sum: f64,
    pub count: u64,
}

impl Aggregate {
    fn add(&mut self, amount: f64) {
        self.sum += amount;
        self.count += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LargestTransaction {
    pub amount: f64,
    pub merchant: String,
    pub merchant_category: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionSummary {
    pub total_spent: f64,
    pub num_transactions: u64,
    pub merchant_categories: BTreeMap<String, Aggregate>,
    pub merchants: BTreeMap<String, Aggregate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub largest_transaction: Option<LargestTransaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivitySummary {
    /// Page -> number of visits across all sessions in the window.
    pub pages_visited: BTreeMap<String, u64>,
    pub total_time_spent_secs: f64,
    pub num_sessions: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataSummary {
    pub transactions_summary: TransactionSummary,
    pub app_activity_summary: ActivitySummary,
}

impl DataSummary {
    /// No records at all: downstream must not read this as evidence of change.
    pub fn is_empty(&self) -> bool {
        self.transactions_summary.num_transactions == 0
            && self.app_activity_summary.num_sessions == 0
    }
}

pub fn summarize(data: &NewData) -> DataSummary {
    DataSummary {
        transactions_summary: summarize_transactions(&data.transactions),
        app_activity_summary: summarize_activity(&data.activity),
    }
}

pub fn summarize_transactions(transactions: &[Transaction]) -> TransactionSummary {
    let mut out = TransactionSummary::default();
    let mut largest: Option<&Transaction> = None;

    for t in transactions {
        out.total_spent += t.amount;
        out.num_transactions += 1;
        out.merchant_categories
            .entry(t.merchant_category.clone())
            .or_default()
            .add(t.amount);
        out.merchants
            .entry(t.merchant.clone())
            .or_default()
            .add(t.amount);
        // strict `>` keeps the first occurrence on ties
        if largest.map_or(true, |best| t.amount > best.amount) {
            largest = Some(t);
        }
    }

    out.largest_transaction = largest.map(|t| LargestTransaction {
        amount: t.amount,
        merchant: t.merchant.clone(),
        merchant_category: t.merchant_category.clone(),
    });
    out
}

pub fn summarize_activity(sessions: &[ActivitySession]) -> ActivitySummary {
    let mut out = ActivitySummary::default();
    for s in sessions {
        out.num_sessions += 1;
        out.total_time_spent_secs += s.duration_secs;
        for page in &s.visited_pages {
            *out.pages_visited.entry(page.clone()).or_insert(0) += 1;
        }
    }
    out
}
