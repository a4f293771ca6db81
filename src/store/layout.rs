// src/store/layout.rs
//! Collection layout of the customer document store.

use crate::model::Category;

pub const CUSTOMERS: &str = "CustomerData";
pub const TRANSACTIONS: &str = "TransactionData";
pub const ACTIVITY: &str = "AppActivity";
pub const PROFILES: &str = "CustomerInsights";

pub const TRANSACTION_DATE_FIELD: &str = "Transaction_Date";
pub const SESSIONS_FIELD: &str = "sessions";
pub const CREATED_AT_FIELD: &str = "created_at";

pub fn customer_doc(customer_id: &str) -> String {
    format!("{CUSTOMERS}/{customer_id}")
}

pub fn transactions_collection(customer_id: &str) -> String {
    format!("{TRANSACTIONS}/{customer_id}/transactions")
}

pub fn activity_doc(customer_id: &str) -> String {
    format!("{ACTIVITY}/{customer_id}")
}

/// Append-only history of one category, ordered by `created_at`.
pub fn history_collection(customer_id: &str, category: Category) -> String {
    format!("{CUSTOMERS}/{customer_id}/{}", category.as_str())
}

pub fn profile_doc(customer_id: &str) -> String {
    format!("{PROFILES}/{customer_id}")
}
