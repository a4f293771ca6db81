// src/store/mod.rs
//! Document store contract: collection/document/sub-collection addressing with
//! slash-joined paths (`CustomerData/42/life_stage/abc`).

pub mod layout;
pub mod memory;

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::MemoryStore;

pub type Document = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid document path '{0}'")]
    InvalidPath(String),
    #[error("corrupt document at {path}: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Minimal query shape the pipeline needs. Documents lacking a filtered or ordered
/// field are excluded from the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub where_gte: Option<(String, Value)>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_gte(mut self, field: impl Into<String>, value: Value) -> Self {
        self.where_gte = Some((field.into(), value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read of a single document.
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError>;

    /// Full overwrite of a document (no field-level merge).
    async fn set(&self, path: &str, doc: Document) -> Result<(), StoreError>;

    /// Append `doc` to `collection` under a store-generated id and return its full path.
    async fn add(&self, collection: &str, doc: Document) -> Result<String, StoreError>;

    /// Remove a document. Removing a document that does not exist is not an error.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Document ids in a collection.
    async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError>;

    fn name(&self) -> &'static str;
}

/// Shared handle injected into fetchers and writers.
pub type DynStore = Arc<dyn DocumentStore>;

/// Orders JSON scalars the way a document store compares field values:
/// numbers numerically, strings lexicographically, booleans false < true.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Apply `query` to an in-memory set of documents.
pub fn apply_query(mut docs: Vec<Document>, query: &Query) -> Vec<Document> {
    if let Some((field, bound)) = &query.where_gte {
        docs.retain(|d| {
            d.get(field)
                .and_then(|v| compare_values(v, bound))
                .is_some_and(|o| o != Ordering::Less)
        });
    }
    if let Some((field, direction)) = &query.order_by {
        docs.retain(|d| d.contains_key(field));
        docs.sort_by(|a, b| {
            let o = match (a.get(field), b.get(field)) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            };
            match direction {
                Direction::Ascending => o,
                Direction::Descending => o.reverse(),
            }
        });
    }
    if let Some(n) = query.limit {
        docs.truncate(n);
    }
    docs
}
