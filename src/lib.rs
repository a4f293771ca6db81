// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod batch;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod initial;
pub mod insight;
pub mod locks;
pub mod merge;
pub mod metrics;
pub mod model;
pub mod store;
pub mod summarize;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::batch::{run_batch, run_batch_with, BatchMode, BatchReport};
pub use crate::config::AnalyticsConfig;
pub use crate::engine::{AnalyticsEngine, CycleOutcome, NoInsightsReason, Stage};
pub use crate::error::AnalyticsError;
pub use crate::model::{Category, CustomerInsightProfile, InsightValue};
pub use crate::store::{DocumentStore, DynStore, MemoryStore, StoreError};
