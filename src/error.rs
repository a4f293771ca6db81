// src/error.rs
use thiserror::Error;

use crate::engine::Stage;
use crate::store::StoreError;

/// Errors that abort one customer's analysis cycle.
///
/// Provider failures are deliberately absent: they degrade to
/// [`CycleOutcome::NoInsights`](crate::engine::CycleOutcome::NoInsights).
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Rejected before any I/O.
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("storage failure during {stage}: {source}")]
    Storage {
        stage: Stage,
        #[source]
        source: StoreError,
    },
}

impl AnalyticsError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            AnalyticsError::Validation(_) => None,
            AnalyticsError::Storage { stage, .. } => Some(*stage),
        }
    }
}
