// src/config/mod.rs
pub mod analytics;

pub use analytics::{
    AnalyticsConfig, BatchConfig, LlmConfig, MergeConfig, DEFAULT_CONFIG_PATH, ENV_CONFIG_PATH,
};
