// Runtime configuration value objects
// Built by the infrastructure config loader, consumed by the batch commands

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub operation_type: String,
    pub timezone_offset_minutes: i32,
    pub chunk_size: usize,
    pub batch_size: usize,
    pub score_chunk_rows: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub sample_size: usize,
    pub tree_count: usize,
    pub contamination: f64,
    pub feature_fraction: f64,
    pub max_tree_samples: usize,
    pub seed: u64,
    pub severity_medium: f64,
    pub severity_high: f64,
    pub severity_critical: f64,
    pub top_reasons: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            operation_type: "dispense".to_string(),
            timezone_offset_minutes: 0,
            chunk_size: 200,
            batch_size: 5_000,
            score_chunk_rows: 50_000,
            retry_attempts: 3,
            retry_base_delay_ms: 250,
            sample_size: 2_000_000,
            tree_count: 200,
            contamination: 0.01,
            feature_fraction: 0.8,
            max_tree_samples: 256,
            seed: 42,
            severity_medium: 50.0,
            severity_high: 70.0,
            severity_critical: 90.0,
            top_reasons: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub clickhouse_url: String,
    pub clickhouse_database: String,
    pub clickhouse_user: Option<String>,
    pub clickhouse_password: Option<String>,
}
