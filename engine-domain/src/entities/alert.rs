// Alert entity
// At most one alert per (entity_id, bucket_start); validation fields are
// mutated only by the external review workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::Severity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub entity_id: String,
    pub bucket_start: DateTime<Utc>,
    pub anomaly_type: String,
    pub severity: Severity,
    pub score: f64,
    pub expected_amount: f64,
    pub observed_amount: f64,
    pub deviation_in_sigma: f64,
    pub description: String,
    pub reasons: Vec<String>,
    pub model_version: String,
    pub detected_at: DateTime<Utc>,
    pub validated: bool,
    pub validated_by: Option<String>,
    pub validated_at: Option<DateTime<Utc>>,
}

/// Read-path filter used by the dashboard listing.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub min_severity: Option<Severity>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub entity_id: Option<String>,
    pub limit: usize,
}
