// Anomaly score entity
// Produced by the scorer per feature row; only persisted when an alert fires

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One feature's share of an anomaly score, measured as the absolute
/// deviation from the training mean in training-stddev units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature_name: String,
    pub value: f64,
    pub baseline_mean: f64,
    pub magnitude: f64,
}

/// Continuous outlier score on the 0-100 scale (higher = more anomalous).
/// Only comparable between scores carrying the same `model_version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub entity_id: String,
    pub bucket_start: DateTime<Utc>,
    pub model_version: String,
    pub score: f64,
    pub contributing_features: Vec<FeatureContribution>,
}
