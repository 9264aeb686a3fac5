// Model artifact entity
// Immutable, versioned bundle of forest + normalization + score mapping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::isolation::IsolationForest;

/// Isolation forest hyperparameters. Contamination only calibrates the
/// score mapping; it never changes tree construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    pub tree_count: usize,
    pub contamination: f64,
    pub feature_fraction: f64,
    pub max_tree_samples: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            tree_count: 200,
            contamination: 0.01,
            feature_fraction: 0.8,
            max_tree_samples: 256,
            seed: 42,
        }
    }
}

/// Per-feature standardization parameters fitted on the training sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Normalization {
    pub means: Vec<f64>,
    pub stddevs: Vec<f64>,
}

/// Maps raw isolation scores onto the fixed 0-100 scale. `threshold_raw`
/// is the (1 - contamination) quantile of raw training scores and lands on
/// 50, the alerting decision boundary; `max_raw` lands on 100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreMapping {
    pub threshold_raw: f64,
    pub max_raw: f64,
}

impl ScoreMapping {
    pub fn apply(&self, raw: f64) -> f64 {
        let mapped = if raw < self.threshold_raw {
            if self.threshold_raw > 0.0 {
                50.0 * raw / self.threshold_raw
            } else {
                0.0
            }
        } else if self.max_raw > self.threshold_raw {
            50.0 + 50.0 * (raw - self.threshold_raw) / (self.max_raw - self.threshold_raw)
        } else {
            100.0
        };
        mapped.clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub rows: usize,
    pub entities: usize,
    pub data_from: Option<DateTime<Utc>>,
    pub data_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_version: String,
    pub trained_at: DateTime<Utc>,
    pub config: ForestConfig,
    pub feature_names: Vec<String>,
    pub imputation_medians: Vec<f64>,
    pub normalization: Normalization,
    pub forest: IsolationForest,
    pub score_mapping: ScoreMapping,
    pub metadata: TrainingMetadata,
}
