// Anomaly scorer
// Training fits imputation medians, standardization parameters, the
// isolation ensemble and the score mapping in one bulk pass; scoring
// applies the frozen artifact to any feature row.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::entities::{
    AnomalyScore,
    FeatureContribution,
    ForestConfig,
    ModelArtifact,
    Normalization,
    ScoreMapping,
    TemporalFeatureRow,
    TrainingMetadata,
    FEATURE_NAMES,
};
use crate::services::isolation::IsolationForest;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("training sample is empty")]
    EmptySample,
}

/// Fits a complete model artifact from a sampled set of feature rows.
/// Deterministic for a fixed sample, config and seed; `trained_at` is
/// metadata only and never influences the fit.
pub fn train_model(
    rows: &[TemporalFeatureRow],
    config: ForestConfig,
    model_version: &str,
    trained_at: DateTime<Utc>,
) -> Result<ModelArtifact, TrainingError> {
    if rows.is_empty() {
        return Err(TrainingError::EmptySample);
    }

    let sparse: Vec<Vec<Option<f64>>> = rows.iter().map(TemporalFeatureRow::feature_vector).collect();
    let dims = FEATURE_NAMES.len();

    let medians = column_medians(&sparse, dims);
    let dense: Vec<Vec<f64>> = sparse
        .iter()
        .map(|row| impute(row, &medians))
        .collect();

    let normalization = fit_normalization(&dense, dims);
    let standardized: Vec<Vec<f64>> = dense
        .iter()
        .map(|row| standardize(row, &normalization))
        .collect();

    let forest = IsolationForest::fit(&standardized, &config);

    let mut raw_scores: Vec<f64> = standardized.iter().map(|row| forest.raw_score(row)).collect();
    raw_scores.sort_by(|a, b| a.total_cmp(b));
    let threshold_raw = quantile(&raw_scores, 1.0 - config.contamination);
    let max_raw = raw_scores.last().copied().unwrap_or(threshold_raw);

    let mut entities: Vec<&str> = rows.iter().map(|row| row.entity_id.as_str()).collect();
    entities.sort_unstable();
    entities.dedup();

    Ok(ModelArtifact {
        model_version: model_version.to_string(),
        trained_at,
        config,
        feature_names: FEATURE_NAMES.iter().map(|name| name.to_string()).collect(),
        imputation_medians: medians,
        normalization,
        forest,
        score_mapping: ScoreMapping {
            threshold_raw,
            max_raw,
        },
        metadata: TrainingMetadata {
            rows: rows.len(),
            entities: entities.len(),
            data_from: rows.iter().map(|row| row.bucket_start).min(),
            data_to: rows.iter().map(|row| row.bucket_start).max(),
        },
    })
}

pub struct AnomalyScorer {
    artifact: ModelArtifact,
}

impl AnomalyScorer {
    pub fn new(artifact: ModelArtifact) -> Self {
        Self { artifact }
    }

    pub fn model_version(&self) -> &str {
        &self.artifact.model_version
    }

    /// Scores one row against the loaded artifact. Nulls are imputed with
    /// the training medians before the forest sees the vector.
    pub fn score_row(&self, row: &TemporalFeatureRow) -> AnomalyScore {
        let sparse = row.feature_vector();
        let dense = impute(&sparse, &self.artifact.imputation_medians);
        let standardized = standardize(&dense, &self.artifact.normalization);

        let raw = self.artifact.forest.raw_score(&standardized);
        let score = self.artifact.score_mapping.apply(raw);

        let mut contributing_features: Vec<FeatureContribution> = self
            .artifact
            .feature_names
            .iter()
            .enumerate()
            .map(|(i, name)| FeatureContribution {
                feature_name: name.clone(),
                value: dense[i],
                baseline_mean: self.artifact.normalization.means[i],
                magnitude: standardized[i].abs(),
            })
            .collect();
        contributing_features.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));

        AnomalyScore {
            entity_id: row.entity_id.clone(),
            bucket_start: row.bucket_start,
            model_version: self.artifact.model_version.clone(),
            score,
            contributing_features,
        }
    }
}

fn column_medians(rows: &[Vec<Option<f64>>], dims: usize) -> Vec<f64> {
    (0..dims)
        .map(|col| {
            let mut values: Vec<f64> = rows.iter().filter_map(|row| row[col]).collect();
            if values.is_empty() {
                return 0.0;
            }
            values.sort_by(|a, b| a.total_cmp(b));
            let mid = values.len() / 2;
            if values.len() % 2 == 1 {
                values[mid]
            } else {
                (values[mid - 1] + values[mid]) / 2.0
            }
        })
        .collect()
}

fn impute(row: &[Option<f64>], medians: &[f64]) -> Vec<f64> {
    row.iter()
        .zip(medians)
        .map(|(value, median)| value.unwrap_or(*median))
        .collect()
}

fn fit_normalization(rows: &[Vec<f64>], dims: usize) -> Normalization {
    let n = rows.len() as f64;
    let mut means = vec![0.0; dims];
    for row in rows {
        for (mean, value) in means.iter_mut().zip(row) {
            *mean += value / n;
        }
    }
    let mut stddevs = vec![0.0; dims];
    for row in rows {
        for ((stddev, value), mean) in stddevs.iter_mut().zip(row).zip(&means) {
            *stddev += (value - mean).powi(2) / n;
        }
    }
    for stddev in &mut stddevs {
        *stddev = stddev.sqrt();
        // Constant columns pass through unscaled instead of dividing by 0.
        if *stddev < 1e-12 {
            *stddev = 1.0;
        }
    }
    Normalization { means, stddevs }
}

fn standardize(row: &[f64], normalization: &Normalization) -> Vec<f64> {
    row.iter()
        .zip(&normalization.means)
        .zip(&normalization.stddevs)
        .map(|((value, mean), stddev)| (value - mean) / stddev)
        .collect()
}

/// Linear-interpolation quantile over an ascending-sorted slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let q = q.clamp(0.0, 1.0);
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let fraction = position - lower as f64;
        sorted[lower] * (1.0 - fraction) + sorted[upper] * fraction
    }
}
