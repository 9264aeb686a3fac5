// Model training job
// Pulls a deterministic hash-ordered sample of feature rows, fits the
// isolation forest with its imputation/normalization/score-mapping
// companions and persists the artifact under an immutable version.

use chrono::Utc;
use tracing::info;

use engine_domain::entities::ForestConfig;
use engine_domain::services::scorer::train_model as fit_model;

use crate::dtos::JobSummary;
use crate::error::AppError;
use crate::jobs::{retry_delay, retry_with_backoff};
use crate::state::AppState;

#[derive(Debug, Clone, Default)]
pub struct TrainModelRequest {
    pub model_version: String,
    pub sample_size: Option<usize>,
    pub contamination: Option<f64>,
    pub seed: Option<u64>,
}

pub async fn train_model(
    state: &AppState,
    request: &TrainModelRequest,
) -> Result<JobSummary, AppError> {
    let version = request.model_version.trim();
    if version.is_empty() {
        return Err(AppError::InvalidInput("model version must not be empty".to_string()));
    }
    let contamination = request.contamination.unwrap_or(state.config.contamination);
    if !(contamination > 0.0 && contamination <= 0.5) {
        return Err(AppError::InvalidInput(format!(
            "contamination {contamination} must be in (0, 0.5]"
        )));
    }

    // Artifacts are immutable; retraining a version is always a new version.
    if state.model_store.load(version).await?.is_some() {
        return Err(AppError::InvalidInput(format!(
            "model version '{version}' already exists"
        )));
    }

    let sample_size = request.sample_size.unwrap_or(state.config.sample_size).max(1);
    let rows = state.feature_repo.sample_features(sample_size).await?;
    info!(rows = rows.len(), %version, "training isolation forest");

    let config = ForestConfig {
        tree_count: state.config.tree_count,
        contamination,
        feature_fraction: state.config.feature_fraction,
        max_tree_samples: state.config.max_tree_samples,
        seed: request.seed.unwrap_or(state.config.seed),
    };
    let artifact = fit_model(&rows, config, version, Utc::now())
        .map_err(|error| AppError::InvalidInput(error.to_string()))?;

    retry_with_backoff(
        state.config.retry_attempts,
        retry_delay(state),
        "save_artifact",
        || state.model_store.save(&artifact),
    )
    .await?;
    info!(%version, trees = state.config.tree_count, "model artifact saved");

    Ok(JobSummary {
        rows_processed: rows.len() as u64,
        ..JobSummary::default()
    })
}
