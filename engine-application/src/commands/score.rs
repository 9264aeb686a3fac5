// Scoring job
// Streams the feature store in fixed-size pages, scores each row against
// one pinned model version and upserts the resulting alerts. Pages are
// checkpointed like feature chunks; rescoring the same rows overwrites
// alerts on the (entity, bucket) key instead of duplicating them.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use engine_domain::services::classifier::{AlertClassifier, ClassifierConfig};
use engine_domain::services::scorer::AnomalyScorer;

use crate::dtos::JobSummary;
use crate::error::AppError;
use crate::jobs::{commit_chunk, resume_point, retry_delay, retry_with_backoff};
use crate::state::AppState;

pub const SCORE_JOB: &str = "score";

#[derive(Debug, Clone, Default)]
pub struct ScoreRequest {
    pub model_version: String,
    pub resume: bool,
}

pub async fn score(state: &AppState, request: &ScoreRequest) -> Result<JobSummary, AppError> {
    let artifact = state
        .model_store
        .load(&request.model_version)
        .await?
        .ok_or_else(|| AppError::ModelVersionMismatch(request.model_version.clone()))?;
    let scorer = AnomalyScorer::new(artifact);
    let classifier = AlertClassifier::new(ClassifierConfig {
        medium_threshold: state.config.severity_medium,
        high_threshold: state.config.severity_high,
        critical_threshold: state.config.severity_critical,
        top_reasons: state.config.top_reasons,
    });

    // Terminal metadata only enriches descriptions; scoring proceeds without it.
    let terminals = match state.terminal_repo.fetch_terminals().await {
        Ok(map) => map,
        Err(error) => {
            warn!(%error, "terminal metadata unavailable, alerts omit location");
            HashMap::new()
        }
    };

    let total = state.feature_repo.count_features().await?;
    let chunk_rows = state.config.score_chunk_rows.max(1);
    let total_chunks = total.div_ceil(chunk_rows);
    let start = resume_point(state, SCORE_JOB, request.resume).await?;
    let detected_at = Utc::now();
    let mut summary = JobSummary::default();

    for chunk_index in start..total_chunks {
        let rows = state
            .feature_repo
            .fetch_features_page(chunk_index * chunk_rows, chunk_rows)
            .await?;
        if rows.is_empty() {
            break;
        }

        let mut alerts = Vec::new();
        for row in &rows {
            let scored = scorer.score_row(row);
            if let Some(alert) =
                classifier.classify(row, &scored, terminals.get(&row.entity_id), detected_at)
            {
                alerts.push(alert);
            }
        }

        let mut written = 0usize;
        for slice in alerts.chunks(state.config.batch_size.max(1)) {
            let write = retry_with_backoff(
                state.config.retry_attempts,
                retry_delay(state),
                "upsert_alerts",
                || state.alert_repo.upsert_alerts(slice),
            )
            .await;
            if let Err(error) = write {
                // Earlier slices of this chunk are already durable; only
                // the alerts that never landed count as failures.
                summary.alerts_emitted += written as u64;
                summary.rows_failed += (alerts.len() - written) as u64;
                summary.record_error(error.to_string());
                warn!(chunk = chunk_index, %error, "aborting scoring run");
                return Ok(summary);
            }
            written += slice.len();
        }

        summary.rows_processed += rows.len() as u64;
        summary.alerts_emitted += alerts.len() as u64;
        commit_chunk(state, SCORE_JOB, chunk_index + 1).await?;
        info!(
            chunk = chunk_index + 1,
            of = total_chunks,
            alerts = alerts.len(),
            "score chunk committed"
        );
    }

    state.checkpoint_store.clear(SCORE_JOB).await?;
    info!(
        rows = summary.rows_processed,
        alerts = summary.alerts_emitted,
        model = %request.model_version,
        "scoring complete"
    );
    Ok(summary)
}
