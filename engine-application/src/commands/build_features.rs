// Feature build job
// Walks entities in sorted chunks, rebuilds each entity's full temporal
// feature series from its buckets and upserts the rows. Chunk completion
// is checkpointed so an interrupted run can resume past committed work.

use chrono::Utc;
use tracing::{info, warn};

use engine_domain::entities::BucketRange;
use engine_domain::services::feature_builder::{FeatureBuilderConfig, TemporalFeatureBuilder};

use crate::dtos::JobSummary;
use crate::error::AppError;
use crate::jobs::{commit_chunk, resume_point, retry_delay, retry_with_backoff};
use crate::state::AppState;

pub const BUILD_FEATURES_JOB: &str = "build-features";

#[derive(Debug, Clone, Default)]
pub struct BuildFeaturesRequest {
    /// Restrict to these entities; empty means every entity in range.
    pub entities: Option<Vec<String>>,
    pub range: BucketRange,
    pub resume: bool,
}

pub async fn build_features(
    state: &AppState,
    request: &BuildFeaturesRequest,
) -> Result<JobSummary, AppError> {
    let mut summary = JobSummary::default();
    let operation_type = state.config.operation_type.clone();

    let mut entities = match &request.entities {
        Some(list) if !list.is_empty() => list.clone(),
        _ => {
            state
                .bucket_reader
                .list_entities(&operation_type, &request.range)
                .await?
        }
    };
    // Sorted and deduplicated so chunk indices are stable across runs.
    entities.sort();
    entities.dedup();
    if entities.is_empty() {
        info!("no entities with buckets in range");
        state.checkpoint_store.clear(BUILD_FEATURES_JOB).await?;
        return Ok(summary);
    }

    let chunk_size = state.config.chunk_size.max(1);
    let chunks: Vec<&[String]> = entities.chunks(chunk_size).collect();
    let start = resume_point(state, BUILD_FEATURES_JOB, request.resume).await? as usize;
    let computed_at = Utc::now();
    let builder_config = FeatureBuilderConfig {
        operation_type: operation_type.clone(),
        timezone_offset_minutes: state.config.timezone_offset_minutes,
    };

    for (index, chunk) in chunks.iter().enumerate().skip(start) {
        for entity in chunk.iter() {
            let buckets = state
                .bucket_reader
                .fetch_buckets(entity, &operation_type, &request.range)
                .await?;
            let mut builder = TemporalFeatureBuilder::new(builder_config.clone(), computed_at);
            let batch = builder.build(entity, &buckets);
            summary.rows_skipped += batch.skipped as u64;

            for slice in batch.rows.chunks(state.config.batch_size.max(1)) {
                let write = retry_with_backoff(
                    state.config.retry_attempts,
                    retry_delay(state),
                    "upsert_features",
                    || state.feature_repo.upsert_features(slice),
                )
                .await;
                match write {
                    Ok(()) => summary.rows_processed += slice.len() as u64,
                    Err(error) => {
                        summary.rows_failed += slice.len() as u64;
                        summary.record_error(error.to_string());
                        warn!(%entity, chunk = index, %error, "aborting feature build");
                        return Ok(summary);
                    }
                }
            }
        }
        commit_chunk(state, BUILD_FEATURES_JOB, (index + 1) as u64).await?;
        info!(chunk = index + 1, of = chunks.len(), "feature chunk committed");
    }

    state.checkpoint_store.clear(BUILD_FEATURES_JOB).await?;
    info!(
        rows = summary.rows_processed,
        skipped = summary.rows_skipped,
        "feature build complete"
    );
    Ok(summary)
}
