// Shared batch-job plumbing: write retries and chunk checkpoints.

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use tracing::{info, warn};

use engine_domain::JobCheckpoint;

use crate::error::AppError;
use crate::state::AppState;

/// Runs a store write with bounded exponential backoff. Transient failures
/// are retried; exhaustion surfaces as `StoreUnavailable` so the caller can
/// abort the current chunk.
pub async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    label: &str,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = attempts.max(1);
    let mut delay = base_delay;
    let mut last_error = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                warn!(%label, attempt, attempts, %error, "store write failed");
                last_error = Some(error);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
        }
    }
    Err(AppError::StoreUnavailable {
        attempts,
        source: last_error.unwrap_or_else(|| anyhow!("no attempts were made")),
    })
}

/// Number of chunks already committed by a previous run of `job`.
/// A fresh run clears any stale checkpoint and starts from zero.
pub async fn resume_point(state: &AppState, job: &str, resume: bool) -> Result<u64, AppError> {
    if !resume {
        state.checkpoint_store.clear(job).await?;
        return Ok(0);
    }
    let completed = state
        .checkpoint_store
        .load(job)
        .await?
        .map_or(0, |checkpoint| checkpoint.completed_chunks);
    if completed > 0 {
        info!(%job, completed, "resuming after committed chunks");
    }
    Ok(completed)
}

/// Marks chunks `0..completed_chunks` as durable. Only called after the
/// chunk's rows are fully written, so a crash never skips unwritten work.
pub async fn commit_chunk(state: &AppState, job: &str, completed_chunks: u64) -> Result<(), AppError> {
    state
        .checkpoint_store
        .save(&JobCheckpoint {
            job: job.to_string(),
            completed_chunks,
            updated_at: Utc::now(),
        })
        .await?;
    Ok(())
}

pub fn retry_delay(state: &AppState) -> Duration {
    Duration::from_millis(state.config.retry_base_delay_ms)
}
