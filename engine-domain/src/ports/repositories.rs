use std::collections::HashMap;

use async_trait::async_trait;

use crate::entities::{
    Alert,
    AlertFilter,
    BucketAggregate,
    BucketRange,
    JobCheckpoint,
    ModelArtifact,
    TemporalFeatureRow,
    TerminalInfo,
};

/// Read access to the pre-aggregated dispense bucket store.
#[async_trait]
pub trait BucketAggregateReader: Send + Sync {
    /// Distinct entity ids with at least one bucket in the range, ascending.
    async fn list_entities(
        &self,
        operation_type: &str,
        range: &BucketRange,
    ) -> anyhow::Result<Vec<String>>;

    /// One entity's buckets, strictly ascending by bucket_start.
    async fn fetch_buckets(
        &self,
        entity_id: &str,
        operation_type: &str,
        range: &BucketRange,
    ) -> anyhow::Result<Vec<BucketAggregate>>;
}

/// Feature store with upsert-by-unique-key semantics on (entity, bucket).
#[async_trait]
pub trait FeatureRepository: Send + Sync {
    async fn upsert_features(&self, rows: &[TemporalFeatureRow]) -> anyhow::Result<()>;
    async fn count_features(&self) -> anyhow::Result<u64>;

    /// Deterministic hash-ordered sample used for training.
    async fn sample_features(&self, limit: usize) -> anyhow::Result<Vec<TemporalFeatureRow>>;

    /// Page ordered by (entity_id, bucket_start) for chunked scoring.
    async fn fetch_features_page(
        &self,
        offset: u64,
        limit: u64,
    ) -> anyhow::Result<Vec<TemporalFeatureRow>>;
}

/// Alert store; upsert overwrites on the (entity, bucket) key.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn upsert_alerts(&self, alerts: &[Alert]) -> anyhow::Result<()>;
    async fn fetch_alerts(&self, filter: &AlertFilter) -> anyhow::Result<Vec<Alert>>;
}

/// Read-only lookup from entity id to static terminal attributes.
#[async_trait]
pub trait TerminalRepository: Send + Sync {
    async fn fetch_terminals(&self) -> anyhow::Result<HashMap<String, TerminalInfo>>;
}

/// Versioned, immutable model artifact persistence.
#[async_trait]
pub trait ModelArtifactStore: Send + Sync {
    /// Fails when the version already exists; artifacts are never mutated.
    async fn save(&self, artifact: &ModelArtifact) -> anyhow::Result<()>;
    async fn load(&self, model_version: &str) -> anyhow::Result<Option<ModelArtifact>>;
}

/// Chunk-level progress persistence for resumable batch jobs.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, job: &str) -> anyhow::Result<Option<JobCheckpoint>>;
    async fn save(&self, checkpoint: &JobCheckpoint) -> anyhow::Result<()>;
    async fn clear(&self, job: &str) -> anyhow::Result<()>;
}
