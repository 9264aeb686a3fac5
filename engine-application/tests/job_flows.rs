// Batch job flows exercised against in-memory ports: idempotent upserts,
// checkpoint resume, write retries and model version pinning.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use engine_application::commands::{
    build_features, score, train_model, BuildFeaturesRequest, ScoreRequest, TrainModelRequest,
    BUILD_FEATURES_JOB,
};
use engine_application::{AppError, AppState};
use engine_domain::entities::{
    Alert, AlertFilter, BucketAggregate, BucketRange, ForestConfig, JobCheckpoint, ModelArtifact,
    TemporalFeatureRow, TerminalInfo,
};
use engine_domain::ports::{
    AlertRepository, BucketAggregateReader, CheckpointStore, FeatureRepository, ModelArtifactStore,
    TerminalRepository,
};
use engine_domain::services::feature_builder::{FeatureBuilderConfig, TemporalFeatureBuilder};
use engine_domain::services::scorer::train_model as fit_model;
use engine_domain::RuntimeConfig;

type FeatureKey = (String, DateTime<Utc>);

#[derive(Default)]
struct FakeBucketReader {
    buckets: HashMap<String, Vec<BucketAggregate>>,
    fetch_calls: AtomicU32,
}

#[async_trait]
impl BucketAggregateReader for FakeBucketReader {
    async fn list_entities(
        &self,
        _operation_type: &str,
        _range: &BucketRange,
    ) -> anyhow::Result<Vec<String>> {
        let mut entities: Vec<String> = self.buckets.keys().cloned().collect();
        entities.sort();
        Ok(entities)
    }

    async fn fetch_buckets(
        &self,
        entity_id: &str,
        _operation_type: &str,
        range: &BucketRange,
    ) -> anyhow::Result<Vec<BucketAggregate>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .buckets
            .get(entity_id)
            .map(|buckets| {
                buckets
                    .iter()
                    .filter(|bucket| range.contains(bucket.bucket_start))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Default)]
struct FakeFeatureRepo {
    rows: Mutex<BTreeMap<FeatureKey, TemporalFeatureRow>>,
    // Entity whose writes fail, simulating a flaky store.
    fail_entity: Mutex<Option<String>>,
    // Next N upsert calls fail regardless of content.
    fail_next: AtomicU32,
    upsert_calls: AtomicU32,
}

impl FakeFeatureRepo {
    fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl FeatureRepository for FakeFeatureRepo {
    async fn upsert_features(&self, rows: &[TemporalFeatureRow]) -> anyhow::Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(anyhow!("simulated transient failure"));
        }
        if let Some(entity) = self.fail_entity.lock().unwrap().as_deref() {
            if rows.iter().any(|row| row.entity_id == entity) {
                return Err(anyhow!("simulated store outage"));
            }
        }
        let mut store = self.rows.lock().unwrap();
        for row in rows {
            store.insert((row.entity_id.clone(), row.bucket_start), row.clone());
        }
        Ok(())
    }

    async fn count_features(&self) -> anyhow::Result<u64> {
        Ok(self.len() as u64)
    }

    async fn sample_features(&self, limit: usize) -> anyhow::Result<Vec<TemporalFeatureRow>> {
        Ok(self.rows.lock().unwrap().values().take(limit).cloned().collect())
    }

    async fn fetch_features_page(
        &self,
        offset: u64,
        limit: u64,
    ) -> anyhow::Result<Vec<TemporalFeatureRow>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct FakeAlertRepo {
    alerts: Mutex<BTreeMap<FeatureKey, Alert>>,
    // After this many successful writes, every call fails.
    fail_after: Mutex<Option<u32>>,
    calls: AtomicU32,
}

impl FakeAlertRepo {
    fn len(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

#[async_trait]
impl AlertRepository for FakeAlertRepo {
    async fn upsert_alerts(&self, alerts: &[Alert]) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.fail_after.lock().unwrap() {
            if call >= limit {
                return Err(anyhow!("simulated alert store outage"));
            }
        }
        let mut store = self.alerts.lock().unwrap();
        for alert in alerts {
            store.insert((alert.entity_id.clone(), alert.bucket_start), alert.clone());
        }
        Ok(())
    }

    async fn fetch_alerts(&self, filter: &AlertFilter) -> anyhow::Result<Vec<Alert>> {
        let store = self.alerts.lock().unwrap();
        Ok(store
            .values()
            .filter(|alert| {
                filter
                    .min_severity
                    .map_or(true, |severity| alert.severity >= severity)
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct FakeTerminalRepo;

#[async_trait]
impl TerminalRepository for FakeTerminalRepo {
    async fn fetch_terminals(&self) -> anyhow::Result<HashMap<String, TerminalInfo>> {
        Ok(HashMap::new())
    }
}

#[derive(Default)]
struct FakeModelStore {
    artifacts: Mutex<HashMap<String, ModelArtifact>>,
}

#[async_trait]
impl ModelArtifactStore for FakeModelStore {
    async fn save(&self, artifact: &ModelArtifact) -> anyhow::Result<()> {
        let mut store = self.artifacts.lock().unwrap();
        if store.contains_key(&artifact.model_version) {
            return Err(anyhow!("version exists"));
        }
        store.insert(artifact.model_version.clone(), artifact.clone());
        Ok(())
    }

    async fn load(&self, model_version: &str) -> anyhow::Result<Option<ModelArtifact>> {
        Ok(self.artifacts.lock().unwrap().get(model_version).cloned())
    }
}

#[derive(Default)]
struct FakeCheckpointStore {
    checkpoints: Mutex<HashMap<String, JobCheckpoint>>,
}

impl FakeCheckpointStore {
    fn completed(&self, job: &str) -> Option<u64> {
        self.checkpoints
            .lock()
            .unwrap()
            .get(job)
            .map(|checkpoint| checkpoint.completed_chunks)
    }
}

#[async_trait]
impl CheckpointStore for FakeCheckpointStore {
    async fn load(&self, job: &str) -> anyhow::Result<Option<JobCheckpoint>> {
        Ok(self.checkpoints.lock().unwrap().get(job).cloned())
    }

    async fn save(&self, checkpoint: &JobCheckpoint) -> anyhow::Result<()> {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(checkpoint.job.clone(), checkpoint.clone());
        Ok(())
    }

    async fn clear(&self, job: &str) -> anyhow::Result<()> {
        self.checkpoints.lock().unwrap().remove(job);
        Ok(())
    }
}

struct Harness {
    state: AppState,
    bucket_reader: Arc<FakeBucketReader>,
    feature_repo: Arc<FakeFeatureRepo>,
    alert_repo: Arc<FakeAlertRepo>,
    model_store: Arc<FakeModelStore>,
    checkpoint_store: Arc<FakeCheckpointStore>,
}

fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        chunk_size: 1,
        batch_size: 10,
        score_chunk_rows: 4,
        retry_attempts: 3,
        retry_base_delay_ms: 1,
        sample_size: 10_000,
        tree_count: 20,
        contamination: 0.1,
        max_tree_samples: 64,
        seed: 1,
        ..RuntimeConfig::default()
    }
}

fn harness(buckets: HashMap<String, Vec<BucketAggregate>>, config: RuntimeConfig) -> Harness {
    let bucket_reader = Arc::new(FakeBucketReader {
        buckets,
        fetch_calls: AtomicU32::new(0),
    });
    let feature_repo = Arc::new(FakeFeatureRepo::default());
    let alert_repo = Arc::new(FakeAlertRepo::default());
    let model_store = Arc::new(FakeModelStore::default());
    let checkpoint_store = Arc::new(FakeCheckpointStore::default());
    let state = AppState {
        config,
        bucket_reader: bucket_reader.clone(),
        feature_repo: feature_repo.clone(),
        alert_repo: alert_repo.clone(),
        terminal_repo: Arc::new(FakeTerminalRepo),
        model_store: model_store.clone(),
        checkpoint_store: checkpoint_store.clone(),
    };
    Harness {
        state,
        bucket_reader,
        feature_repo,
        alert_repo,
        model_store,
        checkpoint_store,
    }
}

fn bucket(entity: &str, at: DateTime<Utc>, amount: f64) -> BucketAggregate {
    BucketAggregate {
        entity_id: entity.to_string(),
        bucket_start: at,
        operation_type: "dispense".to_string(),
        transaction_count: 2,
        amount_sum: amount,
        amount_mean: amount / 2.0,
        amount_max: amount,
        amount_min: 0.0,
        amount_stddev: 1.0,
    }
}

fn seeded_buckets(entities: &[&str], per_entity: usize) -> HashMap<String, Vec<BucketAggregate>> {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    entities
        .iter()
        .map(|&entity| {
            let series = (0..per_entity)
                .map(|i| {
                    let amount = 100.0 + (i % 4) as f64 * 7.0;
                    bucket(entity, start + Duration::minutes(15 * i as i64), amount)
                })
                .collect();
            (entity.to_string(), series)
        })
        .collect()
}

fn feature_rows(entity: &str, buckets: &[BucketAggregate]) -> Vec<TemporalFeatureRow> {
    let mut builder =
        TemporalFeatureBuilder::new(FeatureBuilderConfig::default(), Utc::now());
    builder.build(entity, buckets).rows
}

fn fitted_artifact(rows: &[TemporalFeatureRow], version: &str) -> ModelArtifact {
    let config = ForestConfig {
        tree_count: 20,
        contamination: 0.1,
        max_tree_samples: 64,
        seed: 1,
        ..ForestConfig::default()
    };
    fit_model(rows, config, version, Utc::now()).unwrap()
}

#[tokio::test]
async fn rebuilding_features_is_idempotent() {
    let harness = harness(seeded_buckets(&["A1", "B1", "C1"], 8), test_config());
    let request = BuildFeaturesRequest::default();

    let first = build_features(&harness.state, &request).await.unwrap();
    assert_eq!(first.rows_processed, 24);
    assert_eq!(harness.feature_repo.len(), 24);
    // Completed runs leave no checkpoint behind.
    assert_eq!(harness.checkpoint_store.completed(BUILD_FEATURES_JOB), None);

    let second = build_features(&harness.state, &request).await.unwrap();
    assert_eq!(second.rows_processed, 24);
    assert_eq!(harness.feature_repo.len(), 24, "rerun must not duplicate rows");
}

#[tokio::test]
async fn interrupted_run_resumes_past_committed_chunks() {
    let harness = harness(seeded_buckets(&["A1", "B1", "C1"], 8), test_config());
    *harness.feature_repo.fail_entity.lock().unwrap() = Some("B1".to_string());

    let partial = build_features(&harness.state, &BuildFeaturesRequest::default())
        .await
        .unwrap();
    assert!(partial.rows_failed > 0);
    assert!(partial.first_error.is_some());
    // Chunk A1 committed before the outage hit chunk B1.
    assert_eq!(harness.checkpoint_store.completed(BUILD_FEATURES_JOB), Some(1));
    assert_eq!(harness.feature_repo.len(), 8);

    *harness.feature_repo.fail_entity.lock().unwrap() = None;
    let fetched_before = harness.bucket_reader.fetch_calls.load(Ordering::SeqCst);
    let resumed = build_features(
        &harness.state,
        &BuildFeaturesRequest {
            resume: true,
            ..BuildFeaturesRequest::default()
        },
    )
    .await
    .unwrap();
    assert!(resumed.succeeded());
    assert_eq!(harness.feature_repo.len(), 24);
    // Only the two uncommitted entities were refetched.
    let fetched = harness.bucket_reader.fetch_calls.load(Ordering::SeqCst) - fetched_before;
    assert_eq!(fetched, 2);
    assert_eq!(harness.checkpoint_store.completed(BUILD_FEATURES_JOB), None);
}

#[tokio::test]
async fn transient_write_failures_are_retried() {
    let harness = harness(seeded_buckets(&["A1"], 6), test_config());
    harness.feature_repo.fail_next.store(2, Ordering::SeqCst);

    let summary = build_features(&harness.state, &BuildFeaturesRequest::default())
        .await
        .unwrap();
    assert!(summary.succeeded(), "two transient failures fit in three attempts");
    assert_eq!(summary.rows_processed, 6);
    assert_eq!(harness.feature_repo.upsert_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_abort_with_first_error() {
    let harness = harness(seeded_buckets(&["A1"], 6), test_config());
    // More consecutive failures than retry_attempts allows.
    harness.feature_repo.fail_next.store(10, Ordering::SeqCst);

    let summary = build_features(&harness.state, &BuildFeaturesRequest::default())
        .await
        .unwrap();
    assert!(!summary.succeeded());
    assert_eq!(summary.rows_processed, 0);
    assert_eq!(summary.rows_failed, 6);
    let message = summary.first_error.unwrap();
    assert!(message.contains("3 attempts"), "got: {message}");
}

#[tokio::test]
async fn scoring_requires_a_known_model_version() {
    let harness = harness(seeded_buckets(&["A1"], 6), test_config());
    let request = ScoreRequest {
        model_version: "v-missing".to_string(),
        resume: false,
    };
    let error = score(&harness.state, &request).await.unwrap_err();
    assert!(matches!(error, AppError::ModelVersionMismatch(version) if version == "v-missing"));
}

#[tokio::test]
async fn rescoring_overwrites_alerts_instead_of_duplicating() {
    let buckets = seeded_buckets(&["A1", "B1"], 8);
    // Alert on everything so overwrite semantics are visible.
    let mut config = test_config();
    config.severity_medium = 0.0;
    let harness = harness(buckets.clone(), config);

    for (entity, series) in &buckets {
        harness
            .feature_repo
            .upsert_features(&feature_rows(entity, series))
            .await
            .unwrap();
    }
    let training = harness.feature_repo.sample_features(10_000).await.unwrap();
    harness
        .model_store
        .save(&fitted_artifact(&training, "v1"))
        .await
        .unwrap();

    let request = ScoreRequest {
        model_version: "v1".to_string(),
        resume: false,
    };
    let first = score(&harness.state, &request).await.unwrap();
    assert_eq!(first.rows_processed, 16);
    assert_eq!(first.alerts_emitted, 16);
    assert_eq!(harness.alert_repo.len(), 16);

    let second = score(&harness.state, &request).await.unwrap();
    assert_eq!(second.alerts_emitted, 16);
    assert_eq!(harness.alert_repo.len(), 16, "rescoring must not duplicate alerts");
}

#[tokio::test]
async fn aborted_score_chunk_counts_only_unwritten_alerts_as_failed() {
    let buckets = seeded_buckets(&["A1"], 8);
    // Two alert slices per chunk, alert on everything.
    let mut config = test_config();
    config.severity_medium = 0.0;
    config.batch_size = 2;
    let harness = harness(buckets.clone(), config);

    for (entity, series) in &buckets {
        harness
            .feature_repo
            .upsert_features(&feature_rows(entity, series))
            .await
            .unwrap();
    }
    let training = harness.feature_repo.sample_features(10_000).await.unwrap();
    harness
        .model_store
        .save(&fitted_artifact(&training, "v1"))
        .await
        .unwrap();

    // First slice lands, then the store goes down for good.
    *harness.alert_repo.fail_after.lock().unwrap() = Some(1);
    let summary = score(
        &harness.state,
        &ScoreRequest {
            model_version: "v1".to_string(),
            resume: false,
        },
    )
    .await
    .unwrap();

    assert!(!summary.succeeded());
    assert_eq!(harness.alert_repo.len(), 2, "first slice committed before the outage");
    assert_eq!(summary.alerts_emitted, 2);
    assert_eq!(summary.rows_failed, 2, "only the unwritten slice counts as failed");
    assert!(summary.first_error.unwrap().contains("3 attempts"));
}

#[tokio::test]
async fn training_rejects_duplicate_versions_and_empty_stores() {
    let harness = harness(HashMap::new(), test_config());

    let empty = train_model(
        &harness.state,
        &TrainModelRequest {
            model_version: "v1".to_string(),
            ..TrainModelRequest::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(empty, AppError::InvalidInput(_)));

    let series = seeded_buckets(&["A1"], 12).remove("A1").unwrap();
    harness
        .feature_repo
        .upsert_features(&feature_rows("A1", &series))
        .await
        .unwrap();
    let summary = train_model(
        &harness.state,
        &TrainModelRequest {
            model_version: "v1".to_string(),
            ..TrainModelRequest::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(summary.rows_processed, 12);
    assert!(harness.model_store.load("v1").await.unwrap().is_some());

    let duplicate = train_model(
        &harness.state,
        &TrainModelRequest {
            model_version: "v1".to_string(),
            ..TrainModelRequest::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(duplicate, AppError::InvalidInput(_)));
}
