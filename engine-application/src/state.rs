use std::sync::Arc;

use engine_domain::ports::{
    AlertRepository, BucketAggregateReader, CheckpointStore, FeatureRepository, ModelArtifactStore,
    TerminalRepository,
};
use engine_domain::RuntimeConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: RuntimeConfig,
    pub bucket_reader: Arc<dyn BucketAggregateReader>,
    pub feature_repo: Arc<dyn FeatureRepository>,
    pub alert_repo: Arc<dyn AlertRepository>,
    pub terminal_repo: Arc<dyn TerminalRepository>,
    pub model_store: Arc<dyn ModelArtifactStore>,
    pub checkpoint_store: Arc<dyn CheckpointStore>,
}
