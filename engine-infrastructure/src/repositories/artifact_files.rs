// File-backed model artifact and checkpoint stores.
// One JSON file per model version, one per job checkpoint. Artifacts are
// write-once; checkpoints are small and rewritten atomically enough for
// a single-writer batch job.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::info;

use engine_domain::entities::{JobCheckpoint, ModelArtifact};
use engine_domain::ports::{CheckpointStore, ModelArtifactStore};

fn file_name_for(key: &str) -> Result<String> {
    if key.is_empty()
        || key
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(anyhow!("'{key}' is not a valid file-backed key"));
    }
    Ok(format!("{key}.json"))
}

pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, model_version: &str) -> Result<PathBuf> {
        Ok(self.dir.join(file_name_for(model_version)?))
    }
}

#[async_trait]
impl ModelArtifactStore for FileModelStore {
    async fn save(&self, artifact: &ModelArtifact) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&artifact.model_version)?;
        if fs::try_exists(&path).await? {
            return Err(anyhow!(
                "model version '{}' already exists at {}",
                artifact.model_version,
                path.display()
            ));
        }
        let json = serde_json::to_vec_pretty(artifact)?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("writing model artifact {}", path.display()))?;
        info!(version = %artifact.model_version, path = %path.display(), "model artifact written");
        Ok(())
    }

    async fn load(&self, model_version: &str) -> Result<Option<ModelArtifact>> {
        let path = self.path_for(model_version)?;
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        let artifact = serde_json::from_str(&content)
            .with_context(|| format!("parsing model artifact {}", path.display()))?;
        Ok(Some(artifact))
    }
}

pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, job: &str) -> Result<PathBuf> {
        Ok(self.dir.join(file_name_for(job)?))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, job: &str) -> Result<Option<JobCheckpoint>> {
        let path = self.path_for(job)?;
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        let checkpoint = serde_json::from_str(&content)
            .with_context(|| format!("parsing checkpoint {}", path.display()))?;
        Ok(Some(checkpoint))
    }

    async fn save(&self, checkpoint: &JobCheckpoint) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&checkpoint.job)?;
        let json = serde_json::to_vec_pretty(checkpoint)?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("writing checkpoint {}", path.display()))?;
        Ok(())
    }

    async fn clear(&self, job: &str) -> Result<()> {
        let path = self.path_for(job)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
