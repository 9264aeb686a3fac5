use std::env;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tokio::fs;
use tracing::warn;

use engine_domain::{DbConfig, RuntimeConfig};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub clickhouse_url: String,
    pub clickhouse_database: String,
    pub clickhouse_user: Option<String>,
    pub clickhouse_password: Option<String>,
    pub model_dir: String,
    pub checkpoint_dir: String,
    pub operation_type: String,
    pub timezone_offset_minutes: i32,
    pub chunk_size: usize,
    pub batch_size: usize,
    pub score_chunk_rows: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub sample_size: usize,
    pub tree_count: usize,
    pub contamination: f64,
    pub feature_fraction: f64,
    pub max_tree_samples: usize,
    pub seed: u64,
    pub severity_medium: f64,
    pub severity_high: f64,
    pub severity_critical: f64,
    pub top_reasons: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let runtime = RuntimeConfig::default();
        Self {
            clickhouse_url: "http://127.0.0.1:8123".to_string(),
            clickhouse_database: "atmwatch".to_string(),
            clickhouse_user: None,
            clickhouse_password: None,
            model_dir: "./models".to_string(),
            checkpoint_dir: "./checkpoints".to_string(),
            operation_type: runtime.operation_type,
            timezone_offset_minutes: runtime.timezone_offset_minutes,
            chunk_size: runtime.chunk_size,
            batch_size: runtime.batch_size,
            score_chunk_rows: runtime.score_chunk_rows,
            retry_attempts: runtime.retry_attempts,
            retry_base_delay_ms: runtime.retry_base_delay_ms,
            sample_size: runtime.sample_size,
            tree_count: runtime.tree_count,
            contamination: runtime.contamination,
            feature_fraction: runtime.feature_fraction,
            max_tree_samples: runtime.max_tree_samples,
            seed: runtime.seed,
            severity_medium: runtime.severity_medium,
            severity_high: runtime.severity_high,
            severity_critical: runtime.severity_critical,
            top_reasons: runtime.top_reasons,
        }
    }
}

impl AppConfig {
    pub async fn load() -> Result<Self> {
        let path = env::var("ATMWATCH_CONFIG").unwrap_or_else(|_| "./config.toml".to_string());
        let file_path = Path::new(&path);
        let base_dir = file_path.parent();
        if !file_path.exists() {
            warn!("config.toml not found, using defaults");
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            config.resolve_paths(base_dir);
            config.normalize();
            config.validate()?;
            return Ok(config);
        }
        let content = fs::read_to_string(file_path).await?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.resolve_paths(base_dir);
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn normalize(&mut self) {
        if let Some(user) = &self.clickhouse_user {
            if user.trim().is_empty() {
                self.clickhouse_user = None;
            }
        }
        if let Some(password) = &self.clickhouse_password {
            if password.trim().is_empty() {
                self.clickhouse_password = None;
            }
        }
        self.operation_type = self.operation_type.trim().to_string();
    }

    fn resolve_paths(&mut self, base_dir: Option<&Path>) {
        let Some(base) = base_dir else {
            return;
        };
        self.model_dir = resolve_path(base, &self.model_dir);
        self.checkpoint_dir = resolve_path(base, &self.checkpoint_dir);
    }

    pub fn validate(&self) -> Result<()> {
        if self.clickhouse_url.trim().is_empty() {
            return Err(anyhow!("clickhouse_url must not be empty"));
        }
        if self.operation_type.is_empty() {
            return Err(anyhow!("operation_type must not be empty"));
        }
        if self.timezone_offset_minutes.abs() >= 24 * 60 {
            return Err(anyhow!("timezone_offset_minutes out of range"));
        }
        if self.chunk_size == 0 || self.batch_size == 0 || self.score_chunk_rows == 0 {
            return Err(anyhow!("chunk and batch sizes must be greater than 0"));
        }
        if self.retry_attempts == 0 {
            return Err(anyhow!("retry_attempts must be at least 1"));
        }
        if self.tree_count == 0 || self.max_tree_samples == 0 {
            return Err(anyhow!("tree_count and max_tree_samples must be greater than 0"));
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(anyhow!("contamination must be in (0, 0.5]"));
        }
        if !(self.feature_fraction > 0.0 && self.feature_fraction <= 1.0) {
            return Err(anyhow!("feature_fraction must be in (0, 1]"));
        }
        if !(self.severity_medium < self.severity_high
            && self.severity_high < self.severity_critical)
        {
            return Err(anyhow!("severity thresholds must be strictly ascending"));
        }
        if self.top_reasons == 0 {
            return Err(anyhow!("top_reasons must be at least 1"));
        }
        Ok(())
    }

    pub fn to_runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            operation_type: self.operation_type.clone(),
            timezone_offset_minutes: self.timezone_offset_minutes,
            chunk_size: self.chunk_size,
            batch_size: self.batch_size,
            score_chunk_rows: self.score_chunk_rows,
            retry_attempts: self.retry_attempts,
            retry_base_delay_ms: self.retry_base_delay_ms,
            sample_size: self.sample_size,
            tree_count: self.tree_count,
            contamination: self.contamination,
            feature_fraction: self.feature_fraction,
            max_tree_samples: self.max_tree_samples,
            seed: self.seed,
            severity_medium: self.severity_medium,
            severity_high: self.severity_high,
            severity_critical: self.severity_critical,
            top_reasons: self.top_reasons,
        }
    }

    pub fn to_db_config(&self) -> DbConfig {
        DbConfig {
            clickhouse_url: self.clickhouse_url.clone(),
            clickhouse_database: self.clickhouse_database.clone(),
            clickhouse_user: self.clickhouse_user.clone(),
            clickhouse_password: self.clickhouse_password.clone(),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("ATMWATCH_CLICKHOUSE_URL") {
            self.clickhouse_url = value;
        }
        if let Ok(value) = env::var("ATMWATCH_CLICKHOUSE_DATABASE") {
            self.clickhouse_database = value;
        }
        if let Ok(value) = env::var("ATMWATCH_CLICKHOUSE_USER") {
            self.clickhouse_user = Some(value);
        }
        if let Ok(value) = env::var("ATMWATCH_CLICKHOUSE_PASSWORD") {
            self.clickhouse_password = Some(value);
        }
        if let Ok(value) = env::var("ATMWATCH_MODEL_DIR") {
            self.model_dir = value;
        }
        if let Ok(value) = env::var("ATMWATCH_CHECKPOINT_DIR") {
            self.checkpoint_dir = value;
        }
        if let Ok(value) = env::var("ATMWATCH_OPERATION_TYPE") {
            self.operation_type = value;
        }
        if let Ok(value) = env::var("ATMWATCH_TIMEZONE_OFFSET_MINUTES") {
            self.timezone_offset_minutes = value.parse().unwrap_or(self.timezone_offset_minutes);
        }
        if let Ok(value) = env::var("ATMWATCH_CHUNK_SIZE") {
            self.chunk_size = value.parse().unwrap_or(self.chunk_size);
        }
        if let Ok(value) = env::var("ATMWATCH_BATCH_SIZE") {
            self.batch_size = value.parse().unwrap_or(self.batch_size);
        }
        if let Ok(value) = env::var("ATMWATCH_SCORE_CHUNK_ROWS") {
            self.score_chunk_rows = value.parse().unwrap_or(self.score_chunk_rows);
        }
        if let Ok(value) = env::var("ATMWATCH_RETRY_ATTEMPTS") {
            self.retry_attempts = value.parse().unwrap_or(self.retry_attempts);
        }
        if let Ok(value) = env::var("ATMWATCH_RETRY_BASE_DELAY_MS") {
            self.retry_base_delay_ms = value.parse().unwrap_or(self.retry_base_delay_ms);
        }
        if let Ok(value) = env::var("ATMWATCH_SAMPLE_SIZE") {
            self.sample_size = value.parse().unwrap_or(self.sample_size);
        }
        if let Ok(value) = env::var("ATMWATCH_TREE_COUNT") {
            self.tree_count = value.parse().unwrap_or(self.tree_count);
        }
        if let Ok(value) = env::var("ATMWATCH_CONTAMINATION") {
            self.contamination = value.parse().unwrap_or(self.contamination);
        }
        if let Ok(value) = env::var("ATMWATCH_FEATURE_FRACTION") {
            self.feature_fraction = value.parse().unwrap_or(self.feature_fraction);
        }
        if let Ok(value) = env::var("ATMWATCH_MAX_TREE_SAMPLES") {
            self.max_tree_samples = value.parse().unwrap_or(self.max_tree_samples);
        }
        if let Ok(value) = env::var("ATMWATCH_SEED") {
            self.seed = value.parse().unwrap_or(self.seed);
        }
        if let Ok(value) = env::var("ATMWATCH_SEVERITY_MEDIUM") {
            self.severity_medium = value.parse().unwrap_or(self.severity_medium);
        }
        if let Ok(value) = env::var("ATMWATCH_SEVERITY_HIGH") {
            self.severity_high = value.parse().unwrap_or(self.severity_high);
        }
        if let Ok(value) = env::var("ATMWATCH_SEVERITY_CRITICAL") {
            self.severity_critical = value.parse().unwrap_or(self.severity_critical);
        }
        if let Ok(value) = env::var("ATMWATCH_TOP_REASONS") {
            self.top_reasons = value.parse().unwrap_or(self.top_reasons);
        }
    }
}

fn resolve_path(base: &Path, value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return trimmed.to_string();
    }
    let path = Path::new(trimmed);
    if path.is_absolute() {
        trimmed.to_string()
    } else {
        base.join(path).to_string_lossy().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn blank_credentials_normalize_to_none() {
        let mut config = AppConfig {
            clickhouse_user: Some("  ".to_string()),
            clickhouse_password: Some(String::new()),
            ..AppConfig::default()
        };
        config.normalize();
        assert!(config.clickhouse_user.is_none());
        assert!(config.clickhouse_password.is_none());
    }

    #[test]
    fn misordered_thresholds_are_rejected() {
        let config = AppConfig {
            severity_high: 95.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_contamination_is_rejected() {
        let config = AppConfig {
            contamination: 0.9,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
