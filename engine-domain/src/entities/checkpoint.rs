// Job checkpoint entity
// Chunk-level progress marker; crash recovery re-runs only the last
// incomplete chunk

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub job: String,
    pub completed_chunks: u64,
    pub updated_at: DateTime<Utc>,
}
