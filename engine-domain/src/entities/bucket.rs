// Bucket aggregate entity
// One pre-aggregated (terminal, 15-minute bucket) row from the dispense store

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Width of one aggregation bucket.
pub const BUCKET_MINUTES: i64 = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketAggregate {
    pub entity_id: String,
    pub bucket_start: DateTime<Utc>,
    pub operation_type: String,
    pub transaction_count: i64,
    pub amount_sum: f64,
    pub amount_mean: f64,
    pub amount_max: f64,
    pub amount_min: f64,
    pub amount_stddev: f64,
}

impl BucketAggregate {
    /// True when `bucket_start` sits exactly on a bucket boundary.
    pub fn is_aligned(&self) -> bool {
        let minute = i64::from(self.bucket_start.minute());
        self.bucket_start.second() == 0
            && self.bucket_start.nanosecond() == 0
            && minute % BUCKET_MINUTES == 0
    }
}

/// Length of one bucket as a chrono duration.
pub fn bucket_interval() -> Duration {
    Duration::minutes(BUCKET_MINUTES)
}

/// Half-open [from, to) range filter over bucket starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl BucketRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at < to)
    }
}
