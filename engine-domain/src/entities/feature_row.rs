// Temporal feature row entity
// Derived per (terminal, bucket); unique on that key, idempotently upserted

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::DayOfWeek;

/// Names of the scored features, in the fixed order used by the model.
pub const FEATURE_NAMES: [&str; 16] = [
    "amount_sum",
    "transaction_count",
    "hour_of_day",
    "day_of_week",
    "month",
    "is_weekend",
    "is_month_end",
    "is_payday_window",
    "z_score_vs_entity",
    "z_score_vs_hour",
    "z_score_vs_weekday",
    "percentile_vs_month",
    "delta_vs_previous_bucket",
    "delta_vs_same_time_yesterday",
    "slope_24h",
    "volatility_24h",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalFeatureRow {
    pub entity_id: String,
    pub bucket_start: DateTime<Utc>,
    pub amount_sum: f64,
    pub transaction_count: i64,

    // Calendar features
    pub hour_of_day: u32,
    pub day_of_week: DayOfWeek,
    pub month: u32,
    pub is_weekend: bool,
    pub is_month_end: bool,
    pub is_payday_window: bool,

    // Deviation features; None = insufficient history
    pub z_score_vs_entity: Option<f64>,
    pub z_score_vs_hour: Option<f64>,
    pub z_score_vs_weekday: Option<f64>,
    pub percentile_vs_month: Option<f64>,

    // Trend features
    pub delta_vs_previous_bucket: Option<f64>,
    pub delta_vs_same_time_yesterday: Option<f64>,
    pub slope_24h: Option<f64>,
    pub volatility_24h: Option<f64>,

    // Baseline means observed strictly before this bucket; feed
    // expected_amount on alerts, not part of the scored vector.
    pub baseline_mean_entity: Option<f64>,
    pub baseline_mean_hour: Option<f64>,

    // Fixed once per builder run; excluded from feature equality.
    pub computed_at: DateTime<Utc>,
}

impl TemporalFeatureRow {
    /// Scored feature vector in `FEATURE_NAMES` order.
    pub fn feature_vector(&self) -> Vec<Option<f64>> {
        vec![
            Some(self.amount_sum),
            Some(self.transaction_count as f64),
            Some(f64::from(self.hour_of_day)),
            Some(f64::from(self.day_of_week.number())),
            Some(f64::from(self.month)),
            Some(if self.is_weekend { 1.0 } else { 0.0 }),
            Some(if self.is_month_end { 1.0 } else { 0.0 }),
            Some(if self.is_payday_window { 1.0 } else { 0.0 }),
            self.z_score_vs_entity,
            self.z_score_vs_hour,
            self.z_score_vs_weekday,
            self.percentile_vs_month,
            self.delta_vs_previous_bucket,
            self.delta_vs_same_time_yesterday,
            self.slope_24h,
            self.volatility_24h,
        ]
    }

    /// Equality over every field except `computed_at`.
    pub fn same_features(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
            && self.bucket_start == other.bucket_start
            && self.amount_sum == other.amount_sum
            && self.transaction_count == other.transaction_count
            && self.hour_of_day == other.hour_of_day
            && self.day_of_week == other.day_of_week
            && self.month == other.month
            && self.is_weekend == other.is_weekend
            && self.is_month_end == other.is_month_end
            && self.is_payday_window == other.is_payday_window
            && self.z_score_vs_entity == other.z_score_vs_entity
            && self.z_score_vs_hour == other.z_score_vs_hour
            && self.z_score_vs_weekday == other.z_score_vs_weekday
            && self.percentile_vs_month == other.percentile_vs_month
            && self.delta_vs_previous_bucket == other.delta_vs_previous_bucket
            && self.delta_vs_same_time_yesterday == other.delta_vs_same_time_yesterday
            && self.slope_24h == other.slope_24h
            && self.volatility_24h == other.volatility_24h
            && self.baseline_mean_entity == other.baseline_mean_entity
            && self.baseline_mean_hour == other.baseline_mean_hour
    }
}
