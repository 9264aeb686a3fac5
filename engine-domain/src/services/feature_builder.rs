// Temporal feature builder
// One builder per entity and per run; consumes that entity's buckets in
// strictly ascending order and emits one feature row per valid bucket.
// All baselines use only strictly earlier buckets, except the monthly
// percentile, which deliberately ranks within the full calendar month.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::entities::{bucket_interval, BucketAggregate, TemporalFeatureRow};
use crate::services::calendar::CalendarContext;
use crate::services::welford::RunningStats;

#[derive(Debug, Clone)]
pub struct FeatureBuilderConfig {
    pub operation_type: String,
    pub timezone_offset_minutes: i32,
}

impl Default for FeatureBuilderConfig {
    fn default() -> Self {
        Self {
            operation_type: "dispense".to_string(),
            timezone_offset_minutes: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct FeatureBatch {
    pub rows: Vec<TemporalFeatureRow>,
    pub skipped: usize,
}

pub struct TemporalFeatureBuilder {
    config: FeatureBuilderConfig,
    calendar: CalendarContext,
    computed_at: DateTime<Utc>,
    entity_stats: RunningStats,
    hour_stats: [RunningStats; 24],
    weekday_stats: [RunningStats; 7],
    last_bucket: Option<DateTime<Utc>>,
    previous: Option<(DateTime<Utc>, f64)>,
    trailing_24h: VecDeque<(DateTime<Utc>, f64)>,
}

impl TemporalFeatureBuilder {
    /// `computed_at` is the single wall-clock stamp of the run; the builder
    /// itself never reads the clock, so output stays deterministic.
    pub fn new(config: FeatureBuilderConfig, computed_at: DateTime<Utc>) -> Self {
        let calendar = CalendarContext::new(config.timezone_offset_minutes);
        Self {
            config,
            calendar,
            computed_at,
            entity_stats: RunningStats::default(),
            hour_stats: [RunningStats::default(); 24],
            weekday_stats: [RunningStats::default(); 7],
            last_bucket: None,
            previous: None,
            trailing_24h: VecDeque::new(),
        }
    }

    /// Builds feature rows for one entity's ordered bucket sequence.
    /// Malformed or out-of-order rows are skipped and counted, never fatal.
    pub fn build(&mut self, entity_id: &str, buckets: &[BucketAggregate]) -> FeatureBatch {
        let mut batch = FeatureBatch::default();
        let mut month_keys = Vec::with_capacity(buckets.len());

        for bucket in buckets {
            if let Some(reason) = self.reject_reason(entity_id, bucket) {
                warn!(
                    entity_id = %entity_id,
                    bucket_start = %bucket.bucket_start,
                    reason,
                    "skipping bucket"
                );
                batch.skipped += 1;
                continue;
            }

            let start = bucket.bucket_start;
            let amount = bucket.amount_sum;
            self.evict_window(start);

            let cal = self.calendar.features(start);
            let hour_idx = cal.hour_of_day as usize;
            let weekday_idx = cal.day_of_week.index();

            let row = TemporalFeatureRow {
                entity_id: entity_id.to_string(),
                bucket_start: start,
                amount_sum: amount,
                transaction_count: bucket.transaction_count,
                hour_of_day: cal.hour_of_day,
                day_of_week: cal.day_of_week,
                month: cal.month,
                is_weekend: cal.is_weekend,
                is_month_end: cal.is_month_end,
                is_payday_window: cal.is_payday_window,
                z_score_vs_entity: self.entity_stats.z_score(amount),
                z_score_vs_hour: self.hour_stats[hour_idx].z_score(amount),
                z_score_vs_weekday: self.weekday_stats[weekday_idx].z_score(amount),
                percentile_vs_month: None,
                delta_vs_previous_bucket: self.delta_vs_previous(start, amount),
                delta_vs_same_time_yesterday: self.delta_vs_yesterday(start, amount),
                slope_24h: self.slope_24h(start, amount),
                volatility_24h: self.volatility_24h(),
                baseline_mean_entity: self.entity_stats.mean(),
                baseline_mean_hour: self.hour_stats[hour_idx].mean(),
                computed_at: self.computed_at,
            };

            month_keys.push((cal.year, cal.month));
            batch.rows.push(row);

            self.entity_stats.push(amount);
            self.hour_stats[hour_idx].push(amount);
            self.weekday_stats[weekday_idx].push(amount);
            self.previous = Some((start, amount));
            self.trailing_24h.push_back((start, amount));
            self.last_bucket = Some(start);
        }

        fill_month_percentiles(&mut batch.rows, &month_keys);
        batch
    }

    fn reject_reason(&self, entity_id: &str, bucket: &BucketAggregate) -> Option<&'static str> {
        if bucket.entity_id != entity_id {
            return Some("entity mismatch");
        }
        if bucket.operation_type != self.config.operation_type {
            return Some("unexpected operation type");
        }
        if !bucket.is_aligned() {
            return Some("bucket_start not interval-aligned");
        }
        if !bucket.amount_sum.is_finite() || bucket.amount_sum < 0.0 {
            return Some("negative or non-finite amount");
        }
        if bucket.transaction_count < 0 {
            return Some("negative transaction count");
        }
        if self.last_bucket.is_some_and(|last| bucket.bucket_start <= last) {
            return Some("out of order");
        }
        None
    }

    fn evict_window(&mut self, now: DateTime<Utc>) {
        let horizon = now - Duration::hours(24);
        while let Some((front, _)) = self.trailing_24h.front() {
            if *front < horizon {
                self.trailing_24h.pop_front();
            } else {
                break;
            }
        }
    }

    /// Relative change vs the interval-aligned preceding bucket; None when
    /// that exact bucket is absent (gaps are not bridged) or its amount is 0.
    fn delta_vs_previous(&self, start: DateTime<Utc>, amount: f64) -> Option<f64> {
        let (prev_start, prev_amount) = self.previous?;
        if prev_start != start - bucket_interval() || prev_amount == 0.0 {
            return None;
        }
        Some((amount - prev_amount) / prev_amount)
    }

    /// Relative change vs the bucket exactly 24h earlier; no interpolation.
    fn delta_vs_yesterday(&self, start: DateTime<Utc>, amount: f64) -> Option<f64> {
        let yesterday = start - Duration::hours(24);
        let (_, prior) = self
            .trailing_24h
            .iter()
            .find(|(at, _)| *at == yesterday)?;
        if *prior == 0.0 {
            return None;
        }
        Some((amount - prior) / prior)
    }

    /// Least-squares slope over the trailing 24h window including the
    /// current bucket, in amount units per second.
    fn slope_24h(&self, start: DateTime<Utc>, amount: f64) -> Option<f64> {
        let n = self.trailing_24h.len() + 1;
        if n < 2 {
            return None;
        }
        let points = self
            .trailing_24h
            .iter()
            .copied()
            .chain(std::iter::once((start, amount)));
        let (mut sum_x, mut sum_y) = (0.0, 0.0);
        for (at, value) in points.clone() {
            sum_x += at.timestamp() as f64;
            sum_y += value;
        }
        let mean_x = sum_x / n as f64;
        let mean_y = sum_y / n as f64;
        let (mut cov, mut var) = (0.0, 0.0);
        for (at, value) in points {
            let dx = at.timestamp() as f64 - mean_x;
            cov += dx * (value - mean_y);
            var += dx * dx;
        }
        (var > 0.0).then(|| cov / var)
    }

    /// Sample stddev over the trailing 24h window, current bucket excluded.
    fn volatility_24h(&self) -> Option<f64> {
        let mut stats = RunningStats::default();
        for (_, value) in &self.trailing_24h {
            stats.push(*value);
        }
        stats.sample_stddev()
    }
}

/// PERCENT_RANK of each row's amount within its entity-month: the count of
/// strictly smaller amounts over (n - 1), 0.0 for a single-bucket month.
/// This is the one feature allowed to see the full month, including buckets
/// later than the row; it is recomputed in batch once the month is loaded.
fn fill_month_percentiles(rows: &mut [TemporalFeatureRow], month_keys: &[(i32, u32)]) {
    let mut groups: HashMap<(i32, u32), Vec<usize>> = HashMap::new();
    for (idx, key) in month_keys.iter().enumerate() {
        groups.entry(*key).or_default().push(idx);
    }
    for indices in groups.values() {
        let mut amounts: Vec<f64> = indices.iter().map(|&i| rows[i].amount_sum).collect();
        amounts.sort_by(|a, b| a.total_cmp(b));
        let n = amounts.len();
        for &idx in indices {
            let value = rows[idx].amount_sum;
            let rank = amounts.partition_point(|a| *a < value);
            let percentile = if n > 1 {
                rank as f64 / (n - 1) as f64
            } else {
                0.0
            };
            rows[idx].percentile_vs_month = Some(percentile);
        }
    }
}
