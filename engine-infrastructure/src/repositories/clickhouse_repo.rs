// ClickHouse-backed ports for buckets, features, alerts and terminals.
// Features and alerts live in ReplacingMergeTree tables keyed on
// (entity_id, bucket_start), so re-running a job overwrites rows instead
// of duplicating them; reads go through FINAL to collapse replacements.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use engine_domain::entities::{
    Alert, AlertFilter, BucketAggregate, BucketRange, TemporalFeatureRow, TerminalInfo,
};
use engine_domain::ports::{
    AlertRepository, BucketAggregateReader, FeatureRepository, TerminalRepository,
};
use engine_domain::value_objects::{DayOfWeek, Severity};

use crate::utils::{offset_to_utc, utc_to_offset};

const DEFAULT_ALERT_LIMIT: usize = 500;

#[derive(Clone)]
pub struct ClickhouseRepo {
    client: Client,
    database: String,
}

impl ClickhouseRepo {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        let create_db = format!("CREATE DATABASE IF NOT EXISTS {}", self.database);
        self.client.query(&create_db).execute().await?;

        let create_buckets = r#"
CREATE TABLE IF NOT EXISTS dispense_buckets (
    entity_id String,
    bucket_start DateTime64(3),
    operation_type String,
    transaction_count Int64,
    amount_sum Float64,
    amount_mean Float64,
    amount_max Float64,
    amount_min Float64,
    amount_stddev Float64
) ENGINE = MergeTree
PARTITION BY toYYYYMM(bucket_start)
ORDER BY (entity_id, operation_type, bucket_start)
"#;
        self.client.query(create_buckets).execute().await?;

        let create_features = r#"
CREATE TABLE IF NOT EXISTS temporal_features (
    entity_id String,
    bucket_start DateTime64(3),
    amount_sum Float64,
    transaction_count Int64,
    hour_of_day UInt8,
    day_of_week UInt8,
    month UInt8,
    is_weekend UInt8,
    is_month_end UInt8,
    is_payday_window UInt8,
    z_score_vs_entity Nullable(Float64),
    z_score_vs_hour Nullable(Float64),
    z_score_vs_weekday Nullable(Float64),
    percentile_vs_month Nullable(Float64),
    delta_vs_previous_bucket Nullable(Float64),
    delta_vs_same_time_yesterday Nullable(Float64),
    slope_24h Nullable(Float64),
    volatility_24h Nullable(Float64),
    baseline_mean_entity Nullable(Float64),
    baseline_mean_hour Nullable(Float64),
    computed_at DateTime64(3)
) ENGINE = ReplacingMergeTree(computed_at)
PARTITION BY toYYYYMM(bucket_start)
ORDER BY (entity_id, bucket_start)
"#;
        self.client.query(create_features).execute().await?;

        let create_alerts = r#"
CREATE TABLE IF NOT EXISTS anomaly_alerts (
    id String,
    entity_id String,
    bucket_start DateTime64(3),
    anomaly_type String,
    severity String,
    score Float64,
    expected_amount Float64,
    observed_amount Float64,
    deviation_in_sigma Float64,
    description String,
    reasons Array(String),
    model_version String,
    detected_at DateTime64(3),
    validated UInt8,
    validated_by Nullable(String),
    validated_at Nullable(DateTime64(3))
) ENGINE = ReplacingMergeTree(detected_at)
PARTITION BY toYYYYMM(bucket_start)
ORDER BY (entity_id, bucket_start)
"#;
        self.client.query(create_alerts).execute().await?;

        let create_terminals = r#"
CREATE TABLE IF NOT EXISTS terminals (
    entity_id String,
    location String,
    category String
) ENGINE = ReplacingMergeTree
ORDER BY entity_id
"#;
        self.client.query(create_terminals).execute().await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        let _: u8 = self.client.query("SELECT toUInt8(1)").fetch_one().await?;
        Ok(())
    }
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct BucketRow {
    entity_id: String,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    bucket_start: OffsetDateTime,
    operation_type: String,
    transaction_count: i64,
    amount_sum: f64,
    amount_mean: f64,
    amount_max: f64,
    amount_min: f64,
    amount_stddev: f64,
}

impl From<BucketRow> for BucketAggregate {
    fn from(row: BucketRow) -> Self {
        BucketAggregate {
            entity_id: row.entity_id,
            bucket_start: offset_to_utc(row.bucket_start),
            operation_type: row.operation_type,
            transaction_count: row.transaction_count,
            amount_sum: row.amount_sum,
            amount_mean: row.amount_mean,
            amount_max: row.amount_max,
            amount_min: row.amount_min,
            amount_stddev: row.amount_stddev,
        }
    }
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct FeatureRow {
    entity_id: String,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    bucket_start: OffsetDateTime,
    amount_sum: f64,
    transaction_count: i64,
    hour_of_day: u8,
    day_of_week: u8,
    month: u8,
    is_weekend: u8,
    is_month_end: u8,
    is_payday_window: u8,
    z_score_vs_entity: Option<f64>,
    z_score_vs_hour: Option<f64>,
    z_score_vs_weekday: Option<f64>,
    percentile_vs_month: Option<f64>,
    delta_vs_previous_bucket: Option<f64>,
    delta_vs_same_time_yesterday: Option<f64>,
    slope_24h: Option<f64>,
    volatility_24h: Option<f64>,
    baseline_mean_entity: Option<f64>,
    baseline_mean_hour: Option<f64>,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    computed_at: OffsetDateTime,
}

const FEATURE_COLUMNS: &str = "entity_id, bucket_start, amount_sum, transaction_count, \
    hour_of_day, day_of_week, month, is_weekend, is_month_end, is_payday_window, \
    z_score_vs_entity, z_score_vs_hour, z_score_vs_weekday, percentile_vs_month, \
    delta_vs_previous_bucket, delta_vs_same_time_yesterday, slope_24h, volatility_24h, \
    baseline_mean_entity, baseline_mean_hour, computed_at";

impl From<&TemporalFeatureRow> for FeatureRow {
    fn from(row: &TemporalFeatureRow) -> Self {
        FeatureRow {
            entity_id: row.entity_id.clone(),
            bucket_start: utc_to_offset(row.bucket_start),
            amount_sum: row.amount_sum,
            transaction_count: row.transaction_count,
            hour_of_day: row.hour_of_day as u8,
            day_of_week: row.day_of_week.number(),
            month: row.month as u8,
            is_weekend: u8::from(row.is_weekend),
            is_month_end: u8::from(row.is_month_end),
            is_payday_window: u8::from(row.is_payday_window),
            z_score_vs_entity: row.z_score_vs_entity,
            z_score_vs_hour: row.z_score_vs_hour,
            z_score_vs_weekday: row.z_score_vs_weekday,
            percentile_vs_month: row.percentile_vs_month,
            delta_vs_previous_bucket: row.delta_vs_previous_bucket,
            delta_vs_same_time_yesterday: row.delta_vs_same_time_yesterday,
            slope_24h: row.slope_24h,
            volatility_24h: row.volatility_24h,
            baseline_mean_entity: row.baseline_mean_entity,
            baseline_mean_hour: row.baseline_mean_hour,
            computed_at: utc_to_offset(row.computed_at),
        }
    }
}

impl From<FeatureRow> for TemporalFeatureRow {
    fn from(row: FeatureRow) -> Self {
        TemporalFeatureRow {
            entity_id: row.entity_id,
            bucket_start: offset_to_utc(row.bucket_start),
            amount_sum: row.amount_sum,
            transaction_count: row.transaction_count,
            hour_of_day: u32::from(row.hour_of_day),
            day_of_week: DayOfWeek::from_number(row.day_of_week),
            month: u32::from(row.month),
            is_weekend: row.is_weekend != 0,
            is_month_end: row.is_month_end != 0,
            is_payday_window: row.is_payday_window != 0,
            z_score_vs_entity: row.z_score_vs_entity,
            z_score_vs_hour: row.z_score_vs_hour,
            z_score_vs_weekday: row.z_score_vs_weekday,
            percentile_vs_month: row.percentile_vs_month,
            delta_vs_previous_bucket: row.delta_vs_previous_bucket,
            delta_vs_same_time_yesterday: row.delta_vs_same_time_yesterday,
            slope_24h: row.slope_24h,
            volatility_24h: row.volatility_24h,
            baseline_mean_entity: row.baseline_mean_entity,
            baseline_mean_hour: row.baseline_mean_hour,
            computed_at: offset_to_utc(row.computed_at),
        }
    }
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct AlertRow {
    id: String,
    entity_id: String,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    bucket_start: OffsetDateTime,
    anomaly_type: String,
    severity: String,
    score: f64,
    expected_amount: f64,
    observed_amount: f64,
    deviation_in_sigma: f64,
    description: String,
    reasons: Vec<String>,
    model_version: String,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    detected_at: OffsetDateTime,
    validated: u8,
    validated_by: Option<String>,
    #[serde(with = "clickhouse::serde::time::datetime64::millis::option")]
    validated_at: Option<OffsetDateTime>,
}

const ALERT_COLUMNS: &str = "id, entity_id, bucket_start, anomaly_type, severity, score, \
    expected_amount, observed_amount, deviation_in_sigma, description, reasons, \
    model_version, detected_at, validated, validated_by, validated_at";

impl From<&Alert> for AlertRow {
    fn from(alert: &Alert) -> Self {
        AlertRow {
            id: alert.id.clone(),
            entity_id: alert.entity_id.clone(),
            bucket_start: utc_to_offset(alert.bucket_start),
            anomaly_type: alert.anomaly_type.clone(),
            severity: alert.severity.as_str().to_string(),
            score: alert.score,
            expected_amount: alert.expected_amount,
            observed_amount: alert.observed_amount,
            deviation_in_sigma: alert.deviation_in_sigma,
            description: alert.description.clone(),
            reasons: alert.reasons.clone(),
            model_version: alert.model_version.clone(),
            detected_at: utc_to_offset(alert.detected_at),
            validated: u8::from(alert.validated),
            validated_by: alert.validated_by.clone(),
            validated_at: alert.validated_at.map(utc_to_offset),
        }
    }
}

impl From<AlertRow> for Alert {
    fn from(row: AlertRow) -> Self {
        Alert {
            id: row.id,
            entity_id: row.entity_id,
            bucket_start: offset_to_utc(row.bucket_start),
            anomaly_type: row.anomaly_type,
            severity: Severity::from(row.severity.as_str()),
            score: row.score,
            expected_amount: row.expected_amount,
            observed_amount: row.observed_amount,
            deviation_in_sigma: row.deviation_in_sigma,
            description: row.description,
            reasons: row.reasons,
            model_version: row.model_version,
            detected_at: offset_to_utc(row.detected_at),
            validated: row.validated != 0,
            validated_by: row.validated_by,
            validated_at: row.validated_at.map(offset_to_utc),
        }
    }
}

#[derive(Debug, Row, Serialize, Deserialize)]
struct TerminalRow {
    entity_id: String,
    location: String,
    category: String,
}

fn range_clause(range: &BucketRange, sql: &mut String) -> Vec<i64> {
    let mut binds = Vec::new();
    if let Some(from) = range.from {
        sql.push_str(" AND bucket_start >= fromUnixTimestamp64Milli(?)");
        binds.push(from.timestamp_millis());
    }
    if let Some(to) = range.to {
        sql.push_str(" AND bucket_start < fromUnixTimestamp64Milli(?)");
        binds.push(to.timestamp_millis());
    }
    binds
}

#[async_trait]
impl BucketAggregateReader for ClickhouseRepo {
    async fn list_entities(
        &self,
        operation_type: &str,
        range: &BucketRange,
    ) -> Result<Vec<String>> {
        let mut sql =
            "SELECT DISTINCT entity_id FROM dispense_buckets WHERE operation_type = ?".to_string();
        let binds = range_clause(range, &mut sql);
        sql.push_str(" ORDER BY entity_id");

        let mut query = self.client.query(&sql).bind(operation_type);
        for bind in binds {
            query = query.bind(bind);
        }
        Ok(query.fetch_all::<String>().await?)
    }

    async fn fetch_buckets(
        &self,
        entity_id: &str,
        operation_type: &str,
        range: &BucketRange,
    ) -> Result<Vec<BucketAggregate>> {
        let mut sql = "SELECT entity_id, bucket_start, operation_type, transaction_count, \
             amount_sum, amount_mean, amount_max, amount_min, amount_stddev \
             FROM dispense_buckets WHERE entity_id = ? AND operation_type = ?"
            .to_string();
        let binds = range_clause(range, &mut sql);
        sql.push_str(" ORDER BY bucket_start");

        let mut query = self.client.query(&sql).bind(entity_id).bind(operation_type);
        for bind in binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all::<BucketRow>().await?;
        Ok(rows.into_iter().map(BucketAggregate::from).collect())
    }
}

#[async_trait]
impl FeatureRepository for ClickhouseRepo {
    async fn upsert_features(&self, rows: &[TemporalFeatureRow]) -> Result<()> {
        let mut insert = self.client.insert("temporal_features")?;
        for row in rows {
            insert.write(&FeatureRow::from(row)).await?;
        }
        insert.end().await?;
        Ok(())
    }

    async fn count_features(&self) -> Result<u64> {
        let count = self
            .client
            .query("SELECT count() FROM temporal_features FINAL")
            .fetch_one::<u64>()
            .await?;
        Ok(count)
    }

    async fn sample_features(&self, limit: usize) -> Result<Vec<TemporalFeatureRow>> {
        // Hash ordering gives an unbiased sample that is stable across runs.
        let sql = format!(
            "SELECT {FEATURE_COLUMNS} FROM temporal_features FINAL \
             ORDER BY cityHash64(entity_id, toString(bucket_start)) LIMIT {limit}"
        );
        let rows = self.client.query(&sql).fetch_all::<FeatureRow>().await?;
        Ok(rows.into_iter().map(TemporalFeatureRow::from).collect())
    }

    async fn fetch_features_page(&self, offset: u64, limit: u64) -> Result<Vec<TemporalFeatureRow>> {
        let sql = format!(
            "SELECT {FEATURE_COLUMNS} FROM temporal_features FINAL \
             ORDER BY entity_id, bucket_start LIMIT {limit} OFFSET {offset}"
        );
        let rows = self.client.query(&sql).fetch_all::<FeatureRow>().await?;
        Ok(rows.into_iter().map(TemporalFeatureRow::from).collect())
    }
}

#[async_trait]
impl AlertRepository for ClickhouseRepo {
    async fn upsert_alerts(&self, alerts: &[Alert]) -> Result<()> {
        let mut insert = self.client.insert("anomaly_alerts")?;
        for alert in alerts {
            insert.write(&AlertRow::from(alert)).await?;
        }
        insert.end().await?;
        Ok(())
    }

    async fn fetch_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let mut sql = format!("SELECT {ALERT_COLUMNS} FROM anomaly_alerts FINAL WHERE 1 = 1");
        match filter.min_severity {
            Some(Severity::Critical) => sql.push_str(" AND severity = 'critical'"),
            Some(Severity::High) => sql.push_str(" AND severity IN ('high', 'critical')"),
            Some(Severity::Medium) | None => {}
        }
        let binds = range_clause(
            &BucketRange {
                from: filter.from,
                to: filter.to,
            },
            &mut sql,
        );
        let entity = filter.entity_id.clone();
        if entity.is_some() {
            sql.push_str(" AND entity_id = ?");
        }
        let limit = if filter.limit == 0 { DEFAULT_ALERT_LIMIT } else { filter.limit };
        sql.push_str(&format!(" ORDER BY detected_at DESC LIMIT {limit}"));

        let mut query = self.client.query(&sql);
        for bind in binds {
            query = query.bind(bind);
        }
        if let Some(entity_id) = entity {
            query = query.bind(entity_id);
        }
        let rows = query.fetch_all::<AlertRow>().await?;
        Ok(rows.into_iter().map(Alert::from).collect())
    }
}

#[async_trait]
impl TerminalRepository for ClickhouseRepo {
    async fn fetch_terminals(&self) -> Result<HashMap<String, TerminalInfo>> {
        let rows = self
            .client
            .query("SELECT entity_id, location, category FROM terminals FINAL")
            .fetch_all::<TerminalRow>()
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.entity_id.clone(),
                    TerminalInfo {
                        entity_id: row.entity_id,
                        location: row.location,
                        category: row.category,
                    },
                )
            })
            .collect())
    }
}
