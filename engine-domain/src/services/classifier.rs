// Alert classifier
// Maps a scored row to zero or one alert: severity from configured score
// thresholds, top-k contributions rendered as human-readable reasons.
// Severity mapping and reason selection are pure functions so the literal
// alerting scenarios stay testable outside the scoring loop.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{Alert, AnomalyScore, FeatureContribution, TemporalFeatureRow, TerminalInfo};
use crate::value_objects::Severity;

pub const ANOMALY_TYPE_ISOLATION_FOREST: &str = "isolation_forest";

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub medium_threshold: f64,
    pub high_threshold: f64,
    pub critical_threshold: f64,
    pub top_reasons: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            medium_threshold: 50.0,
            high_threshold: 70.0,
            critical_threshold: 90.0,
            top_reasons: 3,
        }
    }
}

/// Pure severity mapping; None means no alert.
pub fn severity_for_score(score: f64, config: &ClassifierConfig) -> Option<Severity> {
    if score >= config.critical_threshold {
        Some(Severity::Critical)
    } else if score >= config.high_threshold {
        Some(Severity::High)
    } else if score >= config.medium_threshold {
        Some(Severity::Medium)
    } else {
        None
    }
}

/// Renders the top-k contributions, preserving their score order.
pub fn build_reasons(contributions: &[FeatureContribution], top: usize) -> Vec<String> {
    contributions
        .iter()
        .take(top)
        .map(describe_contribution)
        .collect()
}

fn describe_contribution(contribution: &FeatureContribution) -> String {
    let value = contribution.value;
    match contribution.feature_name.as_str() {
        "z_score_vs_entity" => format!(
            "{:.1} standard deviations {} the terminal's historical average",
            value.abs(),
            direction(value)
        ),
        "z_score_vs_hour" => format!(
            "{:.1} standard deviations {} the average for this hour of day",
            value.abs(),
            direction(value)
        ),
        "z_score_vs_weekday" => format!(
            "{:.1} standard deviations {} the average for this day of week",
            value.abs(),
            direction(value)
        ),
        "percentile_vs_month" => format!(
            "at the {:.0}th percentile of this month's dispensing",
            value * 100.0
        ),
        "delta_vs_previous_bucket" => {
            format!("{:+.0}% vs the previous bucket", value * 100.0)
        }
        "delta_vs_same_time_yesterday" => {
            format!("{:+.0}% vs the same time yesterday", value * 100.0)
        }
        name => format!(
            "{} at {:.2} ({:.1} standard deviations from the training mean)",
            name, value, contribution.magnitude
        ),
    }
}

fn direction(value: f64) -> &'static str {
    if value < 0.0 {
        "below"
    } else {
        "above"
    }
}

pub struct AlertClassifier {
    config: ClassifierConfig,
}

impl AlertClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Zero or one alert per scored row. The alert key is
    /// (entity_id, bucket_start); the store overwrites on that key, so
    /// re-classifying the same row never duplicates.
    pub fn classify(
        &self,
        row: &TemporalFeatureRow,
        score: &AnomalyScore,
        terminal: Option<&TerminalInfo>,
        detected_at: DateTime<Utc>,
    ) -> Option<Alert> {
        let severity = severity_for_score(score.score, &self.config)?;

        let expected_amount = row
            .baseline_mean_hour
            .or(row.baseline_mean_entity)
            .unwrap_or(row.amount_sum);
        let deviation_in_sigma = row.z_score_vs_entity.map_or(0.0, f64::abs);
        let reasons = build_reasons(&score.contributing_features, self.config.top_reasons);

        Some(Alert {
            id: Uuid::new_v4().to_string(),
            entity_id: row.entity_id.clone(),
            bucket_start: row.bucket_start,
            anomaly_type: ANOMALY_TYPE_ISOLATION_FOREST.to_string(),
            severity,
            score: score.score,
            expected_amount,
            observed_amount: row.amount_sum,
            deviation_in_sigma,
            description: self.describe(row, score.score, expected_amount, terminal),
            reasons,
            model_version: score.model_version.clone(),
            detected_at,
            validated: false,
            validated_by: None,
            validated_at: None,
        })
    }

    fn describe(
        &self,
        row: &TemporalFeatureRow,
        score: f64,
        expected_amount: f64,
        terminal: Option<&TerminalInfo>,
    ) -> String {
        let deviation_pct = if expected_amount > 0.0 {
            (row.amount_sum - expected_amount) / expected_amount * 100.0
        } else {
            0.0
        };
        let mut description = format!(
            "Dispensed {:.0} ({:+.1}% vs expected {:.0}) | {} {:02}:xx | score {:.0}/100",
            row.amount_sum,
            deviation_pct,
            expected_amount,
            row.day_of_week.short_name(),
            row.hour_of_day,
            score,
        );
        if row.is_weekend {
            description.push_str(" | weekend");
        }
        if row.is_payday_window {
            description.push_str(" | payday window");
        }
        if let Some(info) = terminal {
            description.push_str(&format!(" | {}", info.location));
        }
        description
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::DayOfWeek;
    use chrono::TimeZone;

    fn row() -> TemporalFeatureRow {
        TemporalFeatureRow {
            entity_id: "A1".to_string(),
            bucket_start: Utc.with_ymd_and_hms(2024, 3, 5, 2, 15, 0).unwrap(),
            amount_sum: 5000.0,
            transaction_count: 12,
            hour_of_day: 2,
            day_of_week: DayOfWeek::Tuesday,
            month: 3,
            is_weekend: false,
            is_month_end: false,
            is_payday_window: false,
            z_score_vs_entity: Some(6.4),
            z_score_vs_hour: Some(5.1),
            z_score_vs_weekday: Some(3.0),
            percentile_vs_month: Some(1.0),
            delta_vs_previous_bucket: Some(49.0),
            delta_vs_same_time_yesterday: None,
            slope_24h: Some(0.9),
            volatility_24h: Some(12.0),
            baseline_mean_entity: Some(100.0),
            baseline_mean_hour: Some(110.0),
            computed_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn score_with(score: f64) -> AnomalyScore {
        AnomalyScore {
            entity_id: "A1".to_string(),
            bucket_start: Utc.with_ymd_and_hms(2024, 3, 5, 2, 15, 0).unwrap(),
            model_version: "v1".to_string(),
            score,
            contributing_features: vec![
                FeatureContribution {
                    feature_name: "z_score_vs_entity".to_string(),
                    value: 6.4,
                    baseline_mean: 0.0,
                    magnitude: 3.2,
                },
                FeatureContribution {
                    feature_name: "amount_sum".to_string(),
                    value: 5000.0,
                    baseline_mean: 120.0,
                    magnitude: 3.1,
                },
                FeatureContribution {
                    feature_name: "delta_vs_previous_bucket".to_string(),
                    value: 49.0,
                    baseline_mean: 0.0,
                    magnitude: 2.9,
                },
                FeatureContribution {
                    feature_name: "month".to_string(),
                    value: 3.0,
                    baseline_mean: 3.0,
                    magnitude: 0.0,
                },
            ],
        }
    }

    #[test]
    fn default_thresholds_partition_severities() {
        let config = ClassifierConfig::default();
        assert_eq!(severity_for_score(49.9, &config), None);
        assert_eq!(severity_for_score(50.0, &config), Some(Severity::Medium));
        assert_eq!(severity_for_score(70.0, &config), Some(Severity::High));
        assert_eq!(severity_for_score(90.0, &config), Some(Severity::Critical));
        assert_eq!(severity_for_score(100.0, &config), Some(Severity::Critical));
    }

    #[test]
    fn severity_is_monotonic_in_score() {
        let config = ClassifierConfig::default();
        let mut last: Option<Severity> = None;
        for step in 0..=1000 {
            let severity = severity_for_score(step as f64 / 10.0, &config);
            assert!(severity >= last, "severity dropped at score {}", step as f64 / 10.0);
            last = severity;
        }
    }

    #[test]
    fn low_score_yields_no_alert() {
        let classifier = AlertClassifier::new(ClassifierConfig::default());
        let alert = classifier.classify(&row(), &score_with(32.0), None, Utc::now());
        assert!(alert.is_none());
    }

    #[test]
    fn critical_alert_carries_reasons_and_expected_amount() {
        let classifier = AlertClassifier::new(ClassifierConfig::default());
        let alert = classifier
            .classify(&row(), &score_with(95.0), None, Utc::now())
            .expect("critical alert");
        assert_eq!(alert.severity, Severity::Critical);
        // Hour baseline preferred over the entity-wide mean.
        assert_eq!(alert.expected_amount, 110.0);
        assert_eq!(alert.deviation_in_sigma, 6.4);
        assert_eq!(alert.reasons.len(), 3);
        assert!(alert.reasons[0].contains("above the terminal's historical average"));
        assert!(!alert.validated);
    }

    #[test]
    fn description_includes_terminal_location() {
        let classifier = AlertClassifier::new(ClassifierConfig::default());
        let terminal = TerminalInfo {
            entity_id: "A1".to_string(),
            location: "Main St branch".to_string(),
            category: "lobby".to_string(),
        };
        let alert = classifier
            .classify(&row(), &score_with(75.0), Some(&terminal), Utc::now())
            .expect("high alert");
        assert!(alert.description.contains("Main St branch"));
        assert!(alert.description.contains("Tue 02:xx"));
    }
}
