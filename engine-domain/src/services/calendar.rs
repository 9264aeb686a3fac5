// Calendar feature context
// Pure functions of bucket_start in the configured terminal-local offset

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};

use crate::value_objects::DayOfWeek;

#[derive(Debug, Clone, Copy)]
pub struct CalendarContext {
    offset: FixedOffset,
}

#[derive(Debug, Clone, Copy)]
pub struct CalendarFeatures {
    pub hour_of_day: u32,
    pub day_of_week: DayOfWeek,
    pub day_of_month: u32,
    pub month: u32,
    pub year: i32,
    pub is_weekend: bool,
    pub is_month_end: bool,
    pub is_payday_window: bool,
}

impl CalendarContext {
    /// `offset_minutes` east of UTC; values outside a day wrap to UTC.
    pub fn new(offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        Self { offset }
    }

    pub fn features(&self, bucket_start: DateTime<Utc>) -> CalendarFeatures {
        let local = bucket_start.with_timezone(&self.offset);
        let day = local.day();
        let day_of_week = DayOfWeek::from(local.weekday());
        CalendarFeatures {
            hour_of_day: local.hour(),
            day_of_week,
            day_of_month: day,
            month: local.month(),
            year: local.year(),
            is_weekend: day_of_week.is_weekend(),
            is_month_end: day >= 28,
            is_payday_window: (14..=16).contains(&day) || day >= 29 || day == 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn mid_month_payday_window() {
        let ctx = CalendarContext::new(0);
        let at = Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap();
        let features = ctx.features(at);
        assert!(features.is_payday_window);
        assert!(!features.is_month_end);
    }

    #[test]
    fn month_end_and_rollover_payday() {
        let ctx = CalendarContext::new(0);
        let end = ctx.features(Utc.with_ymd_and_hms(2024, 5, 30, 8, 0, 0).unwrap());
        assert!(end.is_month_end);
        assert!(end.is_payday_window);
        let first = ctx.features(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap());
        assert!(!first.is_month_end);
        assert!(first.is_payday_window);
        let plain = ctx.features(Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap());
        assert!(!plain.is_payday_window);
    }

    #[test]
    fn offset_shifts_hour_and_day() {
        // 23:45 UTC on a Friday is Saturday 01:45 at +2h.
        let ctx = CalendarContext::new(120);
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 23, 45, 0).unwrap();
        let features = ctx.features(at);
        assert_eq!(features.hour_of_day, 1);
        assert_eq!(features.day_of_week, DayOfWeek::Saturday);
        assert!(features.is_weekend);
    }
}
