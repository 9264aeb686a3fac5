use chrono::{DateTime, Utc};
use time::OffsetDateTime;

pub fn utc_to_offset(at: DateTime<Utc>) -> OffsetDateTime {
    let nanos = i128::from(at.timestamp_millis()).saturating_mul(1_000_000);
    OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

pub fn offset_to_utc(at: OffsetDateTime) -> DateTime<Utc> {
    let millis = (at.unix_timestamp_nanos() / 1_000_000) as i64;
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
