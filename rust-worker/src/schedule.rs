//! Hourly timer arithmetic for the kickoff scheduler.

use chrono::{DateTime, Duration, Timelike, Utc};

/// The next instant strictly after `now` at `minute` past the hour (UTC).
///
/// Minutes above 59 are clamped.
pub fn next_run(now: DateTime<Utc>, minute: u32) -> DateTime<Utc> {
    let minute = i64::from(minute.min(59));

    let into_hour = Duration::seconds(i64::from(now.minute()) * 60 + i64::from(now.second()))
        + Duration::nanoseconds(i64::from(now.nanosecond()));
    let candidate = now - into_hour + Duration::minutes(minute);

    if candidate > now {
        candidate
    } else {
        candidate + Duration::hours(1)
    }
}
