use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike};

/// Hour at which one logical day ends and the next begins. A weigh-in at
/// 01:00 belongs to the evening before, not the new calendar day.
pub const DEFAULT_CUTOFF_HOUR: u32 = 4;

/// Map a wall-clock timestamp to its logical day. Timestamps before the
/// cutoff hour are attributed to the previous calendar day; exactly
/// `cutoff:00:00` belongs to the current day.
pub fn logical_day(ts: NaiveDateTime, cutoff_hour: u32) -> NaiveDate {
    let date = ts.date();
    if ts.hour() < cutoff_hour {
        date - Duration::days(1)
    } else {
        date
    }
}

/// Logical day of an instant, observed in the given time zone.
pub fn logical_day_in<Tz: TimeZone>(
    ts: DateTime<chrono::Utc>,
    cutoff_hour: u32,
    tz: &Tz,
) -> NaiveDate {
    logical_day(ts.with_timezone(tz).naive_local(), cutoff_hour)
}

/// Half-open instant range `[day at cutoff, next day at cutoff)` covering
/// one logical day in the given time zone. `None` only for degenerate
/// local-time gaps (DST skipping the cutoff hour).
pub fn logical_day_bounds<Tz: TimeZone>(
    day: NaiveDate,
    cutoff_hour: u32,
    tz: &Tz,
) -> Option<(DateTime<Tz>, DateTime<Tz>)> {
    let start = tz
        .from_local_datetime(&day.and_hms_opt(cutoff_hour, 0, 0)?)
        .earliest()?;
    let end = tz
        .from_local_datetime(&(day + Duration::days(1)).and_hms_opt(cutoff_hour, 0, 0)?)
        .earliest()?;
    Some((start, end))
}

/// Today's logical day in the given time zone.
pub fn today_logical<Tz: TimeZone>(cutoff_hour: u32, tz: &Tz) -> NaiveDate {
    logical_day(chrono::Utc::now().with_timezone(tz).naive_local(), cutoff_hour)
}

/// Render a logical day as its summary-file key (`YYYY-MM-DD`).
pub fn date_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}

/// Parse a stored `day_cutoff_hour` config value, falling back to the
/// default for anything missing or out of range.
pub fn cutoff_from_config(value: Option<String>) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|h| *h < 24)
        .unwrap_or(DEFAULT_CUTOFF_HOUR)
}
