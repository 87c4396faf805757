//! Trading-day boundaries and reference-price timing.
//!
//! The day rolls over at local midnight for a fixed UTC offset. On Mondays the
//! reference is the last bar of the previous Friday instead of Monday midnight.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc, Weekday,
};

/// India Standard Time, +05:30.
pub const DEFAULT_OFFSET_MINUTES: i32 = 330;

/// Local trading calendar.
#[derive(Debug, Clone, Copy)]
pub struct TradingCalendar {
    offset: FixedOffset,
}

impl TradingCalendar {
    /// Calendar for a UTC offset in minutes (330 = +05:30).
    pub fn new(offset_minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(offset_minutes * 60).map(|offset| Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local date of an instant.
    pub fn trading_day(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Whether `now` falls on a later trading day than `day`.
    pub fn is_new_day(&self, day: NaiveDate, now: DateTime<Utc>) -> bool {
        self.trading_day(now) > day
    }

    /// Instant whose 5-minute bar holds the day's reference price.
    pub fn reference_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = self.trading_day(now);
        if today.weekday() == Weekday::Mon {
            let friday = today - Duration::days(3);
            self.local_instant(friday, NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default())
        } else {
            self.local_instant(today, NaiveTime::MIN)
        }
    }

    /// Next local midnight after `now`.
    pub fn next_rollover(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tomorrow = self.trading_day(now) + Duration::days(1);
        self.local_instant(tomorrow, NaiveTime::MIN)
    }

    fn local_instant(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        // A fixed offset has no gaps or folds, so the mapping is always single.
        self.offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&date.and_time(time)))
    }
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::new(DEFAULT_OFFSET_MINUTES).unwrap_or(Self { offset: Utc.fix() })
    }
}
