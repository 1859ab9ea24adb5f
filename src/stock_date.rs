//! # Stock Date
//! Pure date arithmetic for "which Dow opening can we expect to exist right now?".
//!
//! The opening value for a date is only trusted after 09:30 New York time
//! (market open plus a half-hour buffer). The time-of-day comparison uses
//! real instants, so DST shifts never move the cutoff; only the calendar
//! date is taken from the local view.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Exchange timezone the cutoff is expressed in.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockDateCalculator {
    tz: Tz,
    cutoff: NaiveTime,
}

impl Default for StockDateCalculator {
    fn default() -> Self {
        let cutoff = NaiveTime::from_hms_opt(9, 30, 0).expect("09:30 is a valid time");
        Self::new(DEFAULT_TIMEZONE, cutoff)
    }
}

impl StockDateCalculator {
    pub fn new(tz: Tz, cutoff: NaiveTime) -> Self {
        Self { tz, cutoff }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn cutoff(&self) -> NaiveTime {
        self.cutoff
    }

    /// Calendar date of `instant` as seen in the reference timezone.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// The cutoff instant on a given local calendar date.
    pub fn mark_on(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_time(self.cutoff);
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => t.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            // Cutoff fell into a spring-forward gap: take the first instant after it.
            LocalResult::None => self
                .tz
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
        }
    }

    /// 09:30 in the reference timezone, on the date `reference` falls on there.
    pub fn nine_thirty_mark(&self, reference: DateTime<Utc>) -> DateTime<Utc> {
        self.mark_on(self.local_date(reference))
    }

    /// Most recent date whose opening value should already be published.
    pub fn most_recent_available_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let today = self.local_date(now);
        if now < self.mark_on(today) {
            today.pred_opt().unwrap_or(today)
        } else {
            today
        }
    }

    /// Next cutoff instant strictly after `now`. Computed per local date, so
    /// the result stays on 09:30 local across DST changes.
    pub fn next_mark_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = self.local_date(now);
        let mark = self.mark_on(today);
        if mark > now {
            mark
        } else {
            self.mark_on(today.succ_opt().unwrap_or(today))
        }
    }
}
