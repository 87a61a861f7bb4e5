//! Market-hours calendar gate.
//!
//! Stateless: given a timestamp, the allowed session set, and the holiday
//! set, decide open/closed. Weekends and holidays are closed. Session ranges
//! are fixed local-time windows, inclusive at both ends — 15:30:00 is inside
//! REGULAR, 15:30:01 is not.
//!
//! All local-time conversion in the system lives here; everything else runs
//! on UTC.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The four tradable session windows, in local exchange time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Session {
    Regular,
    PreMarket,
    AfterHoursClosing,
    AfterHours,
}

impl Session {
    pub fn as_str(&self) -> &'static str {
        match self {
            Session::Regular => "REGULAR",
            Session::PreMarket => "PRE_MARKET",
            Session::AfterHoursClosing => "AFTER_HOURS_CLOSING",
            Session::AfterHours => "AFTER_HOURS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REGULAR" => Some(Session::Regular),
            "PRE_MARKET" => Some(Session::PreMarket),
            "AFTER_HOURS_CLOSING" => Some(Session::AfterHoursClosing),
            "AFTER_HOURS" => Some(Session::AfterHours),
            _ => None,
        }
    }

    /// Inclusive [start, end] local-time window.
    fn window(&self) -> (NaiveTime, NaiveTime) {
        let t = |h, m, s| NaiveTime::from_hms_opt(h, m, s).expect("valid hms");
        match self {
            Session::Regular => (t(9, 0, 0), t(15, 30, 0)),
            Session::PreMarket => (t(8, 30, 0), t(8, 40, 0)),
            Session::AfterHoursClosing => (t(15, 40, 0), t(16, 0, 0)),
            Session::AfterHours => (t(16, 0, 0), t(18, 0, 0)),
        }
    }

    fn contains(&self, local: NaiveTime) -> bool {
        let (start, end) = self.window();
        local >= start && local <= end
    }
}

// ---------------------------------------------------------------------------
// MarketCalendar
// ---------------------------------------------------------------------------

/// Session/holiday calendar for one exchange timezone.
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    tz: Tz,
    allowed_sessions: HashSet<Session>,
    holidays: HashSet<NaiveDate>,
}

impl MarketCalendar {
    pub fn new(
        tz: Tz,
        allowed_sessions: impl IntoIterator<Item = Session>,
        holidays: impl IntoIterator<Item = NaiveDate>,
    ) -> Self {
        Self {
            tz,
            allowed_sessions: allowed_sessions.into_iter().collect(),
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Local trading date for a UTC instant. Also used by the daily-PnL
    /// midnight reset.
    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        self.tz.from_utc_datetime(&ts.naive_utc()).date_naive()
    }

    /// Open iff weekday, not a holiday, and the local time falls inside at
    /// least one allowed session.
    pub fn is_open(&self, ts: DateTime<Utc>) -> bool {
        let local = self.tz.from_utc_datetime(&ts.naive_utc());
        let weekday = local.weekday();
        if weekday == Weekday::Sat || weekday == Weekday::Sun {
            return false;
        }
        if self.holidays.contains(&local.date_naive()) {
            return false;
        }
        let time = local.time();
        self.allowed_sessions.iter().any(|s| s.contains(time))
    }
}
