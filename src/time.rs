use std::fmt::Display;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Format of the timestamps, both in the log files and in the results.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a `YYYY-MM-DD HH:MM:SS` timestamp, returning `None` if it is not valid.
#[inline]
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok()
}

/// Parse a timestamp supplied by the caller, where an invalid value is an error.
pub fn parse_bound(s: &str) -> Result<NaiveDateTime> {
    parse_timestamp(s.trim()).ok_or_else(|| Error::InvalidTimestamp(s.to_string()))
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Width of the time buckets the records are attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1day")]
    OneDay,
}

impl Granularity {
    /// Round `ts` down to the start of its bucket.
    ///
    /// ```
    /// # use rollup::time::{parse_timestamp, Granularity};
    /// let ts = parse_timestamp("2025-01-01 00:47:00").unwrap();
    /// let start = Granularity::ThirtyMinutes.period_start(ts);
    /// assert_eq!(start, parse_timestamp("2025-01-01 00:30:00").unwrap());
    /// ```
    pub fn period_start(self, ts: NaiveDateTime) -> NaiveDateTime {
        match self {
            Granularity::ThirtyMinutes => {
                let minute = ts.minute() / 30 * 30;
                let time = NaiveTime::from_hms_opt(ts.hour(), minute, 0)
                    .expect("a floored minute is always a valid time");
                ts.date().and_time(time)
            }
            Granularity::OneDay => ts.date().and_time(NaiveTime::MIN),
        }
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "30m" => Ok(Granularity::ThirtyMinutes),
            "1day" => Ok(Granularity::OneDay),
            other => Err(Error::InvalidGranularity(other.to_string())),
        }
    }
}

impl Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Granularity::ThirtyMinutes => write!(f, "30m"),
            Granularity::OneDay => write!(f, "1day"),
        }
    }
}

/// Half-open interval `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(from: NaiveDateTime, to: NaiveDateTime) -> Self {
        Self { from, to }
    }

    #[inline]
    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        self.from <= *ts && *ts < self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    /// Calendar days from the date of `from` to the date of `to`, both included, in ascending
    /// order. A `to` at midnight still names its day: the file of that day is read, even though
    /// none of its records can be in the window.
    pub fn days(&self) -> Vec<NaiveDate> {
        if self.is_empty() {
            return Vec::new();
        }
        self.from
            .date()
            .iter_days()
            .take_while(|day| *day <= self.to.date())
            .collect()
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            format_timestamp(&self.from),
            format_timestamp(&self.to)
        )
    }
}
