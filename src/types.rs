use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{LedgerError, Result};

/// unique identifier for an account
pub type AccountId = Uuid;

/// unique identifier for a transaction
pub type TransactionId = Uuid;

/// persisted timestamp layout
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// persisted date layout
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// calendar month keyed as `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) || !(1..=9999).contains(&year) {
            return Err(LedgerError::InvalidMonth {
                value: format!("{year:04}-{month:02}"),
            });
        }
        Ok(Self { year, month })
    }

    /// month containing the given date
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // year and month are validated at construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day() - Duration::days(1)
    }

    /// midnight of the first day
    pub fn first_instant(&self) -> NaiveDateTime {
        self.first_day().and_time(NaiveTime::MIN)
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn days_in_month(&self) -> u32 {
        match self.month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            _ => {
                if is_leap_year(self.year) { 29 } else { 28 }
            }
        }
    }

    pub fn days_in_year(&self) -> u32 {
        if is_leap_year(self.year) { 366 } else { 365 }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    /// every calendar day of the month in order
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let first = self.first_day();
        (0..self.days_in_month()).map(move |offset| first + Duration::days(offset as i64))
    }

    /// the `n` months preceding this one, oldest first
    pub fn preceding(&self, n: usize) -> Vec<MonthKey> {
        let mut months = Vec::with_capacity(n);
        let mut cursor = *self;
        for _ in 0..n {
            cursor = cursor.previous();
            months.push(cursor);
        }
        months.reverse();
        months
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || LedgerError::InvalidMonth { value: s.to_string() };
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if year.len() != 4 || month.len() != 2 || !digits(year) || !digits(month) {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        MonthKey::new(year, month).map_err(|_| invalid())
    }
}

impl TryFrom<String> for MonthKey {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MonthKey> for String {
    fn from(month: MonthKey) -> Self {
        month.to_string()
    }
}

/// check if year is a leap year
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

/// drop sub-second precision; timestamps persist at whole seconds
pub fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| LedgerError::InvalidDate {
        message: format!("'{value}', expected YYYY-MM-DD"),
    })
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).map_err(|_| {
        LedgerError::InvalidDate {
            message: format!("'{value}', expected YYYY-MM-DD HH:MM:SS"),
        }
    })
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// serde adapter persisting timestamps as `YYYY-MM-DD HH:MM:SS`
pub mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// half-open `[start, end)` window over transaction timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self { start: None, end: None }
    }

    pub fn before(end: NaiveDateTime) -> Self {
        Self { start: None, end: Some(end) }
    }

    pub fn between(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start: Some(start), end: Some(end) }
    }

    /// the whole calendar month
    pub fn month(month: MonthKey) -> Self {
        Self::between(month.first_instant(), month.next().first_instant())
    }

    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        self.start.map_or(true, |start| *ts >= start) && self.end.map_or(true, |end| *ts < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leap_year() {
        assert!(is_leap_year(2024));
        assert!(!is_leap_year(2023));
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(1900));
    }

    #[test]
    fn test_month_key_parsing() {
        let month: MonthKey = "2024-02".parse().unwrap();
        assert_eq!(month.year(), 2024);
        assert_eq!(month.month(), 2);
        assert_eq!(month.to_string(), "2024-02");

        let invalid = [
            "2024-13", "2024-00", "24-02", "2024/02", "2024-2", "abcd-ef", "", "2024-+2", "+024-02",
        ];
        for bad in invalid {
            let err = bad.parse::<MonthKey>().unwrap_err();
            assert!(matches!(err, LedgerError::InvalidMonth { .. }), "{bad}");
        }
    }

    #[test]
    fn test_calendar_counts() {
        let feb_leap: MonthKey = "2024-02".parse().unwrap();
        assert_eq!(feb_leap.days_in_month(), 29);
        assert_eq!(feb_leap.days_in_year(), 366);

        let feb: MonthKey = "2023-02".parse().unwrap();
        assert_eq!(feb.days_in_month(), 28);
        assert_eq!(feb.days_in_year(), 365);

        let dec: MonthKey = "2023-12".parse().unwrap();
        assert_eq!(dec.days_in_month(), 31);
        assert_eq!(dec.last_day(), NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
        assert_eq!(dec.days().count(), 31);
    }

    #[test]
    fn test_month_navigation_crosses_years() {
        let jan: MonthKey = "2024-01".parse().unwrap();
        assert_eq!(jan.previous().to_string(), "2023-12");
        assert_eq!(jan.previous().next(), jan);

        let preceding: Vec<String> = jan.preceding(3).iter().map(|m| m.to_string()).collect();
        assert_eq!(preceding, vec!["2023-10", "2023-11", "2023-12"]);
    }

    #[test]
    fn test_time_range_is_half_open() {
        let month: MonthKey = "2024-03".parse().unwrap();
        let range = TimeRange::month(month);

        assert!(range.contains(&month.first_instant()));
        assert!(!range.contains(&month.next().first_instant()));
        assert!(range.contains(&parse_timestamp("2024-03-31 23:59:59").unwrap()));
    }

    #[test]
    fn test_timestamp_format_roundtrip() {
        let ts = parse_timestamp("2024-02-29 13:45:07").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-02-29 13:45:07");
        assert!(parse_timestamp("2024-02-30 00:00:00").is_err());
        assert!(parse_date("2024-02-29").is_ok());
    }
}
