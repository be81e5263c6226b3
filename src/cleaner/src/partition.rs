//! Day partitions shared by the source and target tables.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::error::CleanupError;

/// One day's partition, `(year, month, day)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    date: NaiveDate,
}

impl PartitionKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self { date }
    }

    /// Strictly parse `YYYY-MM-DD` as a UTC calendar date.
    pub fn parse(input: &str) -> Result<Self, CleanupError> {
        let invalid = |reason: &str| CleanupError::Input {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let bytes = input.as_bytes();
        let well_formed = bytes.len() == 10
            && bytes[4] == b'-'
            && bytes[7] == b'-'
            && bytes
                .iter()
                .enumerate()
                .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
        if !well_formed {
            return Err(invalid("expected YYYY-MM-DD"));
        }

        NaiveDate::parse_from_str(input, "%Y-%m-%d")
            .map(Self::from_date)
            .map_err(|_| invalid("not a calendar date"))
    }

    /// The UTC calendar day before `now`.
    pub fn yesterday(now: DateTime<Utc>) -> Self {
        Self::from_date((now - chrono::Duration::days(1)).date_naive())
    }

    /// The explicit date when given, otherwise yesterday relative to `now`.
    pub fn resolve(explicit: Option<&str>, now: DateTime<Utc>) -> Result<Self, CleanupError> {
        match explicit {
            Some(input) => Self::parse(input),
            None => Ok(Self::yesterday(now)),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Four-digit year.
    pub fn year(&self) -> String {
        format!("{:04}", self.date.year())
    }

    /// Zero-padded month.
    pub fn month(&self) -> String {
        format!("{:02}", self.date.month())
    }

    /// Zero-padded day.
    pub fn day(&self) -> String {
        format!("{:02}", self.date.day())
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.year(), self.month(), self.day())
    }
}
