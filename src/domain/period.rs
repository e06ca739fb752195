//! Calendar periods
//!
//! A `Period` is one UTC calendar month. Snapshots are keyed by it and every
//! monthly scan uses its half-open `[start, end)` window.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2100;

/// One UTC calendar month.
///
/// # Invariants
/// - `month` is in 1..=12
/// - `year` is in 2000..=2100
///
/// Ordering is chronological (year first, then month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// Create a validated period.
    ///
    /// # Errors
    /// - `DomainError::InvalidMonth` if month is not 1..=12
    /// - `DomainError::InvalidYear` if year is outside 2000..=2100
    pub fn new(year: i32, month: u32) -> Result<Self, DomainError> {
        if !(1..=12).contains(&month) {
            return Err(DomainError::InvalidMonth(month));
        }
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(DomainError::InvalidYear(year));
        }
        Ok(Self { year, month })
    }

    /// Build an optional period from optional parts, rejecting half-specified input.
    pub fn from_parts(year: Option<i32>, month: Option<u32>) -> Result<Option<Self>, DomainError> {
        match (year, month) {
            (Some(year), Some(month)) => Self::new(year, month).map(Some),
            (None, None) => Ok(None),
            _ => Err(DomainError::IncompletePeriod),
        }
    }

    /// The period containing the given instant.
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// First instant of the month (inclusive).
    pub fn start(&self) -> DateTime<Utc> {
        first_instant(self.year, self.month)
    }

    /// First instant of the following month (exclusive).
    pub fn end(&self) -> DateTime<Utc> {
        let next = self.next();
        first_instant(next.year, next.month)
    }

    /// Whether an instant falls inside `[start, end)`.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start() && at < self.end()
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = DomainError;

    /// Parse the `YYYY-MM` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s.split_once('-').ok_or(DomainError::IncompletePeriod)?;
        let year = year.parse().map_err(|_| DomainError::IncompletePeriod)?;
        let month = month.parse().map_err(|_| DomainError::IncompletePeriod)?;
        Period::new(year, month)
    }
}

impl TryFrom<String> for Period {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Period::from_str(&value)
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

fn first_instant(year: i32, month: u32) -> DateTime<Utc> {
    // Year 2101 is reachable through `end()` of December 2100, so construct
    // from the raw date rather than going through `Period::new`.
    let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN);
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}
