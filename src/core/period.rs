//! Calendar month arithmetic shared by the aggregations and the formula evaluator.

use crate::errors::{Error, Result};
use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use std::fmt;

/// One calendar month of one year. Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Period {
    year: i32,
    month: u32,
}

/// Rejects months outside 1..=12.
pub fn validate_month(month: u32) -> Result<()> {
    if (1..=12).contains(&month) {
        Ok(())
    } else {
        Err(Error::InvalidMonth { month })
    }
}

impl Period {
    /// Creates a period, validating the month.
    pub fn new(year: i32, month: u32) -> Result<Self> {
        validate_month(month)?;
        Ok(Self { year, month })
    }

    /// January to December of `year`, in order.
    pub fn months_of(year: i32) -> impl Iterator<Item = Self> {
        (1..=12).map(move |month| Self { year, month })
    }

    /// Calendar year
    #[must_use]
    pub const fn year(self) -> i32 {
        self.year
    }

    /// Calendar month, 1-12
    #[must_use]
    pub const fn month(self) -> u32 {
        self.month
    }

    #[allow(clippy::cast_possible_wrap)]
    const fn index(self) -> i32 {
        self.year * 12 + (self.month as i32 - 1)
    }

    /// The period `months` away from this one; negative values go back in time.
    #[must_use]
    pub const fn offset(self, months: i32) -> Self {
        let index = self.index() + months;
        Self {
            year: index.div_euclid(12),
            month: index.rem_euclid(12).unsigned_abs() + 1,
        }
    }

    /// First day of the month, `None` only outside chrono's date range.
    #[must_use]
    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Last day of the month, `None` only outside chrono's date range.
    #[must_use]
    pub fn last_day(self) -> Option<NaiveDate> {
        self.first_day()?
            .checked_add_months(Months::new(1))?
            .pred_opt()
    }

    /// Whether `date` falls inside this month.
    #[must_use]
    pub fn contains(self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}
