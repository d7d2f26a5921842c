use std::fmt;

use serde::Deserialize;

use super::error::ConfigError;

/// Julian day number of 1900-01-01, the civil epoch of [`Date`].
const EPOCH_JDN: i64 = 2_415_021;

/// A civil date stored as days since 1900-01-01 (proleptic Gregorian).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date {
    epoch_day: i64,
}

impl Date {
    pub const fn from_epoch_day(epoch_day: i64) -> Self {
        Self { epoch_day }
    }

    pub fn of(year: i32, month: u32, day: u32) -> Self {
        let (y, m, d) = (year as i64, month as i64, day as i64);
        let a = (14 - m) / 12;
        let y2 = y + 4800 - a;
        let m2 = m + 12 * a - 3;
        let jdn = d + (153 * m2 + 2) / 5 + 365 * y2 + y2.div_euclid(4) - y2.div_euclid(100)
            + y2.div_euclid(400)
            - 32_045;
        Self::from_epoch_day(jdn - EPOCH_JDN)
    }

    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidDate {
            value: value.to_string(),
        };
        let mut parts = value.trim().splitn(3, '-');
        let year = parts
            .next()
            .and_then(|s| s.parse::<i32>().ok())
            .ok_or_else(invalid)?;
        let month = parts
            .next()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        let day = parts
            .next()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
            return Err(invalid());
        }
        Ok(Self::of(year, month, day))
    }

    pub const fn epoch_day(self) -> i64 {
        self.epoch_day
    }

    fn civil(self) -> (i32, u32, u32) {
        let a = self.epoch_day + EPOCH_JDN + 32_044;
        let b = (4 * a + 3).div_euclid(146_097);
        let c = a - (146_097 * b).div_euclid(4);
        let d = (4 * c + 3).div_euclid(1461);
        let e = c - (1461 * d).div_euclid(4);
        let m = (5 * e + 2).div_euclid(153);
        let day = e - (153 * m + 2).div_euclid(5) + 1;
        let month = m + 3 - 12 * m.div_euclid(10);
        let year = 100 * b + d - 4800 + m.div_euclid(10);
        (year as i32, month as u32, day as u32)
    }

    pub fn year(self) -> i32 {
        self.civil().0
    }

    pub fn month(self) -> u32 {
        self.civil().1
    }

    pub fn day(self) -> u32 {
        self.civil().2
    }

    /// 0 = Monday .. 6 = Sunday. 1900-01-01 was a Monday.
    pub fn day_of_week(self) -> u32 {
        self.epoch_day.rem_euclid(7) as u32
    }

    pub const fn plus_days(self, days: i64) -> Self {
        Self::from_epoch_day(self.epoch_day + days)
    }

    /// Adds calendar months, clamping the day to the target month's length.
    pub fn plus_months(self, months: i64) -> Self {
        let (year, month, day) = self.civil();
        let total = year as i64 * 12 + (month as i64 - 1) + months;
        let new_year = total.div_euclid(12) as i32;
        let new_month = (total.rem_euclid(12) + 1) as u32;
        let new_day = day.min(days_in_month(new_year, new_month));
        Self::of(new_year, new_month, new_day)
    }

    pub fn length_of_month(self) -> u32 {
        let (year, month, _) = self.civil();
        days_in_month(year, month)
    }

    pub fn is_first_of_month(self) -> bool {
        self.day() == 1
    }

    pub fn is_first_of_year(self) -> bool {
        let (_, month, day) = self.civil();
        month == 1 && day == 1
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (y, m, d) = self.civil();
        write!(f, "{y:04}-{m:02}-{d:02}")
    }
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

pub fn compute_next_month_start(date: Date) -> i64 {
    let (year, month, _) = date.civil();
    if month == 12 {
        Date::of(year + 1, 1, 1).epoch_day()
    } else {
        Date::of(year, month + 1, 1).epoch_day()
    }
}

pub fn compute_month_end(date: Date) -> i64 {
    compute_next_month_start(date) - 1
}

pub fn compute_next_year_start(date: Date) -> i64 {
    Date::of(date.year() + 1, 1, 1).epoch_day()
}

pub fn compute_year_end(date: Date) -> i64 {
    compute_next_year_start(date) - 1
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TradingCalendar {
    #[default]
    Weekdays,
    EveryDay,
}

impl TradingCalendar {
    pub fn is_trading_day(self, date: Date) -> bool {
        match self {
            TradingCalendar::Weekdays => date.day_of_week() < 5,
            TradingCalendar::EveryDay => true,
        }
    }
}
